//! Web search: query the lite listing, harvest the top links concurrently, and format
//! them as labelled source blocks.

use crate::retry::retry;
use crate::webpage::fetch_page_text_with_retry;
use crate::PipelineConfig;
use chatpipe_core::{Error, FetchBackend, FetchRequest, FetchResult, Result, SearchLink};
use futures::future::join_all;

pub const NO_QUERY: &str = "Please provide a search query";
pub const NO_RESULTS: &str = "No results found";

/// Instruction framing placed before the harvested source blocks.
pub fn search_instructions(query: &str) -> String {
    format!(
        "You are a knowledgeable search assistant. Analyze the following search query and provided source texts to create a comprehensive response:

QUERY: {query}

Instructions:
- Focus ONLY on directly answering the query using the provided sources
- NO general background or context unless specifically requested
- Provide accurate, detailed information using an unbiased, journalistic tone
- Use markdown formatting for better readability:
• Lists and bullet points for multiple items
• Code blocks with language specification
• Tables for structured data
- Include relevant quotes from sources when appropriate
- Focus on factual information without subjective statements
- Organize information logically with clear paragraph breaks
- Match the query's language and tone

For specialized topics:
- Academic: Provide detailed analysis with proper sections
- News: Summarize key points with bullet points
- Technical: Include code blocks with language specification
- Scientific: Use LaTeX for formulas (\\(inline\\) or \\[block\\])
- Biographical: Focus on key facts and achievements
- Products: Group options by category (max 5 recommendations)

Source texts for analysis: \n\n "
    )
}

/// POST the query to the listing endpoint, retrying transport and status failures.
pub async fn fetch_listing(
    backend: &dyn FetchBackend,
    query: &str,
    cfg: &PipelineConfig,
) -> Result<String> {
    let req = FetchRequest::post_form(
        cfg.search_endpoint.as_str(),
        vec![("q".to_string(), query.to_string())],
    )
    .with_timeout(cfg.timeout)
    .with_header("User-Agent", cfg.user_agent.as_str());

    let req = &req;
    retry(cfg.retry_policy(), "search listing", move |_| async move {
        let resp = backend.fetch(req).await?.error_for_status()?;
        Ok::<_, Error>(resp.text_lossy())
    })
    .await
    .map_err(|e| Error::Search(e.to_string()))
}

/// Unwrap `https://duckduckgo.com/l/?uddg=<target>` redirect links.
fn decode_redirect(u: &url::Url) -> Option<String> {
    let host = u.host_str()?.to_ascii_lowercase();
    if !host.contains("duckduckgo.com") || !u.path().starts_with("/l/") {
        return None;
    }
    let target = u
        .query_pairs()
        .find(|(k, _)| k == "uddg")
        .map(|(_, v)| v.trim().to_string())?;
    if target.is_empty() {
        return None;
    }
    Some(target)
}

fn resolve_href(base: Option<&url::Url>, href: &str) -> Option<String> {
    let abs = match url::Url::parse(href) {
        Ok(u) => u,
        Err(_) => base?.join(href).ok()?,
    };
    let target = match decode_redirect(&abs) {
        Some(t) => url::Url::parse(&t).ok()?,
        None => abs,
    };
    if !matches!(target.scheme(), "http" | "https") {
        return None;
    }
    Some(target.to_string())
}

/// Result anchors (`tr td a[href]`) in document order, first `limit` distinct targets.
///
/// Relative hrefs resolve against `base_url`; redirect wrappers are unwrapped and
/// anything that is not http(s) is dropped. Ranks are 1-based and contiguous.
pub fn parse_links(html: &str, base_url: &str, limit: usize) -> Vec<SearchLink> {
    if limit == 0 {
        return Vec::new();
    }
    let base = url::Url::parse(base_url).ok();
    let doc = html_scraper::Html::parse_document(html);
    let sel = match html_scraper::Selector::parse("tr td a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut out: Vec<SearchLink> = Vec::new();
    for el in doc.select(&sel) {
        if out.len() >= limit {
            break;
        }
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() {
            continue;
        }
        let Some(url) = resolve_href(base.as_ref(), href) else {
            continue;
        };
        if out.iter().any(|l| l.url == url) {
            continue;
        }
        out.push(SearchLink {
            rank: out.len() + 1,
            url,
        });
    }
    out
}

/// Fetch every link concurrently; results come back in rank order whatever the
/// completion order was. A failed link yields an empty, unsucceeded result.
pub async fn harvest(
    backend: &dyn FetchBackend,
    links: &[SearchLink],
    cfg: &PipelineConfig,
) -> Vec<FetchResult> {
    let policy = cfg.retry_policy();
    let tasks = links.iter().map(move |link| async move {
        match fetch_page_text_with_retry(backend, &link.url, cfg, policy).await {
            Ok(text) => FetchResult::ok(link.url.as_str(), link.rank, text),
            Err(e) => {
                tracing::warn!(url = %link.url, rank = link.rank, error = %e, "search result dropped");
                FetchResult::failed(link.url.as_str(), link.rank)
            }
        }
    });
    join_all(tasks).await
}

/// Labelled block per non-empty result, concatenated in the given order.
pub fn format_blocks(results: &[FetchResult]) -> String {
    results
        .iter()
        .filter(|r| !r.text.is_empty())
        .map(|r| {
            format!(
                "Source text {} from website {}:\n\n {}\n\n",
                r.index, r.source_label, r.text
            )
        })
        .collect()
}

/// Full search pipeline: listing, link parse, fan-out, formatting.
///
/// Never fails: an empty query, an exhausted listing request and an empty listing all
/// come back as descriptive text.
pub async fn search_text(backend: &dyn FetchBackend, query: &str, cfg: &PipelineConfig) -> String {
    let query = query.trim();
    if query.is_empty() {
        return NO_QUERY.to_string();
    }
    let listing = match fetch_listing(backend, query, cfg).await {
        Ok(html) => html,
        Err(e) => {
            tracing::warn!(error = %e, "search listing unavailable");
            return NO_RESULTS.to_string();
        }
    };
    let links = parse_links(&listing, &cfg.search_endpoint, cfg.results);
    if links.is_empty() {
        return NO_RESULTS.to_string();
    }
    tracing::debug!(links = links.len(), "harvesting search results");
    let results = harvest(backend, &links, cfg).await;
    format_blocks(&results)
}
