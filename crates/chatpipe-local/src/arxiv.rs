//! arXiv papers: abstract pages and PDFs.

use crate::extract::{bytes_look_like_pdf, pdf_to_text};
use crate::PipelineConfig;
use chatpipe_core::{Error, FetchBackend, FetchRequest, Result};
use regex::Regex;
use std::sync::LazyLock;

static PAPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://arxiv\.org/(abs|pdf)/\d+\.\d+(v\d+)?").expect("arxiv link regex is valid")
});

const ABSTRACT_START: &str = "Abstract:</span>";
const ABSTRACT_END: &str = "Comments:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperVariant {
    Abstract,
    Pdf,
}

impl PaperVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperVariant::Abstract => "abs",
            PaperVariant::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PaperLink {
    pub url: String,
    pub variant: PaperVariant,
}

/// First `arxiv.org/abs/<id>` or `arxiv.org/pdf/<id>` link in `text` (new-style ids only).
pub fn find_paper_link(text: &str) -> Option<PaperLink> {
    let c = PAPER_RE.captures(text)?;
    let variant = match c.get(1)?.as_str() {
        "abs" => PaperVariant::Abstract,
        _ => PaperVariant::Pdf,
    };
    Some(PaperLink {
        url: c.get(0)?.as_str().to_string(),
        variant,
    })
}

/// Remove every paper link (and whatever is glued to it up to the next space).
pub fn strip_paper_links(text: &str) -> String {
    static STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"https?://arxiv\.org/(abs|pdf)/\d+\.\d+(v\d+)?[^ ]*")
            .expect("arxiv strip regex is valid")
    });
    STRIP_RE.replace_all(text, "").to_string()
}

/// The raw abstract slice of an abs page: everything between the `Abstract:` descriptor
/// and the following `Comments:` label, trimmed. Either marker missing is an error.
pub fn extract_abstract(html: &str) -> Result<String> {
    let start = html
        .find(ABSTRACT_START)
        .map(|i| i + ABSTRACT_START.len())
        .ok_or_else(|| Error::Extract("Abstract not found in the response.".to_string()))?;
    let len = html[start..]
        .find(ABSTRACT_END)
        .ok_or_else(|| Error::Extract("Abstract not found in the response.".to_string()))?;
    Ok(html[start..start + len].trim().to_string())
}

async fn paper_text(backend: &dyn FetchBackend, link: &PaperLink, cfg: &PipelineConfig) -> Result<String> {
    let req = FetchRequest::get(link.url.as_str())
        .with_timeout(cfg.timeout)
        .with_header("User-Agent", cfg.user_agent.as_str());
    let resp = backend.fetch(&req).await?.error_for_status()?;
    match link.variant {
        PaperVariant::Abstract => extract_abstract(&resp.text_lossy()),
        PaperVariant::Pdf => {
            if !bytes_look_like_pdf(&resp.bytes) {
                return Err(Error::Extract("response is not a PDF".to_string()));
            }
            let bytes = resp.bytes;
            // pdf-extract can panic on malformed input; keep that off the runtime threads.
            tokio::task::spawn_blocking(move || pdf_to_text(&bytes))
                .await
                .map_err(|e| Error::Extract(format!("pdf extraction aborted: {e}")))?
        }
    }
}

/// Text of the linked paper: the abstract for abs links, the full text for pdf links.
/// Single attempt; failures come back as `Error::Paper`.
pub async fn fetch_paper_text(
    backend: &dyn FetchBackend,
    link: &PaperLink,
    cfg: &PipelineConfig,
) -> Result<String> {
    paper_text(backend, link, cfg).await.map_err(|e| {
        tracing::warn!(url = %link.url, variant = link.variant.as_str(), error = %e, "paper fetch failed");
        Error::Paper(format!("Failed to process arXiv {}: {e}", link.variant.as_str()))
    })
}
