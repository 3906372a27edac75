//! `@s` command detection and source dispatch.
//!
//! A triggered message is classified by an ordered rule list (video, paper, webpage,
//! search); exactly one source fetcher runs, and this module alone decides whether its
//! failure becomes text for the model or an error shown to the user.

use crate::arxiv::{fetch_paper_text, find_paper_link, strip_paper_links};
use crate::search::{search_instructions, search_text};
use crate::webpage::fetch_page_text;
use crate::youtube::{transcript_text, YtDlpTranscripts};
use crate::{LocalFetcher, PipelineConfig};
use chatpipe_core::{
    Augmentation, FetchBackend, Result, RetrievalRequest, SourceKind, TranscriptService,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};

pub const TRIGGER: &str = "@s";

pub const VIDEO_PROMPT: &str = "Explain simply what this video is about using proper format: \n\n ";
pub const PAPER_PROMPT: &str =
    "Explain simply what this arXiv paper is about using proper formatting: \n\n ";
pub const WEBPAGE_PROMPT: &str =
    "Explain simply what this webpage is about using proper format: \n\n ";

static VIDEO_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://)?(www\.)?(youtube|youtu|youtube-nocookie)\.(com|be)/.+")
        .expect("video link regex is valid")
});
static VIDEO_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://)?(www\.)?(youtube|youtu|youtube-nocookie)\.(com|be)/[^ ]+")
        .expect("video strip regex is valid")
});
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url regex is valid"));

/// Detect the `@s` trigger (any case) followed by whitespace or end of input.
///
/// When triggered, `raw_message` holds the text after the trigger, trimmed; otherwise it
/// is the input unchanged.
pub fn detect_trigger(raw: &str) -> RetrievalRequest {
    let triggered = raw
        .get(..TRIGGER.len())
        .map(|head| head.eq_ignore_ascii_case(TRIGGER))
        .unwrap_or(false)
        && raw[TRIGGER.len()..]
            .chars()
            .next()
            .map(char::is_whitespace)
            .unwrap_or(true);
    if triggered {
        RetrievalRequest {
            raw_message: raw[TRIGGER.len()..].trim().to_string(),
            trigger_stripped: true,
        }
    } else {
        RetrievalRequest {
            raw_message: raw.to_string(),
            trigger_stripped: false,
        }
    }
}

/// Outcome of classifying triggered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: SourceKind,
    /// What the fetcher receives: the whole text (video, search) or the link.
    pub target: String,
    /// User text left once links are removed, trimmed.
    pub remainder: String,
}

struct Rule {
    kind: SourceKind,
    matches: fn(&str) -> Option<Classified>,
}

fn video_rule(text: &str) -> Option<Classified> {
    VIDEO_LINK_RE.is_match(text).then(|| Classified {
        kind: SourceKind::Video,
        target: text.to_string(),
        remainder: VIDEO_STRIP_RE.replace_all(text, "").trim().to_string(),
    })
}

fn paper_rule(text: &str) -> Option<Classified> {
    let link = find_paper_link(text)?;
    Some(Classified {
        kind: SourceKind::Paper,
        target: link.url,
        remainder: strip_paper_links(text).trim().to_string(),
    })
}

fn webpage_rule(text: &str) -> Option<Classified> {
    let m = URL_RE.find(text)?;
    Some(Classified {
        kind: SourceKind::Webpage,
        target: m.as_str().to_string(),
        remainder: URL_RE.replace_all(text, "").trim().to_string(),
    })
}

const RULES: [Rule; 3] = [
    Rule {
        kind: SourceKind::Video,
        matches: video_rule,
    },
    Rule {
        kind: SourceKind::Paper,
        matches: paper_rule,
    },
    Rule {
        kind: SourceKind::Webpage,
        matches: webpage_rule,
    },
];

/// First matching rule wins; text without any link is a search query.
pub fn classify(text: &str) -> Classified {
    for rule in &RULES {
        if let Some(c) = (rule.matches)(text) {
            debug_assert_eq!(c.kind, rule.kind);
            return c;
        }
    }
    Classified {
        kind: SourceKind::Search,
        target: text.to_string(),
        remainder: text.to_string(),
    }
}

/// User-facing part of the prompt for a link source: the user's own words, or a canned
/// instruction when they gave none. Search queries are always wrapped in the search instructions.
pub fn framed_user_text(kind: SourceKind, remainder: &str) -> String {
    if kind == SourceKind::Search {
        return search_instructions(remainder);
    }
    if !remainder.is_empty() {
        return format!("{remainder} \n\n ");
    }
    match kind {
        SourceKind::Video => VIDEO_PROMPT.to_string(),
        SourceKind::Paper => PAPER_PROMPT.to_string(),
        _ => WEBPAGE_PROMPT.to_string(),
    }
}

/// The augmentation pipeline: trigger detection, classification, one fetch.
pub struct Augmenter {
    fetcher: Arc<dyn FetchBackend>,
    transcripts: Arc<dyn TranscriptService>,
    cfg: PipelineConfig,
}

impl Augmenter {
    pub fn new(
        fetcher: Arc<dyn FetchBackend>,
        transcripts: Arc<dyn TranscriptService>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            transcripts,
            cfg,
        }
    }

    /// reqwest fetcher plus the yt-dlp transcript service.
    pub fn local(cfg: PipelineConfig) -> Result<Self> {
        let fetcher: Arc<dyn FetchBackend> = Arc::new(LocalFetcher::from_config(&cfg)?);
        let transcripts = Arc::new(YtDlpTranscripts::new(fetcher.clone(), cfg.clone()));
        Ok(Self::new(fetcher, transcripts, cfg))
    }

    /// Run the pipeline over one raw chat message. Messages without the trigger come
    /// back unchanged and cause no network activity.
    pub async fn augment(&self, raw: &str) -> Augmentation {
        let req = detect_trigger(raw);
        if !req.trigger_stripped {
            return Augmentation::passthrough(raw);
        }
        let c = classify(&req.raw_message);
        tracing::debug!(kind = %c.kind, target = %c.target, "augmenting message");

        let fetcher = self.fetcher.as_ref();
        let mut out = Augmentation {
            kind: Some(c.kind),
            user_text: framed_user_text(c.kind, &c.remainder),
            retrieved_text: String::new(),
            user_visible_error: None,
        };
        match c.kind {
            SourceKind::Video => {
                out.retrieved_text = transcript_text(self.transcripts.as_ref(), &c.target).await;
            }
            SourceKind::Paper => {
                let Some(link) = find_paper_link(&c.target) else {
                    out.user_visible_error = Some("Invalid arXiv URL".to_string());
                    return out;
                };
                match fetch_paper_text(fetcher, &link, &self.cfg).await {
                    Ok(text) => out.retrieved_text = text,
                    Err(e) => out.user_visible_error = Some(e.to_string()),
                }
            }
            SourceKind::Webpage => match fetch_page_text(fetcher, &c.target, &self.cfg).await {
                Ok(text) => out.retrieved_text = text,
                Err(e) => {
                    tracing::warn!(url = %c.target, error = %e, "webpage fetch failed");
                    out.user_visible_error =
                        Some(format!("An error occurred while fetching the webpage: {e}"));
                }
            },
            SourceKind::Search => {
                out.retrieved_text = search_text(fetcher, &c.target, &self.cfg).await;
            }
        }
        out
    }
}
