use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("HTTP {status} for url {url}")]
    HttpStatus { status: u16, url: String },
    #[error("search failed: {0}")]
    Search(String),
    #[error("transcript failed: {0}")]
    Transcript(String),
    #[error("{0}")]
    Paper(String),
    #[error("extract failed: {0}")]
    Extract(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    /// `application/x-www-form-urlencoded` POST with the given fields.
    PostForm(Vec<(String, String)>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub method: FetchMethod,
    /// Timeout for the whole exchange (connect + body).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
    /// Skip the body when the response is not `text/html`.
    #[serde(default)]
    pub html_only: bool,
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: FetchMethod::Get,
            timeout_ms: None,
            max_bytes: None,
            html_only: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            method: FetchMethod::PostForm(fields),
            timeout_ms: None,
            max_bytes: None,
            html_only: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn html_only(mut self) -> Self {
        self.html_only = true;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// The body was cut short by `max_bytes` or skipped by `html_only`.
    #[serde(default)]
    pub truncated: bool,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into `Error::HttpStatus`.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::HttpStatus {
                status: self.status,
                url: self.url,
            })
        }
    }

    /// Whether the declared content type is HTML. A missing header counts as "not HTML".
    pub fn is_html(&self) -> bool {
        content_type_is_html(self.content_type.as_deref())
    }
}

pub fn content_type_is_html(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

/// The HTTP fetch primitive every source fetcher goes through.
#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

/// Which retrieval strategy handles a triggered message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Search,
    Webpage,
    Video,
    Paper,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Search => "search",
            SourceKind::Webpage => "webpage",
            SourceKind::Video => "video",
            SourceKind::Paper => "paper",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// User input after trigger detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub raw_message: String,
    pub trigger_stripped: bool,
}

/// Uniform output of one fetch attempt. `text` is empty (never absent) on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchResult {
    pub source_label: String,
    pub index: usize,
    pub text: String,
    pub succeeded: bool,
}

impl FetchResult {
    pub fn ok(source_label: impl Into<String>, index: usize, text: String) -> Self {
        Self {
            source_label: source_label.into(),
            index,
            text,
            succeeded: true,
        }
    }

    pub fn failed(source_label: impl Into<String>, index: usize) -> Self {
        Self {
            source_label: source_label.into(),
            index,
            text: String::new(),
            succeeded: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchLink {
    pub url: String,
    /// 1-based position in the result listing.
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message content: plain text, or a multi-part payload (text + images, ...)
/// that is forwarded untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Result of running the augmentation pipeline over one raw message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Augmentation {
    /// `None` when the message carried no trigger (passthrough).
    pub kind: Option<SourceKind>,
    pub user_text: String,
    pub retrieved_text: String,
    /// Set when an explicit link could not be honoured; the caller should reply with it
    /// instead of calling the model.
    pub user_visible_error: Option<String>,
}

impl Augmentation {
    pub fn passthrough(raw: &str) -> Self {
        Self {
            kind: None,
            user_text: raw.to_string(),
            retrieved_text: String::new(),
            user_visible_error: None,
        }
    }

    pub fn augmented_text(&self) -> String {
        format!("{}{}", self.user_text, self.retrieved_text)
    }
}

/// Final composition handed to the completion model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AugmentedPrompt {
    pub system_text: Option<String>,
    pub history: Vec<Message>,
    pub user_text: String,
    pub retrieved_text: String,
}

impl AugmentedPrompt {
    pub fn into_messages(self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = self.system_text.filter(|s| !s.is_empty()) {
            out.push(Message::system(system));
        }
        out.extend(self.history);
        out.push(Message::user(format!(
            "{}{}",
            self.user_text, self.retrieved_text
        )));
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptTrack {
    pub language_code: String,
    pub language: Option<String>,
    pub is_generated: bool,
    /// Where the service downloads this track from, when it knows up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

/// Lists and fetches caption tracks for a video id.
#[async_trait::async_trait]
pub trait TranscriptService: Send + Sync {
    /// Tracks in service order; may be empty.
    async fn list_tracks(&self, video_id: &str) -> Result<Vec<TranscriptTrack>>;
    async fn fetch_segments(
        &self,
        video_id: &str,
        track: &TranscriptTrack,
    ) -> Result<Vec<TranscriptSegment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_round_trips_text_and_parts() {
        let m: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(m.content.as_text(), Some("hi"));

        let m: Message = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"look"},{"type":"image_url","image_url":{"url":"data:x"}}]}"#,
        )
        .unwrap();
        assert!(m.content.as_text().is_none());
        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back["content"][1]["type"], "image_url");
        assert_eq!(back["role"], "user");
    }

    #[test]
    fn augmented_prompt_skips_empty_system_text() {
        let p = AugmentedPrompt {
            system_text: Some(String::new()),
            history: vec![Message::user("a"), Message::assistant("b")],
            user_text: "q \n\n ".to_string(),
            retrieved_text: "ctx".to_string(),
        };
        let msgs = p.into_messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[2].content.as_text(), Some("q \n\n ctx"));
    }

    #[test]
    fn fetch_response_classifies_status_and_html() {
        let r = FetchResponse {
            url: "http://x/".to_string(),
            final_url: "http://x/".to_string(),
            status: 404,
            content_type: Some("Text/HTML; charset=utf-8".to_string()),
            bytes: Vec::new(),
            truncated: false,
        };
        assert!(r.is_html());
        match r.error_for_status() {
            Err(Error::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected HttpStatus, got {other:?}"),
        }
        assert!(!content_type_is_html(None));
        assert!(!content_type_is_html(Some("application/pdf")));
    }

    #[test]
    fn fetch_request_builders_set_body_limits() {
        let r = FetchRequest::get("http://x/").with_max_bytes(1024).html_only();
        assert_eq!(r.max_bytes, Some(1024));
        assert!(r.html_only);
        let plain = FetchRequest::post_form("http://x/", Vec::new());
        assert_eq!(plain.max_bytes, None);
        assert!(!plain.html_only);
    }
}
