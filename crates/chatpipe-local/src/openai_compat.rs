use crate::settings::Settings;
use chatpipe_core::{Error, Message, Result};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub const TITLE_INSTRUCTION: &str = "You are a helpful assistant. Generate a very brief title (max 5 words) for a conversation based on the user's message and the assistant's response. The title should capture the main topic or purpose of the conversation. Respond with ONLY the title, without quotes or extra text.";

/// Text deltas of one streamed completion.
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// Provider parameters forwarded verbatim into the request body.
///
/// Values that look numeric (`"0.7"`, `"512"`) are sent as numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "serde_json::Map<String, serde_json::Value>",
    into = "serde_json::Map<String, serde_json::Value>"
)]
pub struct GenerationParams(serde_json::Map<String, serde_json::Value>);

impl From<serde_json::Map<String, serde_json::Value>> for GenerationParams {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::normalized(map)
    }
}

impl From<GenerationParams> for serde_json::Map<String, serde_json::Value> {
    fn from(p: GenerationParams) -> Self {
        p.0
    }
}

/// Numeric strings become JSON numbers; integers stay integers.
fn numeric(v: serde_json::Value) -> serde_json::Value {
    let serde_json::Value::String(s) = &v else {
        return v;
    };
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or(v)
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalized(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, numeric(v))).collect())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), numeric(value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded server-sent-events line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Delta(String),
    Error(String),
    Done,
    Skip,
}

/// Decode a single SSE line of a chat-completions stream.
///
/// Chunks without `choices[0].delta.content` (role announcements, usage frames,
/// keep-alives) are skipped.
pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseLine::Skip;
    };
    if let Some(err) = v.get("error") {
        let msg = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| err.to_string());
        return SseLine::Error(msg);
    }
    match v["choices"][0]["delta"]["content"].as_str() {
        Some(s) if !s.is_empty() => SseLine::Delta(s.to_string()),
        _ => SseLine::Skip,
    }
}

struct SseDecoder<S> {
    bytes: S,
    buf: Vec<u8>,
    pending: VecDeque<Result<String>>,
    done: bool,
}

impl<S> SseDecoder<S> {
    fn take_line(&mut self, line: &[u8]) {
        match parse_sse_line(&String::from_utf8_lossy(line)) {
            SseLine::Delta(s) => self.pending.push_back(Ok(s)),
            SseLine::Error(msg) => {
                self.pending.push_back(Err(Error::Llm(msg)));
                self.finish();
            }
            SseLine::Done => self.finish(),
            SseLine::Skip => {}
        }
    }

    fn drain_lines(&mut self) {
        while !self.done {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.take_line(&line);
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.buf.clear();
    }
}

/// Turn a byte stream of SSE frames into text deltas. Lines may be split across chunks
/// at any byte.
pub fn sse_deltas<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = SseDecoder {
        bytes,
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(chunk.as_ref());
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(Error::Llm(e.to_string())));
                    st.finish();
                }
                None => {
                    let rest = std::mem::take(&mut st.buf);
                    st.take_line(&rest);
                    st.finish();
                }
            }
        }
    })
}

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Llm(e.to_string()))?;
        Self::with_client(client, settings)
    }

    pub fn with_client(client: reqwest::Client, settings: &Settings) -> Result<Self> {
        let (Some(api_key), Some(base_url)) = (settings.api_key(), settings.base_url()) else {
            return Err(Error::NotConfigured(
                "api key and base url are required".to_string(),
            ));
        };
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post_completions(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let body = ChatCompletionsRequest {
            model,
            messages,
            stream,
            params,
        };
        let resp = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(300).collect();
            return Err(Error::Llm(format!("chat.completions HTTP {status}: {detail}")));
        }
        Ok(resp)
    }

    /// Model ids offered by the endpoint; any failure yields an empty list.
    pub async fn list_models(&self) -> Vec<String> {
        match self.try_list_models().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "could not list models");
                Vec::new()
            }
        }
    }

    async fn try_list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Llm(format!("models HTTP {}", resp.status())));
        }
        let v: serde_json::Value = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let models = match &v {
            serde_json::Value::Array(a) => a.as_slice(),
            serde_json::Value::Object(o) => o
                .get("data")
                .and_then(|d| d.as_array())
                .map(|a| a.as_slice())
                .unwrap_or(&[]),
            _ => return Err(Error::Llm("unexpected models response".to_string())),
        };
        Ok(models
            .iter()
            .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    /// Non-streaming completion; returns the first choice's text.
    pub async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String> {
        let resp = self.post_completions(model, messages, params, false).await?;
        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Streaming completion as text deltas.
    pub async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<DeltaStream> {
        let resp = self.post_completions(model, messages, params, true).await?;
        tracing::debug!(model, messages = messages.len(), "streaming completion");
        Ok(sse_deltas(Box::pin(resp.bytes_stream())).boxed())
    }

    /// Short conversation title, or `None` when the model call fails.
    pub async fn generate_title(
        &self,
        model: &str,
        message: &str,
        assistant_response: &str,
    ) -> Option<String> {
        let messages = [
            Message::system(TITLE_INSTRUCTION),
            Message::user(format!(
                "User message: {message}\n\nAssistant response: {assistant_response}"
            )),
        ];
        let mut params = GenerationParams::new();
        params.set("temperature", 0);
        match self.complete(model, &messages, &params).await {
            Ok(t) => Some(t.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "title generation failed");
                None
            }
        }
    }
}
