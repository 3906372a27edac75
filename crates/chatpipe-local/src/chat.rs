//! Chat turns: augmentation, prompt assembly and a streamed reply.
//!
//! Every failure ends up as text in the reply stream; callers only ever see deltas.

use crate::assemble::{assemble, continuation};
use crate::openai_compat::{ChatClient, GenerationParams};
use crate::settings::Settings;
use crate::Augmenter;
use chatpipe_core::{Message, MessageContent};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

pub const MISSING_CREDENTIALS: &str = "Please set your API key and base URL in the settings.";
pub const DEFAULT_MODEL: &str = "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo";
pub const DEFAULT_SYSTEM_TEXT: &str = "Be a helpful assistant";

/// Reply text, delta by delta.
pub type ReplyStream = BoxStream<'static, String>;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_text() -> String {
    DEFAULT_SYSTEM_TEXT.to_string()
}

/// A new user turn. An empty `system_text` sends no system message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: MessageContent,
    #[serde(default)]
    pub conversation: Vec<Message>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_text")]
    pub system_text: String,
    #[serde(default)]
    pub parameters: GenerationParams,
}

impl ChatRequest {
    pub fn new(message: impl Into<MessageContent>) -> Self {
        Self {
            message: message.into(),
            conversation: Vec::new(),
            model: default_model(),
            system_text: default_system_text(),
            parameters: GenerationParams::new(),
        }
    }
}

/// Continue the conversation from its last turn, without a new user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueRequest {
    #[serde(default)]
    pub conversation: Vec<Message>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_text")]
    pub system_text: String,
    #[serde(default)]
    pub parameters: GenerationParams,
}

fn once(text: impl Into<String>) -> ReplyStream {
    stream::once(std::future::ready(text.into())).boxed()
}

pub struct ChatService {
    augmenter: Augmenter,
    client: Option<ChatClient>,
}

impl ChatService {
    pub fn new(augmenter: Augmenter, client: Option<ChatClient>) -> Self {
        Self { augmenter, client }
    }

    /// Client built from `settings`; incomplete settings leave the service unconfigured.
    pub fn from_settings(augmenter: Augmenter, settings: &Settings) -> Self {
        let client = match ChatClient::from_settings(settings) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::debug!(error = %e, "chat client unavailable");
                None
            }
        };
        Self::new(augmenter, client)
    }

    pub fn client(&self) -> Option<&ChatClient> {
        self.client.as_ref()
    }

    pub async fn chat(&self, req: ChatRequest) -> ReplyStream {
        let Some(client) = &self.client else {
            return once(MISSING_CREDENTIALS);
        };
        let aug = match &req.message {
            MessageContent::Text(text) => Some(self.augmenter.augment(text).await),
            MessageContent::Parts(_) => None,
        };
        if let Some(err) = aug.as_ref().and_then(|a| a.user_visible_error.clone()) {
            return once(err);
        }
        let messages = assemble(
            Some(req.system_text.as_str()),
            req.conversation,
            req.message,
            aug.as_ref(),
        );
        reply(client, &req.model, &messages, &req.parameters).await
    }

    pub async fn continue_generation(&self, req: ContinueRequest) -> ReplyStream {
        let Some(client) = &self.client else {
            return once(MISSING_CREDENTIALS);
        };
        let messages = continuation(Some(req.system_text.as_str()), req.conversation);
        reply(client, &req.model, &messages, &req.parameters).await
    }
}

async fn reply(
    client: &ChatClient,
    model: &str,
    messages: &[Message],
    params: &GenerationParams,
) -> ReplyStream {
    match client.stream(model, messages, params).await {
        Ok(deltas) => deltas
            .scan(false, |failed, item| {
                if *failed {
                    return std::future::ready(None);
                }
                let text = match item {
                    Ok(t) => t,
                    Err(e) => {
                        *failed = true;
                        tracing::warn!(error = %e, "completion stream failed");
                        format!("An error occurred: {e}")
                    }
                };
                std::future::ready(Some(text))
            })
            .boxed(),
        Err(e) => {
            tracing::warn!(error = %e, "completion request failed");
            once(format!("An error occurred: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineConfig;
    use axum::{http::header, routing::post, Json, Router};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Fake completions endpoint: records request bodies and answers with `body_sse`.
    async fn completions(body_sse: &'static str) -> (SocketAddr, Arc<Mutex<Vec<serde_json::Value>>>) {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<serde_json::Value>| {
                let seen = seen2.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    ([(header::CONTENT_TYPE, "text/event-stream")], body_sse)
                }
            }),
        );
        (serve(app).await, seen)
    }

    fn service(addr: Option<SocketAddr>) -> ChatService {
        let augmenter = Augmenter::local(PipelineConfig::default()).unwrap();
        let settings = match addr {
            Some(a) => Settings {
                api_key: Some("sk-test".to_string()),
                base_url: Some(format!("http://{a}/v1")),
            },
            None => Settings::default(),
        };
        ChatService::from_settings(augmenter, &settings)
    }

    async fn collect(s: ReplyStream) -> String {
        s.collect::<Vec<_>>().await.concat()
    }

    #[tokio::test]
    async fn unconfigured_service_replies_with_a_fixed_message() {
        let svc = service(None);
        assert!(svc.client().is_none());
        assert_eq!(collect(svc.chat(ChatRequest::new("@s https://example.com")).await).await, MISSING_CREDENTIALS);
        let cont = ContinueRequest {
            conversation: vec![Message::user("hi")],
            model: default_model(),
            system_text: String::new(),
            parameters: GenerationParams::new(),
        };
        assert_eq!(collect(svc.continue_generation(cont).await).await, MISSING_CREDENTIALS);
    }

    #[tokio::test]
    async fn plain_chat_streams_the_reply() {
        let (addr, seen) = completions(
            "data: {\"choices\":[{\"delta\":{\"content\":\"o\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"k\"}}]}\n\ndata: [DONE]\n\n",
        )
        .await;
        let svc = service(Some(addr));
        let mut req = ChatRequest::new("hello");
        req.conversation = vec![Message::user("before"), Message::assistant("reply")];
        req.parameters.set("temperature", "0.5");

        assert_eq!(collect(svc.chat(req).await).await, "ok");

        let seen = seen.lock().unwrap();
        let msgs = seen[0]["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], DEFAULT_SYSTEM_TEXT);
        assert_eq!(msgs[3]["content"], "hello");
        assert_eq!(seen[0]["model"], DEFAULT_MODEL);
        assert_eq!(seen[0]["stream"], true);
        assert_eq!(seen[0]["temperature"], 0.5);
    }

    #[tokio::test]
    async fn continuation_sends_history_without_a_new_turn() {
        let (addr, seen) =
            completions("data: {\"choices\":[{\"delta\":{\"content\":\"more\"}}]}\n\ndata: [DONE]\n\n").await;
        let svc = service(Some(addr));
        let req = ContinueRequest {
            conversation: vec![Message::user("tell a story"), Message::assistant("Once upon")],
            model: "m".to_string(),
            system_text: String::new(),
            parameters: GenerationParams::new(),
        };
        assert_eq!(collect(svc.continue_generation(req).await).await, "more");
        let seen = seen.lock().unwrap();
        let msgs = seen[0]["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn stream_errors_become_a_final_delta() {
        let (addr, _) = completions(
            "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\ndata: {\"error\":{\"message\":\"overloaded\"}}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        )
        .await;
        let svc = service(Some(addr));
        let out = collect(svc.chat(ChatRequest::new("hi")).await).await;
        assert_eq!(out, "parAn error occurred: llm failed: overloaded");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported_in_the_reply() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let svc = service(Some(addr));
        let out = collect(svc.chat(ChatRequest::new("hi")).await).await;
        assert!(out.starts_with("An error occurred: "), "{out}");
    }

    #[test]
    fn requests_fill_defaults_from_json() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req.model, DEFAULT_MODEL);
        assert_eq!(req.system_text, DEFAULT_SYSTEM_TEXT);
        assert!(req.conversation.is_empty());
        assert!(req.parameters.is_empty());

        let req: ChatRequest = serde_json::from_str(
            r#"{"message":[{"type":"text","text":"x"}],"system_text":"","parameters":{"top_p":"0.9"}}"#,
        )
        .unwrap();
        assert!(req.message.as_text().is_none());
        assert_eq!(req.system_text, "");
        assert_eq!(req.parameters.get("top_p"), Some(&serde_json::json!(0.9)));
    }
}
