use chatpipe_core::{
    content_type_is_html, Error, FetchBackend, FetchMethod, FetchRequest, FetchResponse, Result,
};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod arxiv;
pub mod assemble;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod openai_compat;
pub mod retry;
pub mod search;
pub mod settings;
pub mod webpage;
pub mod youtube;

pub use config::PipelineConfig;
pub use dispatch::Augmenter;

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
}

impl LocalFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            // Per-request timeouts (FetchRequest.timeout_ms) override the overall cap.
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        Self::new(&cfg.user_agent)
    }

    fn apply_headers(
        &self,
        mut rb: reqwest::RequestBuilder,
        headers: &BTreeMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                rb = rb.header(name, value);
            }
        }
        rb
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let mut rb = match &req.method {
            FetchMethod::Get => self.client.get(url),
            FetchMethod::PostForm(fields) => self.client.post(url).form(fields),
        };
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        rb = self.apply_headers(rb, &req.headers);

        let t0 = std::time::Instant::now();
        let resp = rb.send().await.map_err(|e| Error::Fetch(e.to_string()))?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut bytes = Vec::new();
        let mut truncated = false;
        if req.html_only && !content_type_is_html(content_type.as_deref()) {
            drop(resp);
            truncated = true;
        } else {
            let max_bytes = req.max_bytes.unwrap_or(u64::MAX) as usize;
            let mut stream = resp.bytes_stream();
            use futures_util::StreamExt;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
                if bytes.len().saturating_add(chunk.len()) > max_bytes {
                    let can_take = max_bytes.saturating_sub(bytes.len());
                    bytes.extend_from_slice(&chunk[..can_take]);
                    truncated = true;
                    break;
                }
                bytes.extend_from_slice(&chunk);
            }
        }

        tracing::debug!(
            url = %req.url,
            status,
            bytes = bytes.len(),
            truncated,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(FetchResponse {
            url: req.url.clone(),
            final_url,
            status,
            content_type,
            bytes,
            truncated,
        })
    }
}
