use crate::extract::html_visible_text;
use crate::retry::{retry, RetryPolicy};
use crate::PipelineConfig;
use chatpipe_core::{FetchBackend, FetchRequest, Result};

fn page_request(url: &str, cfg: &PipelineConfig) -> FetchRequest {
    FetchRequest::get(url)
        .with_timeout(cfg.timeout)
        .with_max_bytes(cfg.max_page_bytes)
        .html_only()
        .with_header("User-Agent", cfg.user_agent.as_str())
}

/// Fetch one page and return its visible text.
///
/// - non-2xx or transport failure: `Err`
/// - declared content type is not HTML: `Ok("")`, and the body is never downloaded
/// - bodies past `cfg.max_page_bytes` are cut at the cap
pub async fn fetch_page_text(
    backend: &dyn FetchBackend,
    url: &str,
    cfg: &PipelineConfig,
) -> Result<String> {
    let resp = backend
        .fetch(&page_request(url, cfg))
        .await?
        .error_for_status()?;
    if !resp.is_html() {
        tracing::debug!(url, content_type = ?resp.content_type, "skipping non-html page");
        return Ok(String::new());
    }
    Ok(html_visible_text(&resp.text_lossy()))
}

/// Same as [`fetch_page_text`], retried under `policy`.
pub async fn fetch_page_text_with_retry(
    backend: &dyn FetchBackend,
    url: &str,
    cfg: &PipelineConfig,
    policy: RetryPolicy,
) -> Result<String> {
    retry(policy, url, move |_| fetch_page_text(backend, url, cfg)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalFetcher;
    use axum::{http::header, http::StatusCode, routing::get, Router};
    use chatpipe_core::Error;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn cfg() -> PipelineConfig {
        PipelineConfig {
            timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(5),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn html_pages_yield_visible_text_and_other_types_yield_empty() {
        let app = Router::new()
            .route(
                "/page",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        "<html><head><script>x()</script></head><body><h1>Title</h1><p>Body text</p></body></html>",
                    )
                }),
            )
            .route(
                "/data.json",
                get(|| async { ([(header::CONTENT_TYPE, "application/json")], r#"{"a":1}"#) }),
            )
            .route("/gone", get(|| async { (StatusCode::NOT_FOUND, "missing") }));
        let addr = serve(app).await;
        let fetcher = LocalFetcher::new("chatpipe-test").unwrap();
        let cfg = cfg();

        let t = fetch_page_text(&fetcher, &format!("http://{addr}/page"), &cfg)
            .await
            .unwrap();
        assert_eq!(t, "Title Body text");

        let t = fetch_page_text(&fetcher, &format!("http://{addr}/data.json"), &cfg)
            .await
            .unwrap();
        assert_eq!(t, "");

        let err = fetch_page_text(&fetcher, &format!("http://{addr}/gone"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn retried_fetch_recovers_from_transient_failures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let app = Router::new().route(
            "/flaky",
            get(move || {
                let hits = hits2.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            [(header::CONTENT_TYPE, "text/plain")],
                            "busy".to_string(),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            [(header::CONTENT_TYPE, "text/html")],
                            "<p>finally</p>".to_string(),
                        )
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let fetcher = LocalFetcher::new("chatpipe-test").unwrap();
        let cfg = cfg();

        let t = fetch_page_text_with_retry(
            &fetcher,
            &format!("http://{addr}/flaky"),
            &cfg,
            cfg.retry_policy(),
        )
        .await
        .unwrap();
        assert_eq!(t, "finally");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_html_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let app = Router::new().route(
            "/img.png",
            get(move || {
                let hits = hits2.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G'])
                }
            }),
        );
        let addr = serve(app).await;
        let fetcher = LocalFetcher::new("chatpipe-test").unwrap();
        let cfg = cfg();
        let t = fetch_page_text_with_retry(
            &fetcher,
            &format!("http://{addr}/img.png"),
            &cfg,
            cfg.retry_policy(),
        )
        .await
        .unwrap();
        assert!(t.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_endless_binary_body_is_skipped_without_error() {
        let app = Router::new().route(
            "/download.bin",
            get(|| async {
                let chunks = futures::stream::unfold((), |()| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Some((Ok::<_, std::io::Error>(vec![0u8; 64 * 1024]), ()))
                });
                (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    axum::body::Body::from_stream(chunks),
                )
            }),
        );
        let addr = serve(app).await;
        let fetcher = LocalFetcher::new("chatpipe-test").unwrap();
        let cfg = cfg();

        let t0 = std::time::Instant::now();
        let t = fetch_page_text(&fetcher, &format!("http://{addr}/download.bin"), &cfg)
            .await
            .unwrap();
        assert_eq!(t, "");
        assert!(t0.elapsed() < cfg.timeout, "took {:?}", t0.elapsed());
    }

    #[tokio::test]
    async fn oversized_html_is_cut_at_the_page_cap() {
        let app = Router::new().route(
            "/long",
            get(|| async {
                let body = format!("<p>{}</p>", "word ".repeat(10_000));
                ([(header::CONTENT_TYPE, "text/html")], body)
            }),
        );
        let addr = serve(app).await;
        let fetcher = LocalFetcher::new("chatpipe-test").unwrap();
        let cfg = PipelineConfig {
            max_page_bytes: 23,
            ..cfg()
        };
        let t = fetch_page_text(&fetcher, &format!("http://{addr}/long"), &cfg)
            .await
            .unwrap();
        assert_eq!(t, "word word word word");
    }
}
