//! Pipeline knobs (result bound, timeouts, retry policy, endpoints).
//!
//! Everything is an explicit value passed into the pipeline; `from_env` only seeds it.

use crate::retry::RetryPolicy;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://lite.duckduckgo.com/lite/";
pub const DEFAULT_RESULTS: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_PAGE_BYTES: u64 = 5 * 1024 * 1024;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env(key).and_then(|s| s.parse::<T>().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upper bound on search links fetched (and labelled blocks emitted).
    pub results: usize,
    pub timeout: Duration,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    /// Body cap for webpage and search-result fetches.
    pub max_page_bytes: u64,
    pub user_agent: String,
    pub search_endpoint: String,
    /// `yt-dlp` executable used to enumerate caption tracks.
    pub ytdlp_bin: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            results: DEFAULT_RESULTS,
            timeout: DEFAULT_TIMEOUT,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_page_bytes: DEFAULT_MAX_PAGE_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            results: env_parse("CHATPIPE_RESULTS").unwrap_or(d.results),
            timeout: env_parse("CHATPIPE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.timeout),
            retry_limit: env_parse("CHATPIPE_RETRY_LIMIT").unwrap_or(d.retry_limit),
            retry_delay: env_parse("CHATPIPE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.retry_delay),
            max_page_bytes: env_parse("CHATPIPE_MAX_PAGE_BYTES").unwrap_or(d.max_page_bytes),
            user_agent: d.user_agent,
            search_endpoint: env("CHATPIPE_SEARCH_ENDPOINT").unwrap_or(d.search_endpoint),
            ytdlp_bin: env("CHATPIPE_YTDLP").unwrap_or(d.ytdlp_bin),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_limit: self.retry_limit,
            delay: self.retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    #[test]
    fn defaults_match_documented_policy() {
        let c = PipelineConfig::default();
        assert_eq!(c.results, 3);
        assert_eq!(c.timeout, Duration::from_secs(10));
        assert_eq!(c.retry_limit, 3);
        assert_eq!(c.retry_delay, Duration::from_millis(500));
        assert_eq!(c.max_page_bytes, 5 * 1024 * 1024);
        assert_eq!(c.search_endpoint, "https://lite.duckduckgo.com/lite/");
    }

    #[test]
    fn env_overrides_and_blank_values_are_ignored() {
        let _g1 = EnvGuard::set("CHATPIPE_RESULTS", "5");
        let _g2 = EnvGuard::set("CHATPIPE_SEARCH_ENDPOINT", "   ");
        let _g3 = EnvGuard::set("CHATPIPE_RETRY_DELAY_MS", "not-a-number");
        let _g4 = EnvGuard::set("CHATPIPE_MAX_PAGE_BYTES", "65536");
        let c = PipelineConfig::from_env();
        assert_eq!(c.results, 5);
        assert_eq!(c.max_page_bytes, 65536);
        assert_eq!(c.search_endpoint, DEFAULT_SEARCH_ENDPOINT);
        assert_eq!(c.retry_delay, DEFAULT_RETRY_DELAY);
    }
}
