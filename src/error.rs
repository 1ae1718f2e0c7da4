//! Error taxonomy for the fetch and rewrite paths.
//!
//! Both stages report tagged variants so the batch loop can accumulate
//! them as strings without any exception-like control flow crossing the
//! batch boundary. Store and assembly errors stay on `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid_url: {0}")]
    InvalidUrl(String),

    #[error("timeout after {0} attempts")]
    Timeout(u32),

    #[error("dns_failure: {0}")]
    Dns(String),

    #[error("connection_refused: {0}")]
    ConnectionRefused(String),

    #[error("http_client_error: status {0}")]
    HttpClient(u16),

    #[error("http_server_error: status {0}")]
    HttpServer(u16),

    #[error("parse_error: {0}")]
    Parse(String),
}

impl FetchError {
    /// 5xx and transport failures are retried inside the fetcher; 4xx,
    /// bad URLs and parse failures are terminal on first sight.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_)
                | FetchError::Dns(_)
                | FetchError::ConnectionRefused(_)
                | FetchError::HttpServer(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) => "invalid_url",
            FetchError::Timeout(_) => "timeout",
            FetchError::Dns(_) => "dns_failure",
            FetchError::ConnectionRefused(_) => "connection_refused",
            FetchError::HttpClient(_) => "http_client_error",
            FetchError::HttpServer(_) => "http_server_error",
            FetchError::Parse(_) => "parse_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("insufficient_sources: brief cites no sources")]
    InsufficientSources,

    #[error("missing_primary_source")]
    MissingPrimarySource,

    #[error("word_count_out_of_band: {words} outside [{min}, {max}]")]
    WordCountOutOfBand {
        words: usize,
        min: usize,
        max: usize,
    },

    #[error("llm_unavailable: {0}")]
    LlmUnavailable(String),

    #[error("parse_error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_follows_taxonomy() {
        assert!(FetchError::HttpServer(503).is_retriable());
        assert!(FetchError::Timeout(3).is_retriable());
        assert!(!FetchError::HttpClient(404).is_retriable());
        assert!(!FetchError::InvalidUrl("x".into()).is_retriable());
        assert!(!FetchError::Parse("bad xml".into()).is_retriable());
    }

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(FetchError::Dns("no host".into()).kind(), "dns_failure");
        assert_eq!(FetchError::HttpClient(404).kind(), "http_client_error");
    }
}
