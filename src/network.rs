use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::backoff::ExponentialBackoff;
use crate::config::Config;
use crate::validate::ValidationError;

/// HTTP client for the listing and detail pages
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    user_agent: String,
    max_content_size: usize,
    max_retries: u32,
    backoff: ExponentialBackoff,
}

impl HttpClient {
    /// Create a client with the default content limit and retry policy
    pub fn new(user_agent: impl Into<String>, timeout_secs: u64) -> Result<Self, FetchError> {
        Self::with_content_limit(user_agent, timeout_secs, Config::MAX_CONTENT_SIZE)
    }

    pub fn with_content_limit(
        user_agent: impl Into<String>,
        timeout_secs: u64,
        max_content_size: usize,
    ) -> Result<Self, FetchError> {
        let user_agent = user_agent.into();
        let client = reqwest::Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(Config::POOL_IDLE_TIMEOUT_SECS))
            .http1_only()
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::NetworkError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(timeout_secs),
            user_agent,
            max_content_size,
            max_retries: Config::MAX_RETRIES,
            backoff: ExponentialBackoff::for_requests(),
        })
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: ExponentialBackoff) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Fetch a URL and return the body.
    /// Transient errors are retried with exponential backoff.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    debug!(url, attempt, delay_ms = delay.as_millis() as u64, "Retrying after {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchResult, FetchError> {
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(url)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .header("Accept-Language", "hu-HU,hu;q=0.9,en;q=0.5")
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(Self::classify_error)?;

        let status_code = response.status().as_u16();
        if status_code >= 400 {
            return Err(FetchError::HttpStatus(status_code));
        }

        if let Some(length) = response.content_length()
            && length as usize > self.max_content_size
        {
            return Err(FetchError::ContentTooLarge(length as usize, self.max_content_size));
        }

        let content = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::BodyError(e.to_string()))?;

        if content.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(content.len(), self.max_content_size));
        }

        Ok(FetchResult {
            content,
            status_code,
        })
    }

    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        if error.is_builder() {
            return FetchError::InvalidUrl(error.to_string());
        }

        let error_msg = format!("{:?}", error).to_lowercase();
        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if error_msg.contains("dns") || error_msg.contains("name resolution") {
            return FetchError::DnsError;
        }
        if error_msg.contains("ssl") || error_msg.contains("tls") || error_msg.contains("certificate") {
            return FetchError::SslError;
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: String,
    pub status_code: u16,
}

/// Errors from fetching and extracting one page
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error - certificate or encryption issue")]
    SslError,

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("Could not extract {field} from {url}")]
    MissingField { url: String, field: &'static str },

    #[error("Resolved issue {url} has no resolution date on its page")]
    MissingResolutionDate { url: String },

    #[error("Encoding corruption on {url}: {detail}")]
    EncodingCorruption { url: String, detail: String },

    #[error("Invalid date on {url}: {detail}")]
    InvalidDate { url: String, detail: String },

    #[error("Extracted record for {url} is invalid: {detail}")]
    InvalidRecord { url: String, detail: String },
}

impl FetchError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::HttpStatus(code) => *code == 429 || *code >= 500,
            FetchError::NetworkError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("broken pipe")
                    || msg_lower.contains("connection reset")
                    || msg_lower.contains("connection closed")
                    || msg_lower.contains("temporary")
            }
            FetchError::InvalidUrl(_)
            | FetchError::ConnectionRefused
            | FetchError::DnsError
            | FetchError::SslError
            | FetchError::BodyError(_)
            | FetchError::ContentTooLarge(_, _)
            | FetchError::MissingField { .. }
            | FetchError::MissingResolutionDate { .. }
            | FetchError::EncodingCorruption { .. }
            | FetchError::InvalidDate { .. }
            | FetchError::InvalidRecord { .. } => false,
        }
    }

    /// Data-integrity failures that must stop the run instead of skipping the item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::MissingResolutionDate { .. }
                | FetchError::EncodingCorruption { .. }
                | FetchError::InvalidDate { .. }
                | FetchError::InvalidRecord { .. }
        )
    }

    /// Attach the page URL to a validation failure.
    pub fn from_validation(url: &str, error: ValidationError) -> Self {
        match error {
            ValidationError::InvalidDate { .. } => FetchError::InvalidDate {
                url: url.to_string(),
                detail: error.to_string(),
            },
            ValidationError::EncodingCorruption { .. } => FetchError::EncodingCorruption {
                url: url.to_string(),
                detail: error.to_string(),
            },
            other => FetchError::InvalidRecord {
                url: url.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/bejelentesek", addr)
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = HttpClient::new("TestBot/1.0", 30).unwrap();
        let result = client.fetch("not-a-url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let client = HttpClient::new("TestBot/1.0", 5).unwrap();
        let result = client.fetch(&url).await.unwrap();
        assert_eq!(result.status_code, 200);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let client = HttpClient::new("TestBot/1.0", 5).unwrap();
        match client.fetch(&url).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("expected 404, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_content_limit() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n0123456789",
        )
        .await;
        let client = HttpClient::with_content_limit("TestBot/1.0", 5, 4).unwrap();
        assert!(matches!(client.fetch(&url).await, Err(FetchError::ContentTooLarge(10, 4))));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(FetchError::HttpStatus(429).is_retryable());
        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(FetchError::NetworkError("connection reset by peer".into()).is_retryable());
        assert!(!FetchError::DnsError.is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FetchError::MissingResolutionDate { url: "u".into() }.is_fatal());
        assert!(FetchError::InvalidDate { url: "u".into(), detail: "d".into() }.is_fatal());
        assert!(!FetchError::Timeout.is_fatal());
        assert!(!FetchError::MissingField { url: "u".into(), field: "date" }.is_fatal());
    }

    #[test]
    fn test_from_validation_keeps_fatal_kinds() {
        let err = ValidationError::InvalidDate {
            input: "x".into(),
            reason: "bad".into(),
        };
        assert!(FetchError::from_validation("https://u", err).is_fatal());
    }
}
