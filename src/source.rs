use async_trait::async_trait;

use crate::config::Config;
use crate::models::{IssueRecord, ListingPage, StatusPolicy};
use crate::network::{FetchError, HttpClient};
use crate::parser;

/// Where listing pages and issue details come from.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// URL of listing page `page` (1-based).
    fn listing_url(&self, page: u32) -> String;

    async fn fetch_listing(&self, page_url: &str) -> Result<ListingPage, FetchError>;

    async fn fetch_issue(&self, url: &str) -> Result<IssueRecord, FetchError>;
}

/// The live site over HTTP.
pub struct JarokeloSource {
    client: HttpClient,
    base_url: String,
    policy: StatusPolicy,
}

impl JarokeloSource {
    pub fn new(client: HttpClient, policy: StatusPolicy) -> Self {
        Self::with_base_url(client, Config::BASE_URL, policy)
    }

    pub fn with_base_url(client: HttpClient, base_url: impl Into<String>, policy: StatusPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            policy,
        }
    }
}

#[async_trait]
impl IssueSource for JarokeloSource {
    fn listing_url(&self, page: u32) -> String {
        if page <= 1 {
            self.base_url.clone()
        } else {
            format!("{}?page={}", self.base_url, page)
        }
    }

    async fn fetch_listing(&self, page_url: &str) -> Result<ListingPage, FetchError> {
        let response = self.client.fetch(page_url).await?;
        parser::parse_listing(&response.content, page_url)
    }

    async fn fetch_issue(&self, url: &str) -> Result<IssueRecord, FetchError> {
        let response = self.client.fetch(url).await?;
        parser::parse_issue(&response.content, url, &self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn source(base: &str) -> JarokeloSource {
        let client = HttpClient::new("TestBot/1.0", 5).unwrap();
        JarokeloSource::with_base_url(client, base, StatusPolicy::default())
    }

    #[test]
    fn test_listing_urls() {
        let src = source("https://jarokelo.hu/bejelentesek");
        assert_eq!(src.listing_url(1), "https://jarokelo.hu/bejelentesek");
        assert_eq!(src.listing_url(0), "https://jarokelo.hu/bejelentesek");
        assert_eq!(src.listing_url(4), "https://jarokelo.hu/bejelentesek?page=4");
    }

    #[tokio::test]
    async fn test_fetch_listing_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let body = r#"<article class="card"><a class="card__media__bg" href="/bejelentesek/1"></a><span class="badge">ELFOGADVA</span></article>"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        let base = format!("http://{}/bejelentesek", addr);
        let src = source(&base);
        let page = src.fetch_listing(&src.listing_url(1)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].url, format!("http://{}/bejelentesek/1", addr));
        assert_eq!(page.items[0].status.as_deref(), Some("ELFOGADVA"));
        assert_eq!(page.next_page, None);
    }
}
