//! Google SERP client backed by the HasData scraping API.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::batch::{FailureKind, TaskFailure};
use crate::error::{ConfigError, SearchError};
use crate::realtor::query::ascii_only;

/// Default SERP endpoint.
pub const HASDATA_SERP_URL: &str = "https://api.hasdata.com/scrape/google/serp";

/// Environment variable holding the SERP API key.
pub const API_KEY_ENV: &str = "HAS_DATA_API_KEY";

const DEFAULT_LOCATION: &str = "United States";

/// Organic results requested per query unless configured otherwise.
pub const DEFAULT_NUM_RESULTS: u32 = 10;

/// Transport-level timeout; the per-attempt timeout of the batch is usually
/// shorter.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Client for the SERP API.
pub struct SerpClient {
    client: Client,
    api_key: String,
    base_url: String,
    location: String,
    num_results: u32,
}

impl SerpClient {
    /// Creates a client for the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredential` for an empty key and
    /// `ConfigError::HttpClient` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(API_KEY_ENV.to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: HASDATA_SERP_URL.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            num_results: DEFAULT_NUM_RESULTS,
        })
    }

    /// Points the client at another endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_num_results(mut self, num_results: u32) -> Self {
        self.num_results = num_results;
        self
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            "*".repeat(chars.len())
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }

    /// Full request URL for `query`. Non-ASCII characters are dropped.
    pub fn build_url(&self, query: &str) -> String {
        format!(
            "{}?q={}&location={}&deviceType=desktop&gl=us&hl=en&num={}",
            self.base_url,
            urlencoding::encode(&ascii_only(query)),
            urlencoding::encode(&self.location),
            self.num_results
        )
    }

    /// Runs one search and returns the raw response document.
    pub async fn search(&self, query: &str) -> Result<Value, SearchError> {
        let url = self.build_url(query);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout(e.to_string())
                } else {
                    SearchError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::RequestFailed(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let code = status.as_u16();
            let message = truncate(&body, 300);
            if code == 429 {
                return Err(SearchError::RateLimited(message));
            }
            return Err(SearchError::ApiError { code, message });
        }

        let document: Value =
            serde_json::from_str(&body).map_err(|e| SearchError::ParseError(e.to_string()))?;
        if !document.is_object() {
            return Err(SearchError::ParseError(
                "response is not a JSON object".to_string(),
            ));
        }
        Ok(document)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

impl From<SearchError> for TaskFailure {
    fn from(err: SearchError) -> Self {
        let kind = match &err {
            SearchError::Timeout(_) | SearchError::RequestFailed(_) => FailureKind::Transient,
            SearchError::RateLimited(_) => FailureKind::RateLimited,
            SearchError::ApiError { code, .. } => FailureKind::from_status(*code),
            SearchError::ParseError(_) => FailureKind::Permanent,
        };
        TaskFailure::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves a single canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/serp", addr)
    }

    #[test]
    fn test_new_rejects_empty_key() {
        assert!(matches!(
            SerpClient::new("  "),
            Err(ConfigError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_build_url() {
        let client = SerpClient::new("key").unwrap();
        let url = client.build_url(r#""José Roe" (email OR contact)"#);
        assert!(url.starts_with("https://api.hasdata.com/scrape/google/serp?q="));
        assert!(url.contains("q=%22Jos%20Roe%22%20%28email%20OR%20contact%29"));
        assert!(url.contains("location=United%20States"));
        assert!(url.ends_with("&deviceType=desktop&gl=us&hl=en&num=10"));
    }

    #[test]
    fn test_build_url_with_options() {
        let client = SerpClient::new("key")
            .unwrap()
            .with_location("Fargo, North Dakota")
            .with_num_results(20);
        let url = client.build_url("q");
        assert!(url.contains("location=Fargo%2C%20North%20Dakota"));
        assert!(url.ends_with("&num=20"));
    }

    #[test]
    fn test_api_key_masked() {
        let client = SerpClient::new("abcd1234efgh5678").unwrap();
        assert_eq!(client.api_key_masked(), "abcd...5678");
        let client = SerpClient::new("short").unwrap();
        assert_eq!(client.api_key_masked(), "*****");
        let client = SerpClient::new("ключ-0123-секрет").unwrap();
        assert_eq!(client.api_key_masked(), "ключ...крет");
    }

    #[test]
    fn test_error_classification() {
        let failure: TaskFailure = SearchError::RateLimited("slow down".into()).into();
        assert_eq!(failure.kind, FailureKind::RateLimited);

        let failure: TaskFailure = SearchError::ApiError {
            code: 502,
            message: "bad gateway".into(),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::Transient);

        let failure: TaskFailure = SearchError::ApiError {
            code: 401,
            message: "unauthorized".into(),
        }
        .into();
        assert_eq!(failure.kind, FailureKind::Permanent);

        let failure: TaskFailure = SearchError::Timeout("30s".into()).into();
        assert!(failure.is_retryable());

        let failure: TaskFailure = SearchError::ParseError("eof".into()).into();
        assert_eq!(failure.kind, FailureKind::Permanent);
    }

    #[tokio::test]
    async fn test_search_returns_document() {
        let url = serve_once("200 OK", r#"{"organicResults":[{"title":"Jane"}]}"#).await;
        let client = SerpClient::new("key").unwrap().with_base_url(url);

        let document = client.search("Jane").await.unwrap();
        assert_eq!(document["organicResults"][0]["title"], "Jane");
    }

    #[tokio::test]
    async fn test_search_maps_429() {
        let url = serve_once("429 Too Many Requests", r#"{"error":"quota"}"#).await;
        let client = SerpClient::new("key").unwrap().with_base_url(url);

        let err = client.search("Jane").await.unwrap_err();
        assert!(matches!(err, SearchError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_search_maps_server_error() {
        let url = serve_once("503 Service Unavailable", "busy").await;
        let client = SerpClient::new("key").unwrap().with_base_url(url);

        let err = client.search("Jane").await.unwrap_err();
        assert!(matches!(err, SearchError::ApiError { code: 503, .. }));
    }

    #[tokio::test]
    async fn test_search_rejects_non_json() {
        let url = serve_once("200 OK", "<html>oops</html>").await;
        let client = SerpClient::new("key").unwrap().with_base_url(url);

        let err = client.search("Jane").await.unwrap_err();
        assert!(matches!(err, SearchError::ParseError(_)));
    }
}
