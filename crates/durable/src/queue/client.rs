//! HTTP client for the remote work queue

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::item::{RawWorkItem, WorkItem};

/// Path of the "next unhandled request" endpoint, relative to the base URL
pub const NEXT_UNHANDLED_PATH: &str = "/request/next-unhandled";

/// Transient failure while fetching from the queue
///
/// None of these are escalated: the worker treats each one as "no work"
/// and backs off.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Queue unreachable or the request failed in transit
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Queue answered with something other than a work item
    #[error("no work available (status {status})")]
    NoWork { status: u16 },

    /// Queue answered 200 but the item could not be understood
    #[error("malformed work item: {0}")]
    Malformed(String),
}

/// Remote source of work items
#[async_trait]
pub trait WorkSource: Send + Sync + 'static {
    /// Fetch the next unhandled item, or `None` when nothing is available
    /// or the source is unreachable
    async fn fetch_next(&self) -> Option<WorkItem>;
}

/// Queue client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueClientConfig {
    /// Base URL of the queue service, e.g. `http://127.0.0.1:5000`
    pub base_url: String,

    /// Bearer credential sent with every request
    pub auth_key: String,

    /// Per-request timeout
    #[serde(with = "crate::serde_util::duration_millis")]
    pub request_timeout: Duration,
}

impl Default for QueueClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            auth_key: "default_key".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueClientConfig {
    /// Create a configuration for the given queue and credential
    pub fn new(base_url: impl Into<String>, auth_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_key: auth_key.into(),
            ..Default::default()
        }
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`WorkSource`] backed by the queue service's HTTP API
///
/// # Example
///
/// ```ignore
/// use mammoth_durable::queue::{HttpQueueClient, QueueClientConfig, WorkSource};
///
/// let client = HttpQueueClient::new(QueueClientConfig::new("http://127.0.0.1:5000", "secret"))?;
/// if let Some(item) = client.fetch_next().await {
///     println!("got request {}", item.id);
/// }
/// ```
pub struct HttpQueueClient {
    next_url: String,
    auth_key: String,
    http: reqwest::Client,
}

impl HttpQueueClient {
    /// Create a new client
    pub fn new(config: QueueClientConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            next_url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                NEXT_UNHANDLED_PATH
            ),
            auth_key: config.auth_key,
            http,
        })
    }

    /// Fetch the next item, reporting why nothing was returned
    #[instrument(skip(self), fields(url = %self.next_url))]
    pub async fn try_fetch_next(&self) -> Result<WorkItem, SourceError> {
        let response = self
            .http
            .get(&self.next_url)
            .bearer_auth(&self.auth_key)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SourceError::NoWork {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let raw: RawWorkItem =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        WorkItem::try_from(raw)
    }
}

#[async_trait]
impl WorkSource for HttpQueueClient {
    async fn fetch_next(&self) -> Option<WorkItem> {
        match self.try_fetch_next().await {
            Ok(item) => {
                debug!(request_id = item.id, "fetched work item");
                Some(item)
            }
            Err(SourceError::NoWork { status }) => {
                debug!(status, "no unhandled request available");
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch unhandled request");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpQueueClient {
        HttpQueueClient::new(
            QueueClientConfig::new(server.uri(), "secret")
                .with_request_timeout(Duration::from_secs(5)),
        )
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = QueueClientConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:5000");
        assert_eq!(config.auth_key, "default_key");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_fetches_item_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NEXT_UNHANDLED_PATH))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "timestamp": "2024-03-01T10:00:00Z",
                "source_ip": "127.0.0.1",
                "user_agent": "test",
                "method": "POST",
                "request_url": "/ingest",
                "request_raw": "{\"value\": 1}",
                "is_handled": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let item = client_for(&server).fetch_next().await.unwrap();
        assert_eq!(item.id, 42);
        assert_eq!(item.payload, json!({"value": 1}));
        assert_eq!(item.request_url.as_deref(), Some("/ingest"));
    }

    #[tokio::test]
    async fn test_trailing_slash_in_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NEXT_UNHANDLED_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1,
                "request_raw": "{}"
            })))
            .mount(&server)
            .await;

        let client =
            HttpQueueClient::new(QueueClientConfig::new(format!("{}/", server.uri()), "k"))
                .unwrap();
        assert_eq!(client.fetch_next().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_non_200_is_no_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NEXT_UNHANDLED_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.try_fetch_next().await,
            Err(SourceError::NoWork { status: 404 })
        ));
        assert!(client.fetch_next().await.is_none());
    }

    #[tokio::test]
    async fn test_wrong_credential_is_no_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NEXT_UNHANDLED_PATH))
            .and(header("Authorization", "Bearer other"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1,
                "request_raw": "{}"
            })))
            .mount(&server)
            .await;

        // Unmatched requests get wiremock's default 404
        assert!(client_for(&server).fetch_next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_no_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NEXT_UNHANDLED_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.try_fetch_next().await,
            Err(SourceError::Malformed(_))
        ));
        assert!(client.fetch_next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_no_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NEXT_UNHANDLED_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "request_raw": "not json at all"
            })))
            .mount(&server)
            .await;

        assert!(client_for(&server).fetch_next().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_queue_is_no_work() {
        let client = HttpQueueClient::new(
            QueueClientConfig::new("http://127.0.0.1:1", "secret")
                .with_request_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        assert!(matches!(
            client.try_fetch_next().await,
            Err(SourceError::Http(_))
        ));
        assert!(client.fetch_next().await.is_none());
    }
}
