//! HTTP seam to the datastore.
//!
//! The poll loop only needs two capabilities from the datastore: a
//! conditional GET and a PATCH. They sit behind the [`Upstream`] trait so the
//! loop can be driven by something other than a live HTTP server.

use async_trait::async_trait;
use avb_bridge_protocol::{update_form, ChangeToken, CHANGE_TOKEN_HEADER, CONDITIONAL_HEADER};
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::BridgeError;

/// A datastore response to a conditional GET.
#[derive(Debug, Clone)]
pub struct PollResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `ETag` header, if present.
    pub change_token: Option<ChangeToken>,
    /// Raw response body.
    pub body: Bytes,
}

impl PollResponse {
    /// A 200 response with a body.
    #[must_use]
    pub fn modified(token: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            change_token: Some(ChangeToken::new(token)),
            body: body.into(),
        }
    }

    /// A 304 response.
    #[must_use]
    pub fn not_modified(token: impl Into<String>) -> Self {
        Self {
            status: 304,
            change_token: Some(ChangeToken::new(token)),
            body: Bytes::new(),
        }
    }

    /// Whether the datastore reported no change.
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The datastore operations a bridge depends on.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Base address of the datastore service, e.g. `http://localhost:8888`.
    fn base_url(&self) -> &str;

    /// Issue a conditional GET asserting `token`.
    ///
    /// May stay pending for as long as the datastore holds the request.
    async fn poll(&self, url: &str, token: &ChangeToken) -> Result<PollResponse, BridgeError>;

    /// PATCH `update` to `url`, returning the HTTP status.
    async fn update(&self, url: &str, update: &Value) -> Result<u16, BridgeError>;
}

/// [`Upstream`] backed by a pooled reqwest client.
///
/// The poll GET has no client-side timeout; the datastore decides how long
/// a long-poll stays open.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    base_url: String,
    client: reqwest::Client,
    update_timeout: Option<Duration>,
}

impl HttpUpstream {
    /// Create an upstream for the datastore at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            update_timeout: None,
        })
    }

    /// Bound the time an update PATCH may take.
    #[must_use]
    pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn poll(&self, url: &str, token: &ChangeToken) -> Result<PollResponse, BridgeError> {
        let response = self
            .client
            .get(url)
            .header(CONDITIONAL_HEADER, token.as_str())
            .send()
            .await?;

        let status = response.status().as_u16();
        let change_token = response
            .headers()
            .get(CHANGE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ChangeToken::new);
        let body = response.bytes().await?;

        debug!(status, token = ?change_token, bytes = body.len(), "Poll response");

        Ok(PollResponse {
            status,
            change_token,
            body,
        })
    }

    async fn update(&self, url: &str, update: &Value) -> Result<u16, BridgeError> {
        let form = update_form(update)?;
        let mut request = self.client.patch(url).form(&form);
        if let Some(timeout) = self.update_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_poll_sends_conditional_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datastore/foo"))
            .and(query_param("client", "42"))
            .and(header("If-None-Match", "-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "7")
                    .set_body_json(json!({"a": 1})),
            )
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(server.uri()).unwrap();
        let url = format!("{}/datastore/foo?client=42", server.uri());
        let response = upstream.poll(&url, &ChangeToken::initial()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.change_token, Some(ChangeToken::new("7")));
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_poll_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "7"))
            .respond_with(ResponseTemplate::new(304).insert_header("ETag", "7"))
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(server.uri()).unwrap();
        let url = format!("{}/datastore?client=1", server.uri());
        let response = upstream.poll(&url, &ChangeToken::new("7")).await.unwrap();

        assert!(response.is_not_modified());
        assert_eq!(response.change_token, Some(ChangeToken::new("7")));
    }

    #[tokio::test]
    async fn test_update_sends_form_field() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/datastore/foo"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(server.uri()).unwrap();
        let url = format!("{}/datastore/foo?client=42", server.uri());
        let status = upstream.update(&url, &json!({"k": "v"})).await.unwrap();
        assert_eq!(status, 200);

        let requests = server.received_requests().await.unwrap();
        let (_, body) = url::form_urlencoded::parse(&requests[0].body)
            .find(|(k, _)| k == "json")
            .unwrap();
        let sent: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(sent, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_update_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(server.uri()).unwrap();
        let url = format!("{}/datastore?client=1", server.uri());
        assert_eq!(upstream.update(&url, &json!({})).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Nothing listens on port 9 of localhost
        let upstream = HttpUpstream::new("http://127.0.0.1:9").unwrap();
        let result = upstream
            .poll("http://127.0.0.1:9/datastore?client=1", &ChangeToken::initial())
            .await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let upstream = HttpUpstream::new("http://host:8888/").unwrap();
        assert_eq!(upstream.base_url(), "http://host:8888");
    }
}
