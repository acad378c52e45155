//! Network connection contract and the reqwest-backed implementation
//!
//! The [`NetworkConnection`] trait is the seam between the emission loop
//! and the wire: the loop hands it fully built requests and consumes one
//! [`RequestResult`] per request. [`HttpConnection`] is the production
//! implementation; tests and exotic transports provide their own.

use crate::config::HttpMethod;
use crate::error::Result;
use crate::request::{
    EmitterRequest, RequestResult, ANONYMISATION_HEADER, ANONYMISATION_VALUE, GET_PATH,
    NO_RESPONSE_STATUS, POST_CONTENT_TYPE, POST_PATH,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Sends prepared requests to a collector
///
/// One result is produced per request. Implementations never panic on
/// transport failure: a request that produced no HTTP response resolves
/// to [`NO_RESPONSE_STATUS`] so the loop can classify it as retriable.
#[async_trait]
pub trait NetworkConnection: Send + Sync {
    /// HTTP method this connection delivers with
    fn http_method(&self) -> HttpMethod;

    /// Destination URI this connection is configured for
    fn uri(&self) -> String;

    /// Send one request and report its outcome
    async fn send(&self, request: EmitterRequest) -> RequestResult;

    /// Whether the destination is currently reachable
    ///
    /// The emission loop checks this before each page; an unreachable
    /// destination parks the loop with all events left queued.
    async fn health(&self) -> bool {
        true
    }
}

/// Backstop request timeout; the emitter applies its own, tighter one
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Collector connection over HTTP via `reqwest`
///
/// # Example
///
/// ```ignore
/// let connection = HttpConnection::new("https://collector.example.com", HttpMethod::Post)?
///     .header("Authorization", "Bearer token123");
/// ```
pub struct HttpConnection {
    client: Client,
    method: HttpMethod,
    get_uri: Url,
    post_uri: Url,
    headers: HashMap<String, String>,
}

impl HttpConnection {
    /// Create a connection to the given collector base URL
    ///
    /// # Errors
    /// Returns an error if the endpoint does not parse or the HTTP client
    /// cannot be created.
    pub fn new(endpoint: impl AsRef<str>, method: HttpMethod) -> Result<Self> {
        let base = Url::parse(endpoint.as_ref())?;
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            method,
            get_uri: destination(&base, GET_PATH),
            post_uri: destination(&base, POST_PATH),
            headers: HashMap::new(),
        })
    }

    /// Add a custom header to all requests
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn decorate(
        &self,
        mut builder: reqwest::RequestBuilder,
        request: &EmitterRequest,
    ) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        if let Some(user_agent) = &request.custom_user_agent {
            builder = builder.header(USER_AGENT, user_agent);
        }
        if request.server_anonymisation {
            builder = builder.header(ANONYMISATION_HEADER, ANONYMISATION_VALUE);
        }
        builder
    }

    async fn send_get(&self, request: &EmitterRequest) -> reqwest::Result<u16> {
        let builder = self
            .client
            .get(self.get_uri.clone())
            .query(&request.query_pairs());
        let response = self.decorate(builder, request).send().await?;
        Ok(response.status().as_u16())
    }

    async fn send_post(&self, request: &EmitterRequest) -> reqwest::Result<u16> {
        // The envelope is a plain JSON object; encoding it cannot fail.
        let body = serde_json::to_vec(&request.post_envelope()).unwrap_or_default();
        let builder = self
            .client
            .post(self.post_uri.clone())
            .header(CONTENT_TYPE, POST_CONTENT_TYPE)
            .body(Bytes::from(body));
        let response = self.decorate(builder, request).send().await?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl NetworkConnection for HttpConnection {
    fn http_method(&self) -> HttpMethod {
        self.method
    }

    fn uri(&self) -> String {
        match self.method {
            HttpMethod::Get => self.get_uri.to_string(),
            HttpMethod::Post => self.post_uri.to_string(),
        }
    }

    async fn send(&self, request: EmitterRequest) -> RequestResult {
        let oversize = request.oversize;
        let event_ids = request.event_ids.clone();

        let outcome = match self.method {
            HttpMethod::Get => self.send_get(&request).await,
            HttpMethod::Post => self.send_post(&request).await,
        };

        match outcome {
            Ok(status) => {
                debug!(status, count = event_ids.len(), uri = %self.uri(), "request sent");
                RequestResult::new(status, oversize, event_ids)
            }
            Err(e) => {
                error!(error = %e, uri = %self.uri(), "request failed without a response");
                RequestResult::new(NO_RESPONSE_STATUS, oversize, event_ids)
            }
        }
    }

    async fn health(&self) -> bool {
        // Any HTTP response (even 4xx) means the collector is reachable;
        // only transport errors indicate it is not.
        let uri = match self.method {
            HttpMethod::Get => self.get_uri.clone(),
            HttpMethod::Post => self.post_uri.clone(),
        };
        match self.client.head(uri).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "collector unreachable");
                false
            }
        }
    }
}

/// Resolve a delivery path against the collector base, keeping any path
/// prefix the base carries
fn destination(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{path}"));
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_paths() {
        let base = Url::parse("https://collector.example.com").unwrap();
        assert_eq!(
            destination(&base, GET_PATH).as_str(),
            "https://collector.example.com/i"
        );
        assert_eq!(
            destination(&base, POST_PATH).as_str(),
            "https://collector.example.com/com.snowplowanalytics.snowplow/tp2"
        );
    }

    #[test]
    fn test_destination_keeps_base_prefix() {
        let base = Url::parse("https://example.com/telemetry/").unwrap();
        assert_eq!(
            destination(&base, GET_PATH).as_str(),
            "https://example.com/telemetry/i"
        );
    }

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        assert!(HttpConnection::new("not a url", HttpMethod::Post).is_err());
    }

    #[test]
    fn test_uri_follows_method() {
        let get = HttpConnection::new("https://collector.example.com", HttpMethod::Get).unwrap();
        assert!(get.uri().ends_with("/i"));

        let post = HttpConnection::new("https://collector.example.com", HttpMethod::Post).unwrap();
        assert!(post.uri().ends_with("/tp2"));
    }
}
