//! Wire request and result types
//!
//! An [`EmitterRequest`] is built fresh for every delivery attempt and
//! discarded once the attempt resolves; it is never persisted. The
//! [`RequestResult`] it produces is consumed exactly once by the emission
//! loop to decide which event ids are removed from the store.

use crate::payload::Payload;
use serde_json::Value;

/// Fixed path for GET delivery
pub const GET_PATH: &str = "i";
/// Fixed vendor/version path for POST delivery
pub const POST_PATH: &str = "com.snowplowanalytics.snowplow/tp2";
/// Schema URI of the POST body envelope
pub const PAYLOAD_DATA_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/payload_data/jsonschema/1-0-4";
/// Content type of POST bodies
pub const POST_CONTENT_TYPE: &str = "application/json; charset=utf-8";
/// Header asking the collector not to attach server-side identifiers
pub const ANONYMISATION_HEADER: &str = "SP-Anonymous";
/// Value of [`ANONYMISATION_HEADER`]
pub const ANONYMISATION_VALUE: &str = "*";

/// Fixed byte overhead of the POST body envelope
/// (`{"schema":"...","data":[]}` around the payloads)
pub const POST_ENVELOPE_BYTES: usize = 88;

/// Sentinel status recorded when a request never produced an HTTP
/// response (transport error or timeout). Classified as retriable.
pub const NO_RESPONSE_STATUS: u16 = 0;

/// One wire request: either a bundle of payloads or a single oversize
/// event wrapped alone
#[derive(Debug, Clone)]
pub struct EmitterRequest {
    /// Payloads carried by this request, in store order
    pub payloads: Vec<Payload>,
    /// Store ids covered by this request
    pub event_ids: Vec<u64>,
    /// Whether the request exceeds the byte limit for its method and can
    /// never be delivered
    pub oversize: bool,
    /// Override for the User-Agent header
    pub custom_user_agent: Option<String>,
    /// Whether to ask the collector for server-side anonymisation
    pub server_anonymisation: bool,
}

impl EmitterRequest {
    /// Wrap a single event, optionally flagged oversize
    pub fn single(id: u64, payload: Payload, oversize: bool) -> Self {
        Self {
            payloads: vec![payload],
            event_ids: vec![id],
            oversize,
            custom_user_agent: None,
            server_anonymisation: false,
        }
    }

    /// Bundle several events into one request
    pub fn bundled(events: Vec<(u64, Payload)>) -> Self {
        let mut payloads = Vec::with_capacity(events.len());
        let mut event_ids = Vec::with_capacity(events.len());
        for (id, payload) in events {
            event_ids.push(id);
            payloads.push(payload);
        }
        Self {
            payloads,
            event_ids,
            oversize: false,
            custom_user_agent: None,
            server_anonymisation: false,
        }
    }

    /// Set the User-Agent override
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.custom_user_agent = user_agent;
        self
    }

    /// Set the anonymisation flag
    pub fn with_anonymisation(mut self, enabled: bool) -> Self {
        self.server_anonymisation = enabled;
        self
    }

    /// Build the POST body envelope: `{"schema": ..., "data": [...]}`
    pub fn post_envelope(&self) -> Value {
        serde_json::json!({
            "schema": PAYLOAD_DATA_SCHEMA,
            "data": self.payloads,
        })
    }

    /// Query parameters for GET delivery, taken from the first (and only)
    /// payload in insertion order
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Some(payload) = self.payloads.first() else {
            return Vec::new();
        };
        payload
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

/// Outcome of one wire request, consumed once by the emission loop
#[derive(Debug, Clone)]
pub struct RequestResult {
    /// HTTP status code, or [`NO_RESPONSE_STATUS`] when no response
    /// arrived
    pub status_code: u16,
    /// Whether the originating request was flagged oversize
    pub oversize: bool,
    /// Store ids the request covered
    pub event_ids: Vec<u64>,
}

impl RequestResult {
    /// Create a result for the given status and covered ids
    pub fn new(status_code: u16, oversize: bool, event_ids: Vec<u64>) -> Self {
        Self {
            status_code,
            oversize,
            event_ids,
        }
    }

    /// Whether the request was accepted (status in 200..=299)
    pub fn is_successful(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }
}
