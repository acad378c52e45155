//! Groups events read from the store into wire requests
//!
//! Batching honors two limits at once: the configured batch cardinality
//! (see [`BufferOption`]) and the byte limit for the HTTP method in use.
//! An event too large to ever fit is emitted alone and flagged oversize so
//! the emission loop can drop it instead of retrying forever.

use crate::config::{BufferOption, HttpMethod};
use crate::payload::Payload;
use crate::request::{EmitterRequest, POST_ENVELOPE_BYTES};
use crate::store::EmittableEvent;

/// Limits and request decorations applied while packing a page of events
#[derive(Debug, Clone)]
pub struct BatchLimits {
    /// HTTP method the requests will be sent with
    pub method: HttpMethod,
    /// Batch cardinality target for POST
    pub buffer_option: BufferOption,
    /// Byte limit for GET requests
    pub byte_limit_get: usize,
    /// Byte limit for POST requests
    pub byte_limit_post: usize,
    /// User-Agent override stamped onto every request
    pub custom_user_agent: Option<String>,
    /// Anonymisation flag stamped onto every request
    pub server_anonymisation: bool,
}

/// Pack a page of events into wire requests
///
/// Events arrive in store order and leave in store order: the
/// concatenation of all produced requests' ids equals the input id
/// sequence, each id exactly once. An empty input yields no requests.
pub fn build_requests(events: Vec<EmittableEvent>, limits: &BatchLimits) -> Vec<EmitterRequest> {
    let requests = match limits.method {
        HttpMethod::Get => build_get_requests(events, limits),
        HttpMethod::Post => build_post_requests(events, limits),
    };
    requests
        .into_iter()
        .map(|request| {
            request
                .with_user_agent(limits.custom_user_agent.clone())
                .with_anonymisation(limits.server_anonymisation)
        })
        .collect()
}

/// Under GET every event becomes its own request
fn build_get_requests(events: Vec<EmittableEvent>, limits: &BatchLimits) -> Vec<EmitterRequest> {
    events
        .into_iter()
        .map(|event| {
            let oversize = event.payload.byte_size() > limits.byte_limit_get;
            EmitterRequest::single(event.id, event.payload, oversize)
        })
        .collect()
}

/// Under POST events are bundled in order up to the cardinality target,
/// splitting whenever the running byte total would exceed the limit
fn build_post_requests(events: Vec<EmittableEvent>, limits: &BatchLimits) -> Vec<EmitterRequest> {
    let cardinality = limits.buffer_option.cardinality();
    let byte_limit = limits.byte_limit_post;

    let mut requests = Vec::new();
    let mut batch: Vec<(u64, Payload)> = Vec::new();
    let mut batch_bytes = 0usize;

    for event in events {
        let size = event.payload.byte_size();

        // Too large to ever fit: ship alone, flagged, preserving order
        // relative to the batch that was open before it.
        if size + POST_ENVELOPE_BYTES > byte_limit {
            if !batch.is_empty() {
                requests.push(EmitterRequest::bundled(std::mem::take(&mut batch)));
                batch_bytes = 0;
            }
            requests.push(EmitterRequest::single(event.id, event.payload, true));
            continue;
        }

        let would_overflow = batch_bytes + size + POST_ENVELOPE_BYTES > byte_limit;
        if !batch.is_empty() && (would_overflow || batch.len() >= cardinality) {
            requests.push(EmitterRequest::bundled(std::mem::take(&mut batch)));
            batch_bytes = 0;
        }

        batch_bytes += size;
        batch.push((event.id, event.payload));
    }

    if !batch.is_empty() {
        requests.push(EmitterRequest::bundled(batch));
    }

    requests
}
