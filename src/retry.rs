//! Retry classification for request results
//!
//! A pure decision function: no clocks, no counters, no side effects. The
//! emission loop feeds it every [`RequestResult`] and removes from the
//! store exactly those ids whose result it classifies as resolved.

use crate::request::RequestResult;
use std::collections::HashMap;

/// Status codes that will not succeed on resend: the request itself is
/// wrong, not the moment it was sent
pub const NON_RETRIABLE_STATUSES: [u16; 5] = [400, 401, 403, 410, 422];

/// Decide whether the events behind a failed result should stay queued
/// for a future attempt
///
/// Successful and oversize results are never retried (the former already
/// resolved, the latter can never fit). An explicit per-status rule in
/// `custom_rules` wins over the built-in classification. With
/// `retry_failed_requests` disabled nothing is retried at all.
pub fn should_retry(
    result: &RequestResult,
    custom_rules: &HashMap<u16, bool>,
    retry_failed_requests: bool,
) -> bool {
    if result.is_successful() {
        return false;
    }
    if result.oversize {
        return false;
    }
    if let Some(&rule) = custom_rules.get(&result.status_code) {
        return rule;
    }
    if !retry_failed_requests {
        return false;
    }
    !NON_RETRIABLE_STATUSES.contains(&result.status_code)
}

impl RequestResult {
    /// Classify this result; see [`should_retry`]
    pub fn should_retry(
        &self,
        custom_rules: &HashMap<u16, bool>,
        retry_failed_requests: bool,
    ) -> bool {
        should_retry(self, custom_rules, retry_failed_requests)
    }
}
