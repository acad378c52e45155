//! Configuration for the MAJAKKA emitter

use crate::error::{MajakkaError, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use url::Url;

/// HTTP method used to reach the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// One event per request, payload as query parameters
    Get,
    /// Batched events as a JSON body
    Post,
}

/// Target batch cardinality for POST requests
///
/// GET requests always carry a single event regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOption {
    /// Send each event on its own
    Single,
    /// Bundle up to 10 events per request
    SmallGroup,
    /// Bundle up to 25 events per request
    LargeGroup,
}

impl BufferOption {
    /// Maximum number of payloads bundled into one request
    pub fn cardinality(self) -> usize {
        match self {
            BufferOption::Single => 1,
            BufferOption::SmallGroup => 10,
            BufferOption::LargeGroup => 25,
        }
    }
}

/// Default byte limit for GET requests
pub const DEFAULT_BYTE_LIMIT_GET: usize = 40_000;
/// Default byte limit for POST requests
pub const DEFAULT_BYTE_LIMIT_POST: usize = 40_000;
/// Default number of events read from the store per attempt
pub const DEFAULT_SEND_LIMIT: usize = 150;
/// Default number of consecutive empty-store observations before the loop
/// goes idle
pub const DEFAULT_EMPTY_LIMIT: u32 = 5;
/// Minimum worker pool size
pub const MIN_POOL_SIZE: usize = 2;

/// Emitter configuration
///
/// Built once and handed to [`Emitter::new`](crate::Emitter::new), which
/// validates it. Delivery tunables (byte limits, batch sizing, retry
/// rules) can additionally be adjusted while the emitter runs through
/// setters on the emitter itself.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Collector base URL, e.g. `https://collector.example.com`
    pub endpoint: String,

    /// HTTP method for delivery
    pub method: HttpMethod,

    /// Batch cardinality target for POST
    pub buffer_option: BufferOption,

    /// Maximum encoded size of a GET request payload
    pub byte_limit_get: usize,

    /// Maximum encoded size of a POST request body
    pub byte_limit_post: usize,

    /// Maximum events read from the store per attempt
    pub send_limit: usize,

    /// Consecutive empty-store observations before the loop goes idle
    pub empty_limit: u32,

    /// Sleep between empty-store checks
    pub tick: Duration,

    /// Hard per-request timeout; an unresolved request past this is
    /// treated as failed with no response
    pub request_timeout: Duration,

    /// Worker pool size (clamped to at least [`MIN_POOL_SIZE`])
    pub pool_size: usize,

    /// Whether failed requests are retried at all
    pub retry_failed_requests: bool,

    /// Per-status-code retry overrides, consulted before the built-in
    /// non-retriable set
    pub custom_retry_rules: HashMap<u16, bool>,

    /// Ask the collector not to attach server-side user identifiers
    pub server_anonymisation: bool,

    /// Override the User-Agent header on delivery requests
    pub custom_user_agent: Option<String>,
}

impl EmitterConfig {
    /// Create a configuration with defaults for the given collector
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: HttpMethod::Post,
            buffer_option: BufferOption::SmallGroup,
            byte_limit_get: DEFAULT_BYTE_LIMIT_GET,
            byte_limit_post: DEFAULT_BYTE_LIMIT_POST,
            send_limit: DEFAULT_SEND_LIMIT,
            empty_limit: DEFAULT_EMPTY_LIMIT,
            tick: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            pool_size: MIN_POOL_SIZE,
            retry_failed_requests: true,
            custom_retry_rules: HashMap::new(),
            server_anonymisation: false,
            custom_user_agent: None,
        }
    }

    /// Load configuration from `MAJAKKA_*` environment variables
    ///
    /// `MAJAKKA_ENDPOINT` is required; everything else falls back to the
    /// defaults of [`EmitterConfig::new`].
    pub fn from_env() -> Result<Self> {
        let endpoint = env::var("MAJAKKA_ENDPOINT")
            .map_err(|_| MajakkaError::Config("MAJAKKA_ENDPOINT is not set".into()))?;
        let mut config = EmitterConfig::new(endpoint);

        if let Ok(method) = env::var("MAJAKKA_METHOD") {
            config.method = match method.to_lowercase().as_str() {
                "get" => HttpMethod::Get,
                "post" => HttpMethod::Post,
                other => {
                    return Err(MajakkaError::Config(format!(
                        "invalid MAJAKKA_METHOD: {other} (expected 'get' or 'post')"
                    )))
                }
            };
        }

        if let Ok(limit) = env::var("MAJAKKA_BYTE_LIMIT_GET") {
            config.byte_limit_get = limit
                .parse()
                .map_err(|e| MajakkaError::Config(format!("invalid MAJAKKA_BYTE_LIMIT_GET: {e}")))?;
        }

        if let Ok(limit) = env::var("MAJAKKA_BYTE_LIMIT_POST") {
            config.byte_limit_post = limit.parse().map_err(|e| {
                MajakkaError::Config(format!("invalid MAJAKKA_BYTE_LIMIT_POST: {e}"))
            })?;
        }

        if let Ok(limit) = env::var("MAJAKKA_SEND_LIMIT") {
            config.send_limit = limit
                .parse()
                .map_err(|e| MajakkaError::Config(format!("invalid MAJAKKA_SEND_LIMIT: {e}")))?;
        }

        if let Ok(limit) = env::var("MAJAKKA_EMPTY_LIMIT") {
            config.empty_limit = limit
                .parse()
                .map_err(|e| MajakkaError::Config(format!("invalid MAJAKKA_EMPTY_LIMIT: {e}")))?;
        }

        if let Ok(millis) = env::var("MAJAKKA_TICK_MS") {
            let millis: u64 = millis
                .parse()
                .map_err(|e| MajakkaError::Config(format!("invalid MAJAKKA_TICK_MS: {e}")))?;
            config.tick = Duration::from_millis(millis);
        }

        if let Ok(millis) = env::var("MAJAKKA_REQUEST_TIMEOUT_MS") {
            let millis: u64 = millis.parse().map_err(|e| {
                MajakkaError::Config(format!("invalid MAJAKKA_REQUEST_TIMEOUT_MS: {e}"))
            })?;
            config.request_timeout = Duration::from_millis(millis);
        }

        if let Ok(size) = env::var("MAJAKKA_POOL_SIZE") {
            config.pool_size = size
                .parse()
                .map_err(|e| MajakkaError::Config(format!("invalid MAJAKKA_POOL_SIZE: {e}")))?;
        }

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Checks the endpoint parses as an http(s) URL and the numeric knobs
    /// are usable.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(MajakkaError::Config(format!(
                    "unsupported collector scheme: {other}"
                )))
            }
        }
        if self.byte_limit_get == 0 || self.byte_limit_post == 0 {
            return Err(MajakkaError::Config("byte limits must be non-zero".into()));
        }
        if self.send_limit == 0 {
            return Err(MajakkaError::Config("send_limit must be non-zero".into()));
        }
        if self.pool_size < MIN_POOL_SIZE {
            return Err(MajakkaError::Config(format!(
                "pool_size must be at least {MIN_POOL_SIZE}"
            )));
        }
        Ok(())
    }
}
