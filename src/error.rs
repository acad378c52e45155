//! Error types for MAJAKKA

use thiserror::Error;

/// Result type alias for MAJAKKA operations
pub type Result<T> = std::result::Result<T, MajakkaError>;

/// Main error type for MAJAKKA
#[derive(Error, Debug)]
pub enum MajakkaError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Collector endpoint could not be parsed
    #[error("invalid collector endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
