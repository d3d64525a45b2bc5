//! Error types for `marketplace-openapi-tools`.

use marketplace_http_tools::HttpToolsError;
use thiserror::Error;

/// Main error type for the registry and query engine.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid base URL, bad patterns).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    OpenApiSpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {message}")]
    OpenApiSpecParse { location: String, message: String },

    /// Both the endpoint-specific spec URL and the fallback failed.
    #[error("OpenAPI error: failed to fetch spec from both '{primary}' and fallback '{fallback}'")]
    OpenApiSpecUnavailable { primary: String, fallback: String },

    /// A bounded operation exceeded its deadline.
    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    /// Spec cache directory errors.
    #[error("Cache error at '{path}': {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream HTTP errors.
    #[error(transparent)]
    Http(#[from] HttpToolsError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
