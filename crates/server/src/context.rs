//! Per-call caller credentials.
//!
//! STDIO mode builds one context from configuration. HTTP mode builds one per request from the
//! `X-MPT-Authorization` and `X-MPT-Endpoint` headers. The context is passed down explicitly.

use axum::http::HeaderMap;
use marketplace_http_tools::client::{extract_user_id, normalize_base_url};
use serde_json::{Value, json};
use std::fmt;

pub const AUTHORIZATION_HEADER: &str = "x-mpt-authorization";
pub const ENDPOINT_HEADER: &str = "x-mpt-endpoint";

const MISSING_TOKEN: &str = "Missing X-MPT-Authorization header. Please provide your API token in the X-MPT-Authorization header.";
pub const TOKEN_HINT: &str = "Provide X-MPT-Authorization header with your API token";

/// Why credentials could not be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    MissingToken,
    InvalidEndpoint { endpoint: String, message: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => f.write_str(MISSING_TOKEN),
            Self::InvalidEndpoint { endpoint, message } => {
                write!(f, "Invalid API endpoint '{endpoint}': {message}")
            }
        }
    }
}

impl CredentialError {
    /// Tool payload for this error.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::MissingToken => json!({ "error": self.to_string(), "hint": TOKEN_HINT }),
            Self::InvalidEndpoint { .. } => json!({
                "error": self.to_string(),
                "hint": "X-MPT-Endpoint must be an absolute http(s) URL such as https://api.platform.softwareone.com",
            }),
        }
    }
}

/// Strip a trailing `/` and a trailing `/public`, then reduce to `scheme://host[:port]`.
///
/// # Errors
///
/// Returns the normalization error message when the endpoint is not an http(s) URL.
pub fn normalize_endpoint(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/public").unwrap_or(trimmed);
    normalize_base_url(trimmed).map_err(|e| e.to_string())
}

#[derive(Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub token: String,
    /// Normalized `scheme://host[:port]`.
    pub endpoint: String,
    pub user_id: Option<String>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl RequestContext {
    /// # Errors
    ///
    /// Fails on a blank token or an endpoint that is not an http(s) URL.
    pub fn new(token: &str, endpoint: &str) -> Result<Self, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::MissingToken);
        }
        let endpoint =
            normalize_endpoint(endpoint).map_err(|message| CredentialError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message,
            })?;
        Ok(Self {
            token: token.to_string(),
            endpoint,
            user_id: extract_user_id(token),
        })
    }

    /// Credentials from HTTP request headers; the endpoint defaults to `default_endpoint`.
    ///
    /// # Errors
    ///
    /// Fails when the authorization header is absent or blank, or the endpoint is invalid.
    pub fn from_headers(headers: &HeaderMap, default_endpoint: &str) -> Result<Self, CredentialError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let token = header(AUTHORIZATION_HEADER).ok_or(CredentialError::MissingToken)?;
        let endpoint = header(ENDPOINT_HEADER).unwrap_or(default_endpoint);
        Self::new(token, endpoint)
    }
}
