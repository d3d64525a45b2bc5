//! Authenticated GET client for the marketplace REST API.
//!
//! All request paths come from the `OpenAPI` document, so the client only ever keeps the
//! `scheme://host[:port]` part of whatever base URL it is given.

use crate::query::QueryParams;
use crate::safety::{OutboundPolicy, sanitize_reqwest_error};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const BEARER_PREFIX: &str = "Bearer ";

/// Default per-request timeout for upstream queries.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HttpToolsError {
    #[error("config error: {0}")]
    Config(String),
    /// Rejected by the outbound policy before any request was sent.
    #[error("{0}")]
    Blocked(String),
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("API returned {status} {reason} for url '{url}'")]
    Status {
        status: u16,
        reason: String,
        url: String,
        body: String,
    },
    #[error("invalid JSON in response from '{url}': {message}")]
    Decode { url: String, message: String },
}

impl HttpToolsError {
    /// HTTP status code when the upstream answered with a non-success status.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}

/// Reduce any URL to `scheme://host[:port]`.
///
/// Paths, queries and fragments are discarded: `https://api.x.com/public`, `https://api.x.com/v1`
/// and `https://api.x.com/` all become `https://api.x.com`.
///
/// # Errors
///
/// Returns an error if the input is not an absolute `http(s)` URL with a host.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| HttpToolsError::Config(format!("invalid base URL '{raw}': {e}")))?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(HttpToolsError::Config(format!(
            "invalid base URL '{raw}': unsupported scheme '{scheme}'"
        )));
    }
    let Some(host) = url.host_str() else {
        return Err(HttpToolsError::Config(format!(
            "invalid base URL '{raw}': missing host"
        )));
    };
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Build the `Authorization` header value for a caller-supplied token.
///
/// A token that already carries a `Bearer ` prefix (any case) is used as-is after trimming.
#[must_use]
pub fn bearer_header(token: &str) -> String {
    let token = token.trim();
    if strip_bearer(token).is_some() {
        token.to_string()
    } else {
        format!("{BEARER_PREFIX}{token}")
    }
}

/// Extract the token identifier from platform tokens shaped `idt:TKN-XXXX-XXXX:<secret>`.
#[must_use]
pub fn extract_user_id(token: &str) -> Option<String> {
    let token = token.trim();
    let value = strip_bearer(token).unwrap_or(token).trim();
    let rest = value.strip_prefix("idt:")?;
    let mut parts = rest.split(':');
    let id = parts.next()?;
    // A secret segment must follow the identifier.
    parts.next()?;
    id.starts_with("TKN-").then(|| id.to_string())
}

fn strip_bearer(token: &str) -> Option<&str> {
    let prefix = token.get(..BEARER_PREFIX.len())?;
    if prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        token.get(BEARER_PREFIX.len()..)
    } else {
        None
    }
}

/// The single operation the query engine needs from the upstream API.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Normalized `scheme://host[:port]` this client talks to.
    fn base_url(&self) -> &str;

    /// Issue a GET for `path` with the given query and decode the JSON body.
    async fn get_json(&self, path: &str, query: &QueryParams) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
    user_id: Option<String>,
    timeout: Duration,
    policy: OutboundPolicy,
}

impl ApiClient {
    /// Create a client for `base_url` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` cannot be normalized.
    pub fn new(http: reqwest::Client, base_url: &str, token: &str) -> Result<Self> {
        let normalized = normalize_base_url(base_url)?;
        if normalized != base_url.trim() {
            debug!(from = %base_url, to = %normalized, "normalized API base URL");
        }
        let user_id = extract_user_id(token);
        Ok(Self {
            http,
            base_url: normalized,
            authorization: bearer_header(token),
            user_id,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            policy: OutboundPolicy::permissive(),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: OutboundPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    /// Full request URL for `path` and `query`, with the RQL expression as the literal query string.
    #[must_use]
    pub fn request_url(&self, path: &str, query: &QueryParams) -> String {
        match query.to_query_string() {
            Some(qs) => format!("{}{path}?{qs}", self.base_url),
            None => format!("{}{path}", self.base_url),
        }
    }
}

#[async_trait]
impl UpstreamApi for ApiClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str, query: &QueryParams) -> Result<Value> {
        let raw_url = self.request_url(path, query);
        let url = Url::parse(&raw_url)
            .map_err(|e| HttpToolsError::Config(format!("invalid request URL '{raw_url}': {e}")))?;
        self.policy.check_url(&url).await?;

        info!(
            user = self.user_id.as_deref().unwrap_or("unknown"),
            base_url = %self.base_url,
            path = %path,
            params = %query,
            "marketplace API request"
        );

        let resp = self
            .http
            .get(url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(HttpToolsError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                url: url.to_string(),
                body: text,
            });
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| HttpToolsError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        log_response_summary(status.as_u16(), &body);
        Ok(body)
    }
}

fn log_response_summary(status: u16, body: &Value) {
    let items = match body.get("data") {
        Some(Value::Array(items)) => Some(items.len()),
        Some(Value::Object(_)) => Some(1),
        _ => body.as_array().map(Vec::len),
    };
    let pagination = body.pointer("/$meta/pagination");
    let omitted: Vec<&str> = body
        .pointer("/$meta/omitted")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    info!(
        status,
        items = ?items,
        offset = ?pagination.and_then(|p| p.get("offset")),
        limit = ?pagination.and_then(|p| p.get("limit")),
        total = ?pagination.and_then(|p| p.get("total")),
        "marketplace API response"
    );
    if !omitted.is_empty() {
        info!(
            omitted = %omitted.join(", "),
            "fields omitted by default (use select=+field to include)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::routing::any;
    use marketplace_test_support::MockServer;
    use serde_json::json;

    #[test]
    fn base_url_drops_paths() {
        for raw in [
            "https://api.x.com/public",
            "https://api.x.com/v1",
            "https://api.x.com/",
            "https://api.x.com",
        ] {
            assert_eq!(normalize_base_url(raw).expect(raw), "https://api.x.com");
        }
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8080/public/v1").expect("port"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn base_url_rejects_non_http() {
        assert!(normalize_base_url("ftp://api.x.com").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn bearer_prefix_added_once() {
        assert_eq!(bearer_header("abc"), "Bearer abc");
        assert_eq!(bearer_header("Bearer abc"), "Bearer abc");
        assert_eq!(bearer_header("  bearer abc  "), "bearer abc");
        assert_eq!(bearer_header(" abc "), "Bearer abc");
    }

    #[test]
    fn user_id_from_platform_token() {
        assert_eq!(
            extract_user_id("idt:TKN-1234-5678:secret").as_deref(),
            Some("TKN-1234-5678")
        );
        assert_eq!(
            extract_user_id("Bearer idt:TKN-1234-5678:secret").as_deref(),
            Some("TKN-1234-5678")
        );
        assert_eq!(extract_user_id("idt:USR-1:secret"), None);
        assert_eq!(extract_user_id("idt:TKN-1"), None);
        assert_eq!(extract_user_id("plain-token"), None);
    }

    #[test]
    fn request_url_uses_rql_as_query_string() {
        let client = ApiClient::new(reqwest::Client::new(), "https://api.x.com/public", "t")
            .expect("client");
        let mut q = QueryParams::new().with_rql("eq(status,Failed)");
        q.push("limit", 10);
        let url = client.request_url("/public/v1/commerce/orders", &q);
        assert_eq!(
            url,
            "https://api.x.com/public/v1/commerce/orders?eq(status,Failed)&limit=10"
        );
        assert!(!url.contains("rql="));
    }

    async fn echo(uri: Uri, headers: HeaderMap) -> (StatusCode, String) {
        let body = json!({
            "path": uri.path(),
            "query": uri.query(),
            "authorization": headers.get("authorization").and_then(|v| v.to_str().ok()),
            "data": [{ "id": "ORD-1" }],
            "$meta": { "pagination": { "offset": 0, "limit": 10, "total": 1 } }
        });
        (StatusCode::OK, body.to_string())
    }

    #[tokio::test]
    async fn get_json_sends_literal_rql_and_bearer() {
        let server = MockServer::start(Router::new().route("/{*path}", any(echo)))
            .await
            .expect("mock server");
        let client =
            ApiClient::new(reqwest::Client::new(), &server.base_url, "tok").expect("client");

        let mut q = QueryParams::new().with_rql("eq(status,Failed)");
        q.push("limit", 10);
        let body = client
            .get_json("/public/v1/commerce/orders", &q)
            .await
            .expect("get");

        assert_eq!(body["path"], "/public/v1/commerce/orders");
        assert_eq!(body["query"], "eq(status,Failed)&limit=10");
        assert_eq!(body["authorization"], "Bearer tok");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn non_success_status_keeps_body() {
        async fn bad_request() -> (StatusCode, &'static str) {
            (StatusCode::BAD_REQUEST, r#"{"errors":{"rql":["nope"]}}"#)
        }
        let server = MockServer::start(Router::new().route("/{*path}", any(bad_request)))
            .await
            .expect("mock server");
        let client =
            ApiClient::new(reqwest::Client::new(), &server.base_url, "tok").expect("client");

        let err = client
            .get_json("/public/v1/catalog/products", &QueryParams::new())
            .await
            .expect_err("400");
        match err {
            HttpToolsError::Status {
                status, body, url, ..
            } => {
                assert_eq!(status, 400);
                assert!(body.contains("nope"));
                assert!(url.ends_with("/public/v1/catalog/products"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.shutdown().await;
    }
}
