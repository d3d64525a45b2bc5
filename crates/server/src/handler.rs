//! MCP `ServerHandler` exposing the marketplace tools and the `api://openapi.json` resource.

use crate::context::{CredentialError, RequestContext, TOKEN_HINT};
use crate::tools::{self, AuditFieldsArgs, ResourceArgs};
use crate::validator::{AcceptNonEmpty, TokenValidator};
use axum::http::HeaderMap;
use marketplace_http_tools::ApiClient;
use marketplace_http_tools::safety::OutboundPolicy;
use marketplace_openapi_tools::{
    AnalyticsSink, QueryRequest, RegistrySnapshot, RegistryStore, TracingSink,
    audit_fields_payload, execute_query, list_resources, quick_queries, resource_info,
    resource_schema,
};
use rmcp::model::{
    Annotated, CallToolRequestParams, CallToolResult, Content, Implementation, JsonObject,
    ListResourcesResult, ListToolsResult, PaginatedRequestParams, ProtocolVersion, RawResource,
    ReadResourceRequestParams, ReadResourceResult, ResourceContents, ServerCapabilities,
    ServerInfo,
};
use rmcp::service::RequestContext as McpContext;
use rmcp::{ErrorData, RoleServer, ServerHandler};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const OPENAPI_RESOURCE_URI: &str = "api://openapi.json";

const INSTRUCTIONS: &str = "Read-only access to the marketplace REST API.\n\
1) Call marketplace_resources to discover resource ids.\n\
2) Call marketplace_resource_schema(resource) to see fields before filtering.\n\
3) Query with marketplace_query(resource, rql, limit, select, order).\n\
Audit timestamps live under 'audit'; include 'audit' in select when filtering or sorting on them \
(see marketplace_audit_fields). marketplace_quick_queries lists ready-made examples.";

/// Where caller credentials come from.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// STDIO mode: one configured token and endpoint for every call.
    Fixed(RequestContext),
    /// HTTP mode: per-request headers, with a default endpoint.
    Headers { default_endpoint: String },
}

/// Tool output plus whether it represents an internal failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReply {
    pub body: Value,
    pub is_error: bool,
}

impl ToolReply {
    fn ok(body: Value) -> Self {
        Self {
            body,
            is_error: false,
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            body: json!({ "error": error.to_string(), "kind": "internal" }),
            is_error: true,
        }
    }

    fn into_result(self) -> CallToolResult {
        let text = serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| self.body.to_string());
        CallToolResult {
            content: vec![Content::text(text)],
            structured_content: None,
            is_error: Some(self.is_error),
            meta: None,
        }
    }
}

#[derive(Clone)]
pub struct MarketplaceServer {
    store: RegistryStore,
    http: reqwest::Client,
    credentials: Credentials,
    policy: OutboundPolicy,
    request_timeout: Duration,
    validator: Arc<dyn TokenValidator>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl MarketplaceServer {
    #[must_use]
    pub fn new(store: RegistryStore, http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            store,
            http,
            credentials,
            policy: OutboundPolicy::permissive(),
            request_timeout: Duration::from_secs(30),
            validator: Arc::new(AcceptNonEmpty),
            analytics: Arc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: OutboundPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    #[must_use]
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Establish and check the caller's credentials. `Err` carries the payload to return.
    async fn caller(&self, headers: Option<&HeaderMap>) -> Result<RequestContext, Value> {
        let ctx = match &self.credentials {
            Credentials::Fixed(ctx) => ctx.clone(),
            Credentials::Headers { default_endpoint } => headers
                .ok_or(CredentialError::MissingToken)
                .and_then(|h| RequestContext::from_headers(h, default_endpoint))
                .map_err(|e| e.to_payload())?,
        };

        let url = url::Url::parse(&ctx.endpoint).map_err(|e| {
            json!({ "error": format!("Invalid API endpoint: {e}"), "api_endpoint": ctx.endpoint })
        })?;
        if let Err(e) = self.policy.check_url(&url).await {
            warn!(endpoint = %ctx.endpoint, error = %e, "caller endpoint rejected");
            return Err(json!({ "error": e.to_string(), "api_endpoint": ctx.endpoint }));
        }

        let validation = self.validator.validate(&ctx.token, &ctx.endpoint).await;
        if !validation.ok {
            let reason = validation.error.unwrap_or_else(|| "unknown error".to_string());
            warn!(endpoint = %ctx.endpoint, reason = %reason, "token validation failed");
            return Err(json!({
                "error": format!("Token validation failed: {reason}. Please ensure your API token is valid and active."),
                "hint": TOKEN_HINT,
            }));
        }
        Ok(ctx)
    }

    async fn snapshot(&self, ctx: &RequestContext) -> Arc<RegistrySnapshot> {
        self.store.registry(&ctx.endpoint, false).await
    }

    /// Run one tool. Protocol-level failures (unknown tool, malformed arguments) are `Err`.
    ///
    /// # Errors
    ///
    /// Returns `invalid_params` for unknown tools and arguments that do not match the tool.
    pub async fn run_tool(
        &self,
        name: &str,
        args: Option<JsonObject>,
        headers: Option<&HeaderMap>,
    ) -> Result<ToolReply, ErrorData> {
        match name {
            tools::QUICK_QUERIES => Ok(ToolReply::ok(quick_queries())),
            tools::QUERY => {
                let req: QueryRequest = tools::parse_args(name, args)?;
                Ok(self.query(&req, headers).await)
            }
            tools::RESOURCES => Ok(match self.caller(headers).await {
                Ok(ctx) => {
                    let snapshot = self.snapshot(&ctx).await;
                    ToolReply::ok(list_resources(&ctx.endpoint, ctx.user_id.as_deref(), &snapshot))
                }
                Err(payload) => ToolReply::ok(payload),
            }),
            tools::RESOURCE_INFO | tools::RESOURCE_SCHEMA => {
                let ResourceArgs { resource } = tools::parse_args(name, args)?;
                Ok(match self.caller(headers).await {
                    Ok(ctx) => {
                        let snapshot = self.snapshot(&ctx).await;
                        ToolReply::ok(if name == tools::RESOURCE_INFO {
                            resource_info(&resource, &snapshot)
                        } else {
                            resource_schema(&resource, &snapshot)
                        })
                    }
                    Err(payload) => ToolReply::ok(payload),
                })
            }
            tools::AUDIT_FIELDS => {
                let AuditFieldsArgs { resource } = tools::parse_args(name, args)?;
                Ok(match self.caller(headers).await {
                    Ok(ctx) => {
                        let snapshot = self.snapshot(&ctx).await;
                        ToolReply::ok(audit_fields_payload(snapshot.audit(), resource.as_deref()))
                    }
                    Err(payload) => ToolReply::ok(payload),
                })
            }
            other => Err(ErrorData::invalid_params(format!("unknown tool: {other}"), None)),
        }
    }

    async fn query(&self, req: &QueryRequest, headers: Option<&HeaderMap>) -> ToolReply {
        let ctx = match self.caller(headers).await {
            Ok(ctx) => ctx,
            Err(payload) => return ToolReply::ok(payload),
        };
        let client = match ApiClient::new(self.http.clone(), &ctx.endpoint, &ctx.token) {
            Ok(c) => c
                .with_timeout(self.request_timeout)
                .with_policy(self.policy.clone()),
            Err(e) => return ToolReply::internal(e),
        };
        let snapshot = self.snapshot(&ctx).await;
        ToolReply::ok(
            execute_query(
                req,
                &client,
                &snapshot,
                snapshot.audit_regex(),
                self.analytics.as_ref(),
            )
            .await,
        )
    }

    /// Body of the `api://openapi.json` resource for the caller's endpoint.
    pub async fn openapi_document(&self, headers: Option<&HeaderMap>) -> Value {
        let ctx = match self.caller(headers).await {
            Ok(ctx) => ctx,
            Err(payload) => {
                return json!({
                    "error": "Authentication required",
                    "message": payload["error"],
                    "hint": "The OpenAPI spec is specific to your API endpoint and requires authentication",
                });
            }
        };
        let spec = self.store.openapi_spec(&ctx.endpoint, false).await;
        if spec.as_object().is_none_or(serde_json::Map::is_empty) {
            return json!({
                "error": "OpenAPI specification not available",
                "message": format!("Could not load OpenAPI spec for endpoint: {}", ctx.endpoint),
                "hint": "The API endpoint may be unreachable or the specification is not available",
            });
        }
        json!({
            "api_endpoint": ctx.endpoint,
            "openapi_version": spec.get("openapi").cloned().unwrap_or_else(|| json!("3.0")),
            "info": spec.get("info").cloned().unwrap_or_else(|| json!({})),
            "spec": spec.as_ref(),
        })
    }
}

fn request_headers(context: &McpContext<RoleServer>) -> Option<&HeaderMap> {
    context
        .extensions
        .get::<axum::http::request::Parts>()
        .map(|parts| &parts.headers)
}

impl ServerHandler for MarketplaceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            protocol_version: ProtocolVersion::LATEST,
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Marketplace API".to_string()),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: McpContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: tools::definitions(),
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: McpContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let name = request.name.as_ref();
        info!(tool = %name, "tool call");
        let reply = self
            .run_tool(name, request.arguments, request_headers(&context))
            .await?;
        Ok(reply.into_result())
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: McpContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let mut raw = RawResource::new(OPENAPI_RESOURCE_URI, "openapi.json");
        raw.description =
            Some("OpenAPI specification of the marketplace API for your endpoint".to_string());
        raw.mime_type = Some("application/json".to_string());
        Ok(ListResourcesResult {
            resources: vec![Annotated::new(raw, None)],
            ..Default::default()
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        context: McpContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        if request.uri != OPENAPI_RESOURCE_URI {
            return Err(ErrorData::resource_not_found(
                format!("unknown resource: {}", request.uri),
                None,
            ));
        }
        let body = self.openapi_document(request_headers(&context)).await;
        let text = serde_json::to_string_pretty(&body)
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, OPENAPI_RESOURCE_URI)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Validation;
    use async_trait::async_trait;
    use axum::Router;
    use axum::http::HeaderValue;
    use axum::routing::get;
    use marketplace_openapi_tools::config::SPEC_PATH;
    use marketplace_openapi_tools::{CacheConfig, RegistryConfig, SpecCache};
    use marketplace_test_support::{MARKETPLACE_SPEC_YAML, MockServer, RequestLog};
    use tempfile::TempDir;

    async fn upstream(log: RequestLog) -> MockServer {
        let orders_log = log.clone();
        let app = Router::new()
            .route(SPEC_PATH, get(|| async { MARKETPLACE_SPEC_YAML }))
            .route(
                "/public/v1/commerce/orders",
                get(move |uri: axum::http::Uri| {
                    let log = orders_log.clone();
                    async move {
                        log.record(uri.to_string());
                        axum::Json(json!({
                            "$meta": { "pagination": { "offset": 0, "limit": 10, "total": 1 } },
                            "data": [{ "id": "ORD-1", "status": "Failed" }],
                        }))
                    }
                }),
            );
        MockServer::start(app).await.expect("start upstream")
    }

    fn store(dir: &TempDir) -> RegistryStore {
        RegistryStore::new(
            reqwest::Client::new(),
            SpecCache::new(&CacheConfig {
                dir: dir.path().to_path_buf(),
                ttl: Duration::from_secs(3600),
            }),
            RegistryConfig {
                fallback_spec_url: String::new(),
                ..RegistryConfig::default()
            },
        )
    }

    fn stdio_server(dir: &TempDir, base_url: &str) -> MarketplaceServer {
        let ctx = RequestContext::new("idt:TKN-0001-0002:secret", base_url).expect("ctx");
        MarketplaceServer::new(store(dir), reqwest::Client::new(), Credentials::Fixed(ctx))
    }

    fn http_server(dir: &TempDir, default_endpoint: &str) -> MarketplaceServer {
        MarketplaceServer::new(
            store(dir),
            reqwest::Client::new(),
            Credentials::Headers {
                default_endpoint: default_endpoint.to_string(),
            },
        )
    }

    fn args(v: Value) -> Option<JsonObject> {
        v.as_object().cloned()
    }

    struct RejectAll;

    #[async_trait]
    impl TokenValidator for RejectAll {
        async fn validate(&self, _token: &str, _endpoint: &str) -> Validation {
            Validation::rejected("token revoked")
        }
    }

    #[tokio::test]
    async fn quick_queries_need_no_credentials() {
        let dir = TempDir::new().expect("tempdir");
        let server = http_server(&dir, "https://api.example.com");
        let reply = server
            .run_tool(tools::QUICK_QUERIES, None, None)
            .await
            .expect("tool");
        assert!(!reply.is_error);
        assert!(reply.body["orders"]["templates"].is_array());
    }

    #[tokio::test]
    async fn query_runs_against_upstream() {
        let dir = TempDir::new().expect("tempdir");
        let log = RequestLog::default();
        let upstream = upstream(log.clone()).await;
        let server = stdio_server(&dir, &upstream.base_url);

        let reply = server
            .run_tool(
                tools::QUERY,
                args(json!({ "resource": "commerce.orders", "rql": "eq(status,Failed)" })),
                None,
            )
            .await
            .expect("tool");
        assert!(!reply.is_error, "{}", reply.body);
        assert_eq!(reply.body["data"][0]["id"], "ORD-1");
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("?eq(status,Failed)&limit=10"), "{}", entries[0]);
        upstream.shutdown().await;
    }

    #[tokio::test]
    async fn headers_mode_requires_authorization() {
        let dir = TempDir::new().expect("tempdir");
        let server = http_server(&dir, "https://api.example.com");
        let reply = server
            .run_tool(tools::RESOURCES, None, Some(&HeaderMap::new()))
            .await
            .expect("tool");
        assert!(!reply.is_error);
        assert_eq!(reply.body["hint"], TOKEN_HINT);
        assert!(
            reply.body["error"]
                .as_str()
                .is_some_and(|e| e.starts_with("Missing X-MPT-Authorization"))
        );
    }

    #[tokio::test]
    async fn headers_select_endpoint_and_user() {
        let dir = TempDir::new().expect("tempdir");
        let upstream = upstream(RequestLog::default()).await;
        let server = http_server(&dir, "https://unused.example.com");

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MPT-Authorization",
            HeaderValue::from_static("idt:TKN-5555-6666:secret"),
        );
        headers.insert(
            "X-MPT-Endpoint",
            HeaderValue::from_str(&format!("{}/public", upstream.base_url)).expect("header"),
        );
        let reply = server
            .run_tool(tools::RESOURCES, None, Some(&headers))
            .await
            .expect("tool");
        assert_eq!(reply.body["api_endpoint"], upstream.base_url.as_str());
        assert_eq!(reply.body["user"], "TKN-5555-6666");
        assert_eq!(reply.body["total_resources"], 6);
        upstream.shutdown().await;
    }

    #[tokio::test]
    async fn outbound_policy_blocks_unlisted_endpoints() {
        let dir = TempDir::new().expect("tempdir");
        let server = http_server(&dir, "http://127.0.0.1:9")
            .with_policy(OutboundPolicy::restricted(["api.allowed.example"]));
        let mut headers = HeaderMap::new();
        headers.insert("x-mpt-authorization", HeaderValue::from_static("token"));
        let reply = server
            .run_tool(
                tools::RESOURCE_INFO,
                args(json!({ "resource": "commerce.orders" })),
                Some(&headers),
            )
            .await
            .expect("tool");
        assert!(
            reply.body["error"]
                .as_str()
                .is_some_and(|e| e.contains("not in allowlist")),
            "{}",
            reply.body
        );
        assert!(server.store().loaded_base_urls().is_empty());
    }

    #[tokio::test]
    async fn rejected_tokens_stop_before_any_fetch() {
        let dir = TempDir::new().expect("tempdir");
        let server =
            stdio_server(&dir, "http://127.0.0.1:9").with_validator(Arc::new(RejectAll));
        let reply = server
            .run_tool(tools::AUDIT_FIELDS, None, None)
            .await
            .expect("tool");
        assert_eq!(
            reply.body["error"],
            "Token validation failed: token revoked. Please ensure your API token is valid and active."
        );
        assert!(server.store().loaded_base_urls().is_empty());
    }

    #[tokio::test]
    async fn audit_fields_and_schema_use_loaded_registry() {
        let dir = TempDir::new().expect("tempdir");
        let upstream = upstream(RequestLog::default()).await;
        let server = stdio_server(&dir, &upstream.base_url);

        let reply = server
            .run_tool(
                tools::AUDIT_FIELDS,
                args(json!({ "resource": "commerce.orders" })),
                None,
            )
            .await
            .expect("tool");
        assert_eq!(
            reply.body,
            json!({ "resource": "commerce.orders", "events": ["created", "failed", "updated"] })
        );

        let reply = server
            .run_tool(
                tools::RESOURCE_SCHEMA,
                args(json!({ "resource": "commerce.orders" })),
                None,
            )
            .await
            .expect("tool");
        assert_eq!(reply.body["fields"]["id"]["type"], "string");
        upstream.shutdown().await;
    }

    #[tokio::test]
    async fn protocol_errors_for_bad_calls() {
        let dir = TempDir::new().expect("tempdir");
        let server = http_server(&dir, "https://api.example.com");
        assert!(server.run_tool("nope", None, None).await.is_err());
        assert!(
            server
                .run_tool(tools::RESOURCE_INFO, args(json!({ "resource": 5 })), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn openapi_document_wraps_spec() {
        let dir = TempDir::new().expect("tempdir");
        let upstream = upstream(RequestLog::default()).await;
        let server = stdio_server(&dir, &upstream.base_url);
        let doc = server.openapi_document(None).await;
        assert_eq!(doc["api_endpoint"], upstream.base_url.as_str());
        assert_eq!(doc["openapi_version"], "3.0.1");
        assert!(doc["spec"]["paths"].is_object());

        let anonymous = http_server(&dir, &upstream.base_url);
        let doc = anonymous.openapi_document(None).await;
        assert_eq!(doc["error"], "Authentication required");
        upstream.shutdown().await;
    }

    #[test]
    fn internal_errors_are_flagged() {
        let result = ToolReply::internal("boom").into_result();
        assert_eq!(result.is_error, Some(true));
        let ok = ToolReply::ok(json!({ "a": 1 })).into_result();
        assert_eq!(ok.is_error, Some(false));
    }
}
