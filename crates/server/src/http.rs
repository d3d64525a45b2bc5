//! Streamable HTTP surface: `/mcp` for the protocol and `/health` for probes.

use crate::handler::MarketplaceServer;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use serde_json::{Value, json};

async fn health(State(server): State<MarketplaceServer>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "loaded_base_urls": server.store().loaded_base_urls(),
    }))
}

/// Router serving one MCP session per client, each backed by a clone of `server`.
pub fn router(server: MarketplaceServer) -> Router {
    let factory = server.clone();
    let mcp = StreamableHttpService::new(
        move || Ok(factory.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp)
        .with_state(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Credentials;
    use marketplace_openapi_tools::{CacheConfig, RegistryConfig, RegistryStore, SpecCache};
    use marketplace_test_support::MockServer;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn health_reports_loaded_endpoints() {
        let dir = TempDir::new().expect("tempdir");
        let store = RegistryStore::new(
            reqwest::Client::new(),
            SpecCache::new(&CacheConfig {
                dir: dir.path().to_path_buf(),
                ttl: Duration::from_secs(60),
            }),
            RegistryConfig::default(),
        );
        let server = MarketplaceServer::new(
            store,
            reqwest::Client::new(),
            Credentials::Headers {
                default_endpoint: "https://api.example.com".to_string(),
            },
        );
        let mock = MockServer::start(router(server)).await.expect("start");

        let body: Value = reqwest::get(format!("{}/health", mock.base_url))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(body, json!({ "status": "ok", "loaded_base_urls": [] }));
        mock.shutdown().await;
    }
}
