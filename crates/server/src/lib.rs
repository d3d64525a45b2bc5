//! MCP server exposing the marketplace REST API as read-only query tools.
//!
//! STDIO mode serves one client with credentials from configuration. HTTP mode serves the
//! streamable transport at `/mcp` and takes credentials from each request's headers.

pub mod config;
pub mod context;
pub mod handler;
pub mod http;
pub mod logging;
pub mod tools;
pub mod validator;

use anyhow::Context as _;
use config::{Config, Transport};
use context::RequestContext;
use handler::{Credentials, MarketplaceServer};
use marketplace_openapi_tools::{RegistryStore, SpecCache};

/// Wire a server from validated configuration.
///
/// # Errors
///
/// Fails when the HTTP client cannot be built or the STDIO credentials are unusable.
pub fn build_server(config: &Config) -> anyhow::Result<MarketplaceServer> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build HTTP client")?;
    let store = RegistryStore::new(
        http.clone(),
        SpecCache::new(&config.cache_config()),
        config.registry_config(),
    );
    let credentials = match config.transport {
        Transport::Stdio => {
            let token = config.api_token.as_deref().unwrap_or_default();
            let ctx = RequestContext::new(token, &config.api_base_url)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Credentials::Fixed(ctx)
        }
        Transport::Http => Credentials::Headers {
            default_endpoint: config.api_base_url.clone(),
        },
    };
    Ok(MarketplaceServer::new(store, http, credentials)
        .with_policy(config.outbound_policy())
        .with_request_timeout(config.request_timeout()))
}
