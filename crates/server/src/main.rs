use anyhow::Context as _;
use clap::Parser as _;
use marketplace_mcp_server::config::{Config, Transport};
use marketplace_mcp_server::logging::init_tracing;
use marketplace_mcp_server::{build_server, http};
use rmcp::ServiceExt as _;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level, config.log_format);

    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("invalid configuration:\n  {}", problems.join("\n  "));
    }
    let server = build_server(&config)?;

    match config.transport {
        Transport::Stdio => {
            info!(endpoint = %config.api_base_url, "serving MCP over stdio");
            server
                .serve(rmcp::transport::stdio())
                .await
                .context("start stdio transport")?
                .waiting()
                .await
                .context("stdio session")?;
        }
        Transport::Http => {
            let addr = config.bind_addr();
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {addr}"))?;
            info!(%addr, "serving MCP over streamable HTTP at /mcp");
            axum::serve(listener, http::router(server))
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutdown requested");
                })
                .await
                .context("HTTP server")?;
        }
    }
    Ok(())
}
