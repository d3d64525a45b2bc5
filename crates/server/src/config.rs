//! Command-line and environment configuration.

use crate::logging::LogFormat;
use clap::{Parser, ValueEnum};
use marketplace_http_tools::safety::OutboundPolicy;
use marketplace_openapi_tools::config::{DEFAULT_API_BASE_URL, FALLBACK_SPEC_URL};
use marketplace_openapi_tools::{CacheConfig, PathFilter, RegistryConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Transport {
    /// One client over stdin/stdout; credentials come from configuration.
    #[default]
    Stdio,
    /// Streamable HTTP at `/mcp`; credentials come from request headers.
    Http,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "marketplace-mcp-server", version, about)]
pub struct Config {
    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Marketplace API base URL (any path is discarded).
    #[arg(long, env = "MARKETPLACE_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// API token used in STDIO mode.
    #[arg(long, env = "MARKETPLACE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Spec URL tried when the endpoint's own `openapi.json` cannot be loaded.
    #[arg(long, env = "OPENAPI_SPEC_URL", default_value = FALLBACK_SPEC_URL)]
    pub fallback_spec_url: String,

    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "SPEC_FETCH_TIMEOUT", default_value_t = 10)]
    pub spec_timeout_secs: u64,

    /// Comma-separated path substrings; when set, only matching paths become resources.
    #[arg(long, env = "TOOL_INCLUDE_PATTERNS", default_value = "")]
    pub include_patterns: String,

    /// Comma-separated path substrings to skip.
    #[arg(long, env = "TOOL_EXCLUDE_PATTERNS", default_value = "")]
    pub exclude_patterns: String,

    #[arg(long, env = "SPEC_CACHE_DIR", default_value = ".cache")]
    pub cache_dir: PathBuf,

    #[arg(long, env = "SPEC_CACHE_TTL_HOURS", default_value_t = 24)]
    pub cache_ttl_hours: u64,

    #[arg(long, env = "SSE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Comma-separated hosts callers may target via `X-MPT-Endpoint`; empty allows any public host.
    #[arg(long, env = "MARKETPLACE_ALLOWED_HOSTS", default_value = "")]
    pub allowed_hosts: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    /// Configuration problems that prevent startup, one message each.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.transport == Transport::Stdio
            && self.api_token.as_deref().is_none_or(|t| t.trim().is_empty())
        {
            errors.push("MARKETPLACE_API_TOKEN is required in stdio mode".to_string());
        }
        let base = self.api_base_url.trim().to_ascii_lowercase();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            errors.push(format!(
                "MARKETPLACE_API_BASE_URL must start with http:// or https:// (got '{}')",
                self.api_base_url
            ));
        }
        errors
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            dir: self.cache_dir.clone(),
            ttl: Duration::from_secs(self.cache_ttl_hours.saturating_mul(60 * 60)),
        }
    }

    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            filter: PathFilter::from_csv(&self.include_patterns, &self.exclude_patterns),
            fallback_spec_url: self.fallback_spec_url.trim().to_string(),
            spec_fetch_timeout: Duration::from_secs(self.spec_timeout_secs),
            ..RegistryConfig::default()
        }
    }

    /// Policy for caller-supplied endpoints. STDIO mode only talks to the configured URL.
    #[must_use]
    pub fn outbound_policy(&self) -> OutboundPolicy {
        match self.transport {
            Transport::Stdio => OutboundPolicy::permissive(),
            Transport::Http => OutboundPolicy::restricted(self.allowed_hosts.split(',')),
        }
    }

    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
