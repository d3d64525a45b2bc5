//! Upstream HTTP plumbing for the marketplace API.
//!
//! This crate is used by:
//! - `marketplace-openapi-tools` (spec fetching, query dispatch)
//! - `marketplace-mcp-server` (per-request client construction)
//!
//! It intentionally knows nothing about `OpenAPI` documents or resource registries.

pub mod client;
pub mod query;
pub mod redaction;
pub mod safety;

pub use client::{ApiClient, HttpToolsError, Result, UpstreamApi};
pub use query::QueryParams;
