//! `OpenAPI`-driven resource registry and query engine for the marketplace platform.
//!
//! The crate turns the platform's `OpenAPI` document into a per-base-URL registry of readable
//! resources and executes RQL queries against them:
//!
//! - [`spec_cache`] fetches the document with a TTL-bound on-disk cache;
//! - [`parser`] and [`resolver`] extract GET endpoints and navigate schemas;
//! - [`audit`] derives the audit timestamp vocabulary from the document;
//! - [`registry`] ties those together per API base URL;
//! - [`select`] and [`executor`] repair and run caller queries;
//! - [`catalog`] and [`templates`] build discovery payloads.
//!
//! Transport and MCP wiring live in the server crate.

pub mod analytics;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod select;
pub mod spec_cache;
pub mod templates;

pub use analytics::{AnalyticsSink, NoopSink, QueryEvent, TracingSink};
pub use audit::{AuditIndex, audit_fields_payload};
pub use catalog::{list_resources, resource_info, resource_schema};
pub use config::{CacheConfig, PathFilter, RegistryConfig};
pub use error::{OpenApiToolsError, Result};
pub use executor::{QueryRequest, execute_query};
pub use parser::{EndpointDescriptor, ParameterSpec};
pub use registry::{RegistrySnapshot, RegistryStore};
pub use select::sanitize_select;
pub use spec_cache::SpecCache;
pub use templates::quick_queries;
