//! Per-API-base-URL endpoint registries.
//!
//! A [`RegistryStore`] owns one entry per normalized base URL (`scheme://host[:port]`). Entries
//! are built lazily on first use and replaced wholesale on a forced refresh:
//!
//! ```text
//! (absent) --load--> Loading --ok-------> Ready(snapshot)
//!                            --error----> Ready(empty snapshot)
//!                            --timeout--> previous state (absent or Ready)
//! Ready --forced refresh--> Loading
//! ```
//!
//! A load that is cancelled or times out never leaves a half-applied state behind.

use crate::audit::{AuditIndex, fallback_regex};
use crate::config::{PathFilter, RegistryConfig, spec_url_for};
use crate::error::{OpenApiToolsError, Result};
use crate::parser::{EndpointDescriptor, extract_get_endpoints};
use crate::resolver::SchemaResolver;
use crate::spec_cache::SpecCache;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Immutable view of one loaded spec.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    resources: BTreeMap<String, EndpointDescriptor>,
    spec: Arc<Value>,
    audit: Option<AuditIndex>,
}

impl RegistrySnapshot {
    /// Snapshot with no resources, no spec and no audit index.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            resources: BTreeMap::new(),
            spec: Arc::new(json!({})),
            audit: None,
        }
    }

    /// Parse `spec` into resources and derive its audit index.
    #[must_use]
    pub fn build(spec: Value, filter: &PathFilter) -> Self {
        let resources: BTreeMap<String, EndpointDescriptor> = extract_get_endpoints(&spec, filter)
            .into_iter()
            .map(|e| (e.resource_id.clone(), e))
            .collect();
        let audit = AuditIndex::derive(&spec);
        Self {
            resources,
            spec: Arc::new(spec),
            audit: Some(audit),
        }
    }

    #[must_use]
    pub fn get(&self, resource_id: &str) -> Option<&EndpointDescriptor> {
        self.resources.get(resource_id)
    }

    #[must_use]
    pub fn resources(&self) -> &BTreeMap<String, EndpointDescriptor> {
        &self.resources
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    #[must_use]
    pub fn spec(&self) -> &Arc<Value> {
        &self.spec
    }

    #[must_use]
    pub fn audit(&self) -> Option<&AuditIndex> {
        self.audit.as_ref()
    }

    /// Derived audit regex, or the fallback when no spec was loaded.
    #[must_use]
    pub fn audit_regex(&self) -> &Regex {
        self.audit.as_ref().map_or(fallback_regex(), AuditIndex::regex)
    }

    /// First id segments (`catalog`, `commerce`, ...).
    #[must_use]
    pub fn categories(&self) -> BTreeSet<String> {
        self.resources
            .keys()
            .filter_map(|id| id.split('.').next())
            .map(str::to_string)
            .collect()
    }

    /// Top-level fields of the entity a resource returns; empty when unknown.
    #[must_use]
    pub fn allowed_fields(&self, resource_id: &str) -> BTreeSet<String> {
        self.get(resource_id)
            .map(|e| SchemaResolver::new(&self.spec).allowed_fields(&e.path))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
enum RegistryState {
    Loading {
        /// Identifies the load that owns this entry.
        load_id: u64,
        previous: Option<Arc<RegistrySnapshot>>,
    },
    Ready(Arc<RegistrySnapshot>),
}

impl RegistryState {
    fn ready(&self) -> Option<Arc<RegistrySnapshot>> {
        match self {
            RegistryState::Ready(s) => Some(s.clone()),
            RegistryState::Loading { previous, .. } => previous.clone(),
        }
    }
}

type Entries = Arc<RwLock<HashMap<String, RegistryState>>>;

static NEXT_LOAD_ID: AtomicU64 = AtomicU64::new(1);

/// Restores the pre-load state unless the load completed or another load has since taken over
/// the entry.
struct LoadGuard {
    entries: Entries,
    key: String,
    load_id: u64,
    previous: Option<Arc<RegistrySnapshot>>,
    armed: bool,
}

impl LoadGuard {
    fn begin(entries: &Entries, key: &str) -> Self {
        let load_id = NEXT_LOAD_ID.fetch_add(1, Ordering::Relaxed);
        let previous = entries.read().get(key).and_then(RegistryState::ready);
        entries.write().insert(
            key.to_string(),
            RegistryState::Loading {
                load_id,
                previous: previous.clone(),
            },
        );
        Self {
            entries: entries.clone(),
            key: key.to_string(),
            load_id,
            previous,
            armed: true,
        }
    }

    fn complete(mut self, snapshot: Arc<RegistrySnapshot>) {
        self.armed = false;
        self.entries
            .write()
            .insert(self.key.clone(), RegistryState::Ready(snapshot));
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut map = self.entries.write();
        let owned = matches!(
            map.get(&self.key),
            Some(RegistryState::Loading { load_id, .. }) if *load_id == self.load_id
        );
        if !owned {
            return;
        }
        match self.previous.take() {
            Some(previous) => {
                map.insert(self.key.clone(), RegistryState::Ready(previous));
            }
            None => {
                map.remove(&self.key);
            }
        }
    }
}

/// Process-wide registry cache, owned by the composition root and passed down explicitly.
#[derive(Clone)]
pub struct RegistryStore {
    http: reqwest::Client,
    cache: SpecCache,
    config: RegistryConfig,
    entries: Entries,
}

impl RegistryStore {
    #[must_use]
    pub fn new(http: reqwest::Client, cache: SpecCache, config: RegistryConfig) -> Self {
        Self {
            http,
            cache,
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &SpecCache {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Ready snapshot for `api_base_url` without triggering a load.
    #[must_use]
    pub fn peek(&self, api_base_url: &str) -> Option<Arc<RegistrySnapshot>> {
        match self.entries.read().get(api_base_url)? {
            RegistryState::Ready(s) => Some(s.clone()),
            RegistryState::Loading { .. } => None,
        }
    }

    /// Registry for a normalized base URL, loading it on first use or when `force_refresh` is set.
    ///
    /// Never fails: a load error yields (and stores) an empty snapshot; a timed-out load leaves
    /// the previous state in place and returns the previous snapshot, or an unstored empty one.
    pub async fn registry(&self, api_base_url: &str, force_refresh: bool) -> Arc<RegistrySnapshot> {
        if !force_refresh && let Some(ready) = self.peek(api_base_url) {
            return ready;
        }

        info!(api_base_url = %api_base_url, force_refresh, "initializing endpoint registry");
        let guard = LoadGuard::begin(&self.entries, api_base_url);
        let load = self.load(api_base_url, force_refresh);

        match tokio::time::timeout(self.config.load_timeout, load).await {
            Ok(Ok(snapshot)) => {
                info!(
                    api_base_url = %api_base_url,
                    resources = snapshot.len(),
                    "endpoint registry ready"
                );
                let snapshot = Arc::new(snapshot);
                guard.complete(snapshot.clone());
                snapshot
            }
            Ok(Err(e)) => {
                warn!(
                    api_base_url = %api_base_url,
                    error = %e,
                    "failed to initialize endpoint registry; using empty registry"
                );
                let snapshot = Arc::new(RegistrySnapshot::empty());
                guard.complete(snapshot.clone());
                snapshot
            }
            Err(_) => {
                warn!(
                    api_base_url = %api_base_url,
                    timeout_secs = self.config.load_timeout.as_secs(),
                    "endpoint registry load timed out; keeping previous state"
                );
                let previous = guard.previous.clone();
                drop(guard);
                previous.unwrap_or_else(|| Arc::new(RegistrySnapshot::empty()))
            }
        }
    }

    /// Raw spec for a base URL (empty object when none could be loaded).
    pub async fn openapi_spec(&self, api_base_url: &str, force_refresh: bool) -> Arc<Value> {
        self.registry(api_base_url, force_refresh)
            .await
            .spec()
            .clone()
    }

    /// Audit regex for a base URL without triggering a load.
    #[must_use]
    pub fn audit_regex(&self, api_base_url: &str) -> Regex {
        self.peek(api_base_url)
            .map_or_else(|| fallback_regex().clone(), |s| s.audit_regex().clone())
    }

    pub fn invalidate(&self, api_base_url: &str) {
        if self.entries.write().remove(api_base_url).is_some() {
            info!(api_base_url = %api_base_url, "cleared endpoint registry");
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        info!("cleared all endpoint registries");
    }

    /// Base URLs with a ready registry.
    #[must_use]
    pub fn loaded_base_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, s)| matches!(s, RegistryState::Ready(_)))
            .map(|(k, _)| k.clone())
            .collect();
        urls.sort();
        urls
    }

    async fn load(&self, api_base_url: &str, force_refresh: bool) -> Result<RegistrySnapshot> {
        let spec = self.fetch_spec(api_base_url, force_refresh).await?;
        Ok(RegistrySnapshot::build(spec, &self.config.filter))
    }

    /// Endpoint-specific spec first, then the fixed fallback URL if it differs.
    async fn fetch_spec(&self, api_base_url: &str, force_refresh: bool) -> Result<Value> {
        let timeout = self.config.spec_fetch_timeout;
        let primary = spec_url_for(api_base_url);
        let primary_err = match self
            .cache
            .fetch_with_cache(&self.http, &primary, force_refresh, timeout)
            .await
        {
            Ok(spec) => return Ok(spec),
            Err(e) => e,
        };

        let fallback = self.config.fallback_spec_url.as_str();
        if fallback.is_empty() || fallback == primary {
            return Err(primary_err);
        }
        warn!(url = %primary, error = %primary_err, fallback = %fallback, "trying fallback spec");

        self.cache
            .fetch_with_cache(&self.http, fallback, force_refresh, timeout)
            .await
            .map_err(|e| {
                warn!(url = %fallback, error = %e, "fallback spec fetch failed");
                OpenApiToolsError::OpenApiSpecUnavailable {
                    primary,
                    fallback: fallback.to_string(),
                }
            })
    }
}
