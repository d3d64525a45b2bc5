//! Disk-backed JSON cache for `OpenAPI` documents.
//!
//! Each entry is a file pair named by the SHA-256 of the key: `<hash>.json` holds the payload and
//! `<hash>.meta.json` holds `{cached_at, key, size}`. An entry is valid while
//! `cached_at + ttl > now`; expired payloads are kept around as a fallback for failed refetches.
//! Corrupt files are treated as misses.

use crate::config::CacheConfig;
use crate::error::{OpenApiToolsError, Result};
use chrono::{DateTime, Utc};
use marketplace_http_tools::safety::sanitize_reqwest_error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    cached_at: DateTime<Utc>,
    key: String,
    size: u64,
}

/// Snapshot of the cache directory contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub directory: String,
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: u64,
    pub ttl_hours: f64,
}

#[derive(Debug, Clone)]
pub struct SpecCache {
    dir: PathBuf,
    ttl: Duration,
}

impl SpecCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            ttl: config.ttl,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_hash(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key_hash(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", Self::key_hash(key)))
    }

    fn read_meta(path: &Path) -> Option<CacheMetadata> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn is_fresh(&self, meta: &CacheMetadata) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return true;
        };
        Utc::now() < meta.cached_at + ttl
    }

    /// True when the metadata exists, parses, and is within the TTL.
    #[must_use]
    pub fn is_valid(&self, key: &str) -> bool {
        Self::read_meta(&self.meta_path(key)).is_some_and(|m| self.is_fresh(&m))
    }

    /// Cached payload for `key` if it is still valid.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.is_valid(key) {
            return None;
        }
        self.get_stale(key)
    }

    /// Cached payload for `key` regardless of freshness.
    #[must_use]
    pub fn get_stale(&self, key: &str) -> Option<Value> {
        let path = self.payload_path(key);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring corrupt cache payload");
                None
            }
        }
    }

    /// Store `data` under `key`. Both files are written via temp-file + rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or written.
    pub fn set(&self, key: &str, data: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| OpenApiToolsError::Cache {
            path: self.dir.display().to_string(),
            source,
        })?;

        let payload = serde_json::to_vec(data)?;
        let meta = CacheMetadata {
            cached_at: Utc::now(),
            key: key.to_string(),
            size: payload.len() as u64,
        };
        // Payload first: a valid metadata file always has a payload next to it.
        write_atomic(&self.payload_path(key), &payload)?;
        write_atomic(&self.meta_path(key), &serde_json::to_vec_pretty(&meta)?)?;
        Ok(())
    }

    pub fn invalidate(&self, key: &str) {
        let _ = fs::remove_file(self.payload_path(key));
        let _ = fs::remove_file(self.meta_path(key));
    }

    /// Remove every cached entry. Returns the number of entries (file pairs) removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn clear_all(&self) -> Result<usize> {
        let mut removed = 0usize;
        for path in self.json_files()? {
            if fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        info!(dir = %self.dir.display(), entries = removed / 2, "cleared spec cache");
        Ok(removed / 2)
    }

    #[must_use]
    pub fn info(&self) -> CacheInfo {
        let mut info = CacheInfo {
            directory: self.dir.display().to_string(),
            total_entries: 0,
            valid_entries: 0,
            expired_entries: 0,
            total_size_bytes: 0,
            ttl_hours: self.ttl.as_secs_f64() / 3600.0,
        };
        let Ok(files) = self.json_files() else {
            return info;
        };
        for path in files {
            info.total_size_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".meta.json"));
            if !is_meta {
                continue;
            }
            info.total_entries += 1;
            match Self::read_meta(&path) {
                Some(m) if self.is_fresh(&m) => info.valid_entries += 1,
                _ => info.expired_entries += 1,
            }
        }
        info
    }

    fn json_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(OpenApiToolsError::Cache {
                    path: self.dir.display().to_string(),
                    source,
                });
            }
        };
        Ok(entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect())
    }

    /// Return a valid cached document for `url`, or fetch it.
    ///
    /// On fetch failure any cached payload is returned regardless of age; the error only
    /// propagates when nothing is cached at all.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when the network fetch fails and no payload is cached.
    pub async fn fetch_with_cache(
        &self,
        http: &reqwest::Client,
        url: &str,
        force_refresh: bool,
        timeout: Duration,
    ) -> Result<Value> {
        if !force_refresh && let Some(cached) = self.get(url) {
            debug!(url = %url, "spec cache hit");
            return Ok(cached);
        }

        match fetch_spec(http, url, timeout).await {
            Ok(spec) => {
                if let Err(e) = self.set(url, &spec) {
                    warn!(url = %url, error = %e, "failed to write spec cache");
                }
                Ok(spec)
            }
            Err(e) => match self.get_stale(url) {
                Some(stale) => {
                    warn!(url = %url, error = %e, "spec fetch failed; serving stale cache entry");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp = path.with_extension(format!("tmp-{}-{nanos}", std::process::id()));
    let cache_err = |source| OpenApiToolsError::Cache {
        path: path.display().to_string(),
        source,
    };
    fs::write(&tmp, bytes).map_err(cache_err)?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        cache_err(source)
    })
}

/// Download and parse an `OpenAPI` document.
///
/// # Errors
///
/// Returns an error on transport failures, non-success statuses, or unparseable bodies.
pub async fn fetch_spec(http: &reqwest::Client, url: &str, timeout: Duration) -> Result<Value> {
    info!(url = %url, "loading OpenAPI spec");
    let fetch_err = |message: String| OpenApiToolsError::OpenApiSpecFetch {
        url: url.to_string(),
        message,
    };
    let resp = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| fetch_err(sanitize_reqwest_error(&e)))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(fetch_err(format!("HTTP {status}")));
    }
    let text = resp
        .text()
        .await
        .map_err(|e| fetch_err(sanitize_reqwest_error(&e)))?;
    parse_spec_document(url, &text)
}

/// Parse a spec body as JSON, falling back to YAML.
///
/// # Errors
///
/// Returns an error if the body is neither valid JSON nor valid YAML, or is not a mapping.
pub fn parse_spec_document(location: &str, text: &str) -> Result<Value> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(json_err) => serde_yaml::from_str::<Value>(text).map_err(|yaml_err| {
            OpenApiToolsError::OpenApiSpecParse {
                location: location.to_string(),
                message: format!("not JSON ({json_err}) or YAML ({yaml_err})"),
            }
        })?,
    };
    if !value.is_object() {
        return Err(OpenApiToolsError::OpenApiSpecParse {
            location: location.to_string(),
            message: "document root is not an object".to_string(),
        });
    }
    Ok(value)
}
