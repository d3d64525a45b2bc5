use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.platform.softwareone.com";

/// Fixed location of the `OpenAPI` document relative to an API base URL.
pub const SPEC_PATH: &str = "/public/v1/openapi.json";

/// Production spec used when an endpoint does not serve its own.
pub const FALLBACK_SPEC_URL: &str = "https://api.platform.softwareone.com/public/v1/openapi.json";

/// Versioned prefix stripped from paths when deriving resource ids.
pub const API_PREFIX: &str = "/public/v1/";

/// `OpenAPI` document URL for a normalized API base URL.
#[must_use]
pub fn spec_url_for(api_base_url: &str) -> String {
    format!("{}{SPEC_PATH}", api_base_url.trim_end_matches('/'))
}

/// Include/exclude substring filters applied to spec paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PathFilter {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

impl PathFilter {
    #[must_use]
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: clean_patterns(include),
            exclude: clean_patterns(exclude),
        }
    }

    /// Build from comma-separated pattern lists (`"catalog,commerce/orders"`).
    #[must_use]
    pub fn from_csv(include: &str, exclude: &str) -> Self {
        Self::new(include.split(','), exclude.split(','))
    }

    #[must_use]
    pub fn include_patterns(&self) -> &[String] {
        &self.include
    }

    #[must_use]
    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude
    }

    /// Exclusions win; with includes present the path must contain at least one of them.
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        let normalized = path.trim_matches('/');
        if self.exclude.iter().any(|p| normalized.contains(p.as_str())) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| normalized.contains(p.as_str()))
    }
}

fn clean_patterns<I>(patterns: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Settings for the on-disk spec cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Settings for registry loads.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub filter: PathFilter,
    pub fallback_spec_url: String,
    /// Per-fetch timeout for a single spec download.
    pub spec_fetch_timeout: Duration,
    /// Upper bound for a whole load (primary fetch, fallback fetch, parse, audit derivation).
    pub load_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            filter: PathFilter::default(),
            fallback_spec_url: FALLBACK_SPEC_URL.to_string(),
            spec_fetch_timeout: Duration::from_secs(10),
            load_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_patterns_are_trimmed() {
        let f = PathFilter::from_csv(" catalog , ,commerce/orders", "");
        assert_eq!(f.include_patterns(), ["catalog", "commerce/orders"]);
        assert!(f.exclude_patterns().is_empty());
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let f = PathFilter::from_csv("catalog", "catalog/items");
        assert!(f.allows("/public/v1/catalog/products"));
        assert!(!f.allows("/public/v1/catalog/items/{id}"));
        assert!(!f.allows("/public/v1/commerce/orders"));
    }

    #[test]
    fn empty_filter_allows_everything() {
        assert!(PathFilter::default().allows("/anything"));
    }

    #[test]
    fn spec_url_has_fixed_suffix() {
        assert_eq!(
            spec_url_for("https://api.s1.show/"),
            "https://api.s1.show/public/v1/openapi.json"
        );
    }
}
