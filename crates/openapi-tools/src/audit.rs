//! Audit event discovery.
//!
//! The upstream API only accepts filters and sorts on `audit.<event>.(at|by)` when the caller
//! also selects `audit`. Which events exist differs per resource and per deployment, so they are
//! derived from the spec: every GET item schema is scanned for a property whose name contains
//! `audit`, and each nested event that exposes a "when" or "who" field is recorded.

use crate::parser::derive_resource_id;
use crate::resolver::{SchemaNode, SchemaResolver};
use regex::Regex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

const WHEN_KEYS: [&str; 3] = ["at", "timestamp", "date"];
const WHO_KEYS: [&str; 3] = ["by", "actor", "user"];

/// Events assumed when no spec has been loaded for a base URL.
pub const FALLBACK_EVENTS: [&str; 6] = [
    "created",
    "updated",
    "completed",
    "processing",
    "quoted",
    "failed",
];

static FALLBACK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"audit\.({})\.(at|by)", FALLBACK_EVENTS.join("|")))
        .expect("fallback audit regex is valid")
});

/// Regex used before (or instead of) a derived index.
#[must_use]
pub fn fallback_regex() -> &'static Regex {
    &FALLBACK_REGEX
}

/// Compile `audit\.(e1|e2|...)\.(at|by)` over the sorted event set.
///
/// An empty set yields the fallback pattern.
#[must_use]
pub fn build_audit_regex(events: &BTreeSet<String>) -> Regex {
    if events.is_empty() {
        return FALLBACK_REGEX.clone();
    }
    let alternation = events
        .iter()
        .map(|e| regex::escape(e))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"audit\.({alternation})\.(at|by)"))
        .unwrap_or_else(|_| FALLBACK_REGEX.clone())
}

/// Audit events discovered in one spec.
#[derive(Debug, Clone)]
pub struct AuditIndex {
    events: BTreeSet<String>,
    regex: Regex,
    by_resource: BTreeMap<String, Vec<String>>,
}

impl AuditIndex {
    /// Scan every GET operation of `spec`.
    #[must_use]
    pub fn derive(spec: &Value) -> Self {
        let resolver = SchemaResolver::new(spec);
        let mut events = BTreeSet::new();
        let mut by_resource: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        let paths = spec.get("paths").and_then(Value::as_object);
        for (path, item) in paths.into_iter().flatten() {
            if item.get("get").is_none() {
                continue;
            }
            let Some(schema) = resolver.get_response_schema(path) else {
                tracing::debug!(%path, "no 200 application/json schema");
                continue;
            };
            let Some(props) = resolver.properties(resolver.item_schema(schema)) else {
                tracing::debug!(%path, "item schema has no properties");
                continue;
            };
            let found = events_in_properties(&resolver, props);
            if found.is_empty() {
                continue;
            }
            let resource_id = derive_resource_id(path);
            tracing::debug!(%path, %resource_id, events = ?found, "audit events");
            events.extend(found.iter().cloned());
            by_resource.entry(resource_id).or_default().extend(found);
        }

        tracing::info!(
            resources = by_resource.len(),
            events = ?events,
            "derived audit index"
        );
        Self::from_parts(
            events,
            by_resource
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
        )
    }

    fn from_parts(events: BTreeSet<String>, by_resource: BTreeMap<String, Vec<String>>) -> Self {
        let regex = build_audit_regex(&events);
        Self {
            events,
            regex,
            by_resource,
        }
    }

    #[must_use]
    pub fn events(&self) -> &BTreeSet<String> {
        &self.events
    }

    #[must_use]
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    #[must_use]
    pub fn by_resource(&self) -> &BTreeMap<String, Vec<String>> {
        &self.by_resource
    }

    /// Sorted events for one resource; empty when it has none.
    #[must_use]
    pub fn events_for(&self, resource_id: &str) -> &[String] {
        self.by_resource
            .get(resource_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Events exposed by every `*audit*` property in a flat property map.
fn events_in_properties(
    resolver: &SchemaResolver<'_>,
    props: &serde_json::Map<String, Value>,
) -> BTreeSet<String> {
    let mut events = BTreeSet::new();
    for (name, schema) in props {
        if !name.to_ascii_lowercase().contains("audit") {
            continue;
        }
        let Some(nested) = resolver.properties(schema) else {
            continue;
        };
        for (event, event_schema) in nested {
            let SchemaNode::Object(fields) = SchemaNode::classify(resolver.resolve(event_schema))
            else {
                continue;
            };
            let has_when = WHEN_KEYS.iter().any(|k| fields.contains_key(*k));
            let has_who = WHO_KEYS.iter().any(|k| fields.contains_key(*k));
            if has_when || has_who {
                events.insert(event.clone());
            }
        }
    }
    events
}

/// Payload for the audit-fields tool. `index` is `None` when no spec was loaded.
#[must_use]
pub fn audit_fields_payload(index: Option<&AuditIndex>, resource: Option<&str>) -> Value {
    match (index, resource) {
        (None, Some(resource)) => json!({
            "error": "Audit fields not available (spec not loaded)",
            "resource": resource,
        }),
        (None, None) => json!({ "by_resource": {} }),
        (Some(index), Some(resource)) => {
            let events = index.events_for(resource);
            if events.is_empty() {
                json!({
                    "resource": resource,
                    "events": [],
                    "hint": "No audit fields found for this resource",
                })
            } else {
                json!({ "resource": resource, "events": events })
            }
        }
        (Some(index), None) => json!({ "by_resource": index.by_resource() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathFilter;
    use crate::parser::extract_get_endpoints;
    use marketplace_test_support::marketplace_spec;

    #[test]
    fn fallback_regex_soundness() {
        let re = fallback_regex();
        for hit in ["audit.created.at", "audit.updated.by", "audit.failed.at"] {
            assert!(re.is_match(hit), "{hit}");
        }
        for miss in ["status", "audit.status", "audit.created"] {
            assert!(!re.is_match(miss), "{miss}");
        }
    }

    #[test]
    fn derives_events_through_refs_allof_and_renamed_keys() {
        let spec = marketplace_spec();
        let index = AuditIndex::derive(&spec);

        assert_eq!(
            index.events_for("catalog.products"),
            ["created", "published", "updated"]
        );
        assert_eq!(
            index.events_for("catalog.products.by_id"),
            ["created", "published", "updated"]
        );
        // `orderAudit.notes` is a plain string and carries no event.
        assert_eq!(
            index.events_for("commerce.orders"),
            ["created", "failed", "updated"]
        );
        assert!(index.events_for("commerce.agreements").is_empty());
        assert!(!index.by_resource().contains_key("commerce.agreements"));

        let events: Vec<_> = index.events().iter().map(String::as_str).collect();
        assert_eq!(events, ["created", "failed", "published", "updated"]);
    }

    #[test]
    fn derived_regex_tracks_event_set() {
        let index = AuditIndex::derive(&marketplace_spec());
        assert_eq!(
            index.regex().as_str(),
            r"audit\.(created|failed|published|updated)\.(at|by)"
        );
        assert!(index.regex().is_match("gt(audit.published.at,2024-01-01)"));
        assert!(!index.regex().is_match("gt(audit.quoted.at,2024-01-01)"));
    }

    #[test]
    fn empty_spec_uses_fallback() {
        let index = AuditIndex::derive(&json!({}));
        assert!(index.events().is_empty());
        assert_eq!(index.regex().as_str(), fallback_regex().as_str());
    }

    #[test]
    fn event_names_are_escaped() {
        let events: BTreeSet<String> = ["a.b".to_string()].into();
        let re = build_audit_regex(&events);
        assert!(re.is_match("audit.a.b.at"));
        assert!(!re.is_match("audit.aXb.at"));
    }

    #[test]
    fn resource_ids_agree_with_parser() {
        let spec = marketplace_spec();
        let index = AuditIndex::derive(&spec);
        let ids: BTreeSet<String> = extract_get_endpoints(&spec, &PathFilter::default())
            .into_iter()
            .map(|e| e.resource_id)
            .collect();
        assert!(index.by_resource().keys().all(|k| ids.contains(k)));
    }

    #[test]
    fn payload_shapes() {
        let index = AuditIndex::derive(&marketplace_spec());
        assert_eq!(
            audit_fields_payload(None, Some("x")),
            json!({ "error": "Audit fields not available (spec not loaded)", "resource": "x" })
        );
        assert_eq!(audit_fields_payload(None, None), json!({ "by_resource": {} }));
        assert_eq!(
            audit_fields_payload(Some(&index), Some("commerce.agreements"))["hint"],
            "No audit fields found for this resource"
        );
        assert_eq!(
            audit_fields_payload(Some(&index), Some("commerce.orders")),
            json!({ "resource": "commerce.orders", "events": ["created", "failed", "updated"] })
        );
        let all = audit_fields_payload(Some(&index), None);
        assert!(all["by_resource"]["catalog.products"].is_array());
    }
}
