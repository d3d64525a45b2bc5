//! Translation of a simplified resource query into one upstream GET.
//!
//! Steps run strictly in order, each a possible early return:
//! resolve resource, substitute path parameters, auto-inject `audit` into `select`, sanitize
//! `select`, clamp `limit`, normalize RQL whitespace, dispatch. The only retry is a single
//! rollback of the auto-injected `audit` selection after an HTTP 400.
//!
//! Expected failures (unknown resource, missing path parameters, upstream errors) come back as
//! JSON payloads, never as `Err`.

use crate::analytics::{AnalyticsSink, QueryEvent};
use crate::registry::RegistrySnapshot;
use crate::select::sanitize_select;
use marketplace_http_tools::redaction::{is_token_listing_path, redact_token_values};
use marketplace_http_tools::{HttpToolsError, QueryParams, UpstreamApi};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
const MAX_SUGGESTIONS: usize = 5;
const MAX_ERROR_TEXT_CHARS: usize = 500;

const AUDIT_SELECT_HINT: &str = "When filtering or sorting by audit fields (e.g., audit.created.at), \
you must include 'audit' in the select parameter. Example: select='audit' or select='+id,+name,audit'";

static PATH_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));

static COMMA_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s+").expect("valid whitespace regex"));

/// Realistic-looking identifiers used in "missing path parameter" examples.
const EXAMPLE_IDS: [(&str, &str); 9] = [
    ("id", "PRD-1234-5678"),
    ("productId", "PRD-1234-5678"),
    ("orderId", "ORD-1234-5678-9012"),
    ("agreementId", "AGR-1234-5678-9012"),
    ("subscriptionId", "SUB-1234-5678-9012"),
    ("accountId", "ACC-1234-5678"),
    ("userId", "USR-1234-5678"),
    ("lineId", "LIN-1234-5678"),
    ("assetId", "AST-1234-5678"),
];

fn example_id(name: &str) -> Option<&'static str> {
    EXAMPLE_IDS
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| *v)
}

/// One caller query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryRequest {
    pub resource: String,
    #[serde(default)]
    pub rql: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub select: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub path_params: Option<BTreeMap<String, Value>>,
}

impl QueryRequest {
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }
}

/// Effective `limit`: absent means 10, 0 is kept, anything above 100 is capped.
#[must_use]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        None => DEFAULT_LIMIT,
        Some(n) if n > MAX_LIMIT => MAX_LIMIT,
        Some(n) => n,
    }
}

/// Remove whitespace directly after commas; the upstream RQL parser rejects it.
#[must_use]
pub fn normalize_rql(rql: &str) -> String {
    COMMA_WHITESPACE.replace_all(rql, ",").into_owned()
}

/// True when `select` already asks for the audit object.
#[must_use]
pub fn selects_audit(select: Option<&str>) -> bool {
    select.is_some_and(|s| {
        s.split(',').map(str::trim).any(|part| {
            let field = part.strip_prefix('+').unwrap_or(part);
            field == "audit" || field.starts_with("audit.")
        })
    })
}

/// True when the filter references an audit timestamp or the sort mentions audit.
#[must_use]
pub fn references_audit(rql: Option<&str>, order: Option<&str>, audit_regex: &Regex) -> bool {
    rql.is_some_and(|r| audit_regex.is_match(r))
        || order.is_some_and(|o| o.to_ascii_lowercase().contains("audit"))
}

/// Parameters shared by the first attempt and the rollback.
struct Assembled {
    rql: Option<String>,
    limit: i64,
    offset: Option<i64>,
    page: Option<i64>,
    order: Option<String>,
}

impl Assembled {
    /// Query in upstream order: rql, limit, offset, page, select, order.
    fn build_params(&self, select: Option<&str>) -> QueryParams {
        let mut params = QueryParams::new();
        if let Some(rql) = &self.rql {
            params = params.with_rql(rql.clone());
        }
        params.push("limit", self.limit);
        if let Some(offset) = self.offset {
            params.push("offset", offset);
        }
        if let Some(page) = self.page {
            params.push("page", page);
        }
        if let Some(select) = select.filter(|s| !s.trim().is_empty()) {
            params.push("select", select);
        }
        if let Some(order) = self.order.as_deref().filter(|o| !o.is_empty()) {
            params.push("order", order);
        }
        params
    }
}

/// Run one query against `api` using the resources in `registry`.
pub async fn execute_query(
    req: &QueryRequest,
    api: &dyn UpstreamApi,
    registry: &RegistrySnapshot,
    audit_regex: &Regex,
    analytics: &dyn AnalyticsSink,
) -> Value {
    let started = Instant::now();
    info!(
        resource = %req.resource,
        rql = %truncate_chars(req.rql.as_deref().unwrap_or(""), 80),
        limit = ?req.limit,
        "marketplace query"
    );

    let Some(endpoint) = registry.get(&req.resource) else {
        return unknown_resource(registry, &req.resource);
    };

    let path = substitute_path_params(&endpoint.path, req.path_params.as_ref());
    let missing: Vec<&str> = PATH_PLACEHOLDER
        .captures_iter(&path)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if !missing.is_empty() {
        return missing_path_params(&req.resource, &endpoint.path, &missing);
    }

    let original_select = req.select.as_deref().filter(|s| !s.is_empty());
    let inject_audit = references_audit(req.rql.as_deref(), req.order.as_deref(), audit_regex)
        && !selects_audit(original_select);
    let requested_select = if inject_audit {
        info!(resource = %req.resource, "auto-adding 'audit' to select");
        Some(match original_select {
            Some(s) => format!("{s},audit"),
            None => "audit".to_string(),
        })
    } else {
        original_select.map(str::to_string)
    };

    let allowed = registry.allowed_fields(&req.resource);
    let sanitize = |select: Option<&str>| -> Option<String> {
        sanitize_select(select, &allowed)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| select.map(str::to_string))
    };
    let first_select = sanitize(requested_select.as_deref());

    let limit = clamp_limit(req.limit);
    if req.limit != Some(limit) {
        info!(requested = ?req.limit, effective = limit, "adjusted limit");
    }
    let assembled = Assembled {
        rql: req
            .rql
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(normalize_rql),
        limit,
        offset: req.offset,
        page: req.page,
        order: req.order.clone(),
    };

    let mut event = QueryEvent {
        resource: req.resource.clone(),
        path: path.clone(),
        status: None,
        elapsed_ms: 0,
        result_count: None,
        rql: assembled.rql.clone(),
        limit: Some(limit),
        offset: req.offset,
        order: req.order.clone(),
        select: first_select.clone(),
        retried: false,
    };

    let first = api
        .get_json(&path, &assembled.build_params(first_select.as_deref()))
        .await;
    let err = match first {
        Ok(body) => {
            return finish_success(body, &path, started, &mut event, analytics);
        }
        Err(e) => e,
    };

    warn!(resource = %req.resource, path = %path, error = %err, "upstream query failed");
    let payload = error_payload(&err, &req.resource, &path);

    if inject_audit && err.status() == Some(400) {
        let retry_select = sanitize(original_select);
        info!(
            resource = %req.resource,
            select = retry_select.as_deref().unwrap_or("None"),
            "400 after auto-adding 'audit'; retrying without it"
        );
        match api
            .get_json(&path, &assembled.build_params(retry_select.as_deref()))
            .await
        {
            Ok(body) => {
                event.select = retry_select;
                event.retried = true;
                return finish_success(body, &path, started, &mut event, analytics);
            }
            Err(retry_err) => {
                warn!(resource = %req.resource, error = %retry_err, "retry also failed");
            }
        }
    }

    event.status = Some(err.status().unwrap_or(500));
    event.elapsed_ms = elapsed_ms(started);
    analytics.record(&event);
    payload
}

fn finish_success(
    mut body: Value,
    path: &str,
    started: Instant,
    event: &mut QueryEvent,
    analytics: &dyn AnalyticsSink,
) -> Value {
    if is_token_listing_path(path) {
        let redacted = redact_token_values(&mut body);
        info!(path = %path, redacted, "redacted token values in response");
    }
    event.status = Some(200);
    event.elapsed_ms = elapsed_ms(started);
    event.result_count = body
        .pointer("/$meta/pagination/total")
        .and_then(Value::as_u64);
    analytics.record(event);
    body
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn substitute_path_params(template: &str, params: Option<&BTreeMap<String, Value>>) -> String {
    let mut path = template.to_string();
    for (name, value) in params.into_iter().flatten() {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        path = path.replace(&format!("{{{name}}}"), &value);
    }
    path
}

fn unknown_resource(registry: &RegistrySnapshot, resource: &str) -> Value {
    let needle = resource.to_lowercase();
    let suggestions: Vec<&String> = registry
        .resources()
        .keys()
        .filter(|id| {
            let id = id.to_lowercase();
            id.contains(&needle) || needle.contains(&id)
        })
        .take(MAX_SUGGESTIONS)
        .collect();

    let mut out = json!({
        "error": format!("Unknown resource: '{resource}'"),
        "hint": "Use marketplace_resources() to see all available resources",
        "available_categories": registry.categories(),
    });
    if !suggestions.is_empty() {
        out["did_you_mean"] = json!(suggestions);
    }
    out
}

fn missing_path_params(resource: &str, template: &str, missing: &[&str]) -> Value {
    let example: Vec<String> = missing
        .iter()
        .map(|p| {
            let value = example_id(p).map_or_else(|| format!("<{p}_value>"), str::to_string);
            format!("'{p}': '{value}'")
        })
        .collect();
    let hint: Vec<String> = missing
        .iter()
        .map(|p| format!("'{p}': '{}'", example_id(p).unwrap_or("value")))
        .collect();

    json!({
        "error": format!("This resource requires path parameters: {}", missing.join(", ")),
        "resource": resource,
        "path_template": template,
        "example": format!(
            "marketplace_query(resource='{resource}', path_params={{{}}}, limit=10)",
            example.join(", ")
        ),
        "hint": format!(
            "You must provide path_params dictionary. For example: path_params={{{}}}",
            hint.join(", ")
        ),
    })
}

fn error_payload(err: &HttpToolsError, resource: &str, path: &str) -> Value {
    let mut out = Map::new();
    out.insert("error".into(), json!(err.to_string()));
    out.insert("resource".into(), json!(resource));
    out.insert("path".into(), json!(path));

    if let HttpToolsError::Status {
        status, url, body, ..
    } = err
    {
        out.insert("status_code".into(), json!(status));
        out.insert("request_url".into(), json!(url));
        match serde_json::from_str::<Value>(body) {
            Ok(details) => {
                if *status == 400 && is_audit_expression_error(&details) {
                    out.insert("hint".into(), json!(AUDIT_SELECT_HINT));
                }
                out.insert("api_error_details".into(), details);
            }
            Err(_) => {
                out.insert(
                    "api_error_text".into(),
                    json!(truncate_chars(body, MAX_ERROR_TEXT_CHARS)),
                );
            }
        }
    }
    Value::Object(out)
}

/// `{"errors": {field: ["Unknown expression group ..."]}}` where the field or a message
/// mentions audit.
fn is_audit_expression_error(details: &Value) -> bool {
    let Some(errors) = details.get("errors").and_then(Value::as_object) else {
        return false;
    };
    errors.iter().any(|(field, messages)| {
        let Some(messages) = messages.as_array() else {
            return false;
        };
        let texts: Vec<String> = messages
            .iter()
            .map(|m| match m {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        texts.iter().any(|t| t.contains("Unknown expression group"))
            && (field.to_lowercase().contains("audit")
                || texts.iter().any(|t| t.to_lowercase().contains("audit")))
    })
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
