//! Extraction of GET operations from an `OpenAPI` document.
//!
//! Every GET operation becomes an [`EndpointDescriptor`]: the raw path template, a sanitized
//! operation id, typed parameters, a caller-facing input schema (declared query parameters plus
//! the synthetic `rql`/`limit`/`offset`/`page` contract) and a display-only simplified response
//! schema.

use crate::config::{API_PREFIX, PathFilter};
use crate::resolver::SchemaResolver;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

const MAX_TOOL_NAME_LEN: usize = 64;
const SIMPLIFY_MAX_DEPTH: usize = 3;
const SIMPLIFY_MAX_PROPERTIES: usize = 10;

static INVALID_NAME_CHARS: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex"));

const RQL_DESCRIPTION: &str = "RQL (Resource Query Language) expression for filtering, sorting \
and field selection. This is NOT a `rql=` query parameter: the value becomes the raw query string \
after '?', so 'eq(status,Failed)' is sent as '/endpoint?eq(status,Failed)'.\n\n\
Operators: eq, ne, gt, ge, lt, le, ilike (use * as wildcard), in(field,(a,b)), out(field,(a,b)).\n\
Logic: and(c1,c2,...), or(c1,c2,...), not(c).\n\
Sorting: order=+field or order=-field (not sort=).\n\
Projection: select=+field,-field; select=audit includes the audit object.\n\
Special values: empty(), null().\n\
IDs such as ACC-xxx or PRD-xxx must be double-quoted: eq(buyer.id,\"ACC-4402-5918\").\n\n\
Examples:\n\
- 'ilike(name,*Teams*)'\n\
- 'and(eq(status,Failed),or(eq(type,A),eq(type,B)))'\n\
- 'and(eq(vendor.id,\"ACC-123\"),gt(audit.created.at,2024-11-01))&order=-audit.created.at'\n\n\
Date fields live in the 'audit' object; filtering or sorting on them requires select=audit. \
Filter fields must exist on the resource; check marketplace_resource_schema(resource).";

const LIMIT_DESCRIPTION: &str = "Maximum number of items to return (pagination, capped at 100). \
For large limits select only the fields you need, otherwise the response may not fit the context.";

/// Where an operation parameter lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Path,
    Header,
    Cookie,
}

impl ParamLocation {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "query" => Some(Self::Query),
            "path" => Some(Self::Path),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }
}

/// One declared operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    pub schema: Value,
}

impl ParameterSpec {
    /// Enum values declared on the parameter's schema.
    #[must_use]
    pub fn enum_values(&self) -> Option<&Vec<Value>> {
        self.schema.get("enum").and_then(Value::as_array)
    }

    #[must_use]
    pub fn schema_type(&self) -> &str {
        self.schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("string")
    }
}

/// `200` response summary kept for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Immutable description of one GET operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointDescriptor {
    pub resource_id: String,
    pub operation_id: String,
    pub path: String,
    pub summary: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub input_schema: Value,
    pub response: ResponseInfo,
}

impl EndpointDescriptor {
    pub fn query_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Query)
    }

    pub fn path_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Path)
    }
}

/// Map an API path to its dotted resource id.
///
/// `/public/v1/catalog/items/{id}` becomes `catalog.items.by_id`; other placeholders such as
/// `{orderId}` are kept verbatim. Both the registry and the audit index key on this value.
#[must_use]
pub fn derive_resource_id(path: &str) -> String {
    path.replace(API_PREFIX, "")
        .replace("/{id}", ".by_id")
        .replace('/', ".")
}

/// Conform a name to `^[a-zA-Z0-9_-]{1,64}$`.
#[must_use]
pub fn sanitize_tool_name(name: &str) -> String {
    let replaced = INVALID_NAME_CHARS.replace_all(name, "_");
    let trimmed: String = replaced
        .trim_matches('_')
        .chars()
        .take(MAX_TOOL_NAME_LEN)
        .collect();
    if trimmed.is_empty() {
        "tool".to_string()
    } else {
        trimmed
    }
}

/// Extract every GET operation whose path passes `filter`.
#[must_use]
pub fn extract_get_endpoints(spec: &Value, filter: &PathFilter) -> Vec<EndpointDescriptor> {
    let Some(paths) = spec.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };
    let resolver = SchemaResolver::new(spec);

    paths
        .iter()
        .filter(|(path, _)| filter.allows(path))
        .filter_map(|(path, item)| {
            let op = item.get("get")?.as_object()?;
            Some(describe_operation(&resolver, path, op))
        })
        .collect()
}

fn describe_operation(
    resolver: &SchemaResolver<'_>,
    path: &str,
    op: &Map<String, Value>,
) -> EndpointDescriptor {
    let text = |key: &str| op.get(key).and_then(Value::as_str).map(str::to_string);

    let raw_operation_id = text("operationId")
        .unwrap_or_else(|| path.replace('/', "_").trim_matches('_').to_string());
    let parameters: Vec<ParameterSpec> = op
        .get("parameters")
        .and_then(Value::as_array)
        .map(|params| {
            params
                .iter()
                .filter_map(|p| parse_parameter(resolver, p))
                .collect()
        })
        .unwrap_or_default();

    EndpointDescriptor {
        resource_id: derive_resource_id(path),
        operation_id: sanitize_tool_name(&raw_operation_id),
        path: path.to_string(),
        summary: text("summary").unwrap_or_else(|| format!("GET {path}")),
        description: text("description").unwrap_or_default(),
        input_schema: build_input_schema(&parameters),
        response: extract_response_info(op),
        parameters,
    }
}

fn parse_parameter(resolver: &SchemaResolver<'_>, raw: &Value) -> Option<ParameterSpec> {
    // Parameters may themselves be `$ref`s into `#/components/parameters`.
    let param = match raw.get("$ref").and_then(Value::as_str) {
        Some(r) => resolver.lookup_ref(r)?,
        None => raw,
    };
    let name = param.get("name")?.as_str().filter(|n| !n.is_empty())?;
    let location = ParamLocation::parse(param.get("in")?.as_str()?)?;
    Some(ParameterSpec {
        name: name.to_string(),
        location,
        required: param
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(location == ParamLocation::Path),
        description: param
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        example: param.get("example").cloned(),
        schema: param.get("schema").cloned().unwrap_or_else(|| json!({})),
    })
}

/// Caller-facing JSON schema: declared query/cookie parameters plus the synthetic contract.
fn build_input_schema(parameters: &[ParameterSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in parameters
        .iter()
        .filter(|p| !matches!(p.location, ParamLocation::Path | ParamLocation::Header))
    {
        let schema = &param.schema;
        let mut description = param
            .description
            .clone()
            .unwrap_or_else(|| format!("Query parameter: {}", param.name));
        let mut prop = Map::new();
        prop.insert("type".into(), json!(param.schema_type()));

        if let Some(values) = param.enum_values() {
            let listed: Vec<String> = values.iter().map(display_value).collect();
            description.push_str(&format!("\n\n**Valid values:** {}", listed.join(", ")));
            prop.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(example) = schema.get("example").or(param.example.as_ref()) {
            prop.insert("example".into(), example.clone());
        }
        for key in ["format", "minimum", "maximum"] {
            if let Some(v) = schema.get(key) {
                prop.insert(key.into(), v.clone());
            }
        }
        prop.insert("description".into(), Value::String(description));
        properties.insert(param.name.clone(), Value::Object(prop));

        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    add_synthetic_params(&mut properties);

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": true,
    })
}

fn add_synthetic_params(properties: &mut Map<String, Value>) {
    let synthetic = [
        ("rql", json!({ "type": "string", "description": RQL_DESCRIPTION })),
        ("limit", json!({ "type": "integer", "description": LIMIT_DESCRIPTION })),
        (
            "offset",
            json!({ "type": "integer", "description": "Number of items to skip (pagination)" }),
        ),
        (
            "page",
            json!({ "type": "integer", "description": "Page number (alternative to offset)" }),
        ),
    ];
    for (name, schema) in synthetic {
        properties.entry(name).or_insert(schema);
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn extract_response_info(op: &Map<String, Value>) -> ResponseInfo {
    let Some(ok) = op.get("responses").and_then(|r| r.get("200")) else {
        return ResponseInfo::default();
    };
    ResponseInfo {
        description: Some(
            ok.get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        schema: ok
            .get("content")
            .and_then(|c| c.get("application/json"))
            .and_then(|c| c.get("schema"))
            .map(simplify_schema),
    }
}

/// Depth- and width-capped projection of a schema for display.
///
/// References are left unresolved. Never use the output for validation.
#[must_use]
pub fn simplify_schema(schema: &Value) -> Value {
    simplify_at(schema, 0)
}

fn simplify_at(schema: &Value, depth: usize) -> Value {
    let truncated = || json!({ "type": "object", "description": "..." });
    let Some(map) = schema.as_object() else {
        return truncated();
    };
    if depth >= SIMPLIFY_MAX_DEPTH || map.is_empty() {
        return truncated();
    }

    let mut out = Map::new();
    for key in ["type", "description", "enum"] {
        if let Some(v) = map.get(key) {
            out.insert(key.into(), v.clone());
        }
    }
    if let Some(props) = map.get("properties").and_then(Value::as_object) {
        let simplified: Map<String, Value> = props
            .iter()
            .take(SIMPLIFY_MAX_PROPERTIES)
            .map(|(k, v)| (k.clone(), simplify_at(v, depth + 1)))
            .collect();
        out.insert("properties".into(), Value::Object(simplified));
    }
    if let Some(items) = map.get("items") {
        out.insert("items".into(), simplify_at(items, depth + 1));
    }
    if let Some(example) = map.get("example") {
        out.insert("example".into(), example.clone());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_test_support::marketplace_spec;

    fn by_path<'a>(eps: &'a [EndpointDescriptor], path: &str) -> &'a EndpointDescriptor {
        eps.iter()
            .find(|e| e.path == path)
            .unwrap_or_else(|| panic!("missing {path}"))
    }

    #[test]
    fn resource_ids() {
        assert_eq!(
            derive_resource_id("/public/v1/catalog/products"),
            "catalog.products"
        );
        assert_eq!(
            derive_resource_id("/public/v1/catalog/items/{id}"),
            "catalog.items.by_id"
        );
        assert_eq!(
            derive_resource_id("/public/v1/commerce/orders/{orderId}/lines"),
            "commerce.orders.{orderId}.lines"
        );
    }

    #[test]
    fn tool_names_are_sanitized() {
        assert_eq!(sanitize_tool_name("list products!"), "list_products");
        assert_eq!(sanitize_tool_name("__x__"), "x");
        assert_eq!(sanitize_tool_name("///"), "tool");
        assert_eq!(sanitize_tool_name(&"a".repeat(80)).len(), 64);
    }

    #[test]
    fn only_get_operations_are_extracted() {
        let spec = marketplace_spec();
        let eps = extract_get_endpoints(&spec, &PathFilter::default());
        assert_eq!(eps.len(), 6);
        assert!(eps.iter().all(|e| e.path != "/public/v1/notifications/batches"));
    }

    #[test]
    fn filters_apply_before_extraction() {
        let spec = marketplace_spec();
        let eps = extract_get_endpoints(&spec, &PathFilter::from_csv("commerce", "lines"));
        let mut ids: Vec<_> = eps.iter().map(|e| e.resource_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["commerce.agreements", "commerce.orders"]);
    }

    #[test]
    fn input_schema_has_query_params_and_synthetic_contract() {
        let spec = marketplace_spec();
        let eps = extract_get_endpoints(&spec, &PathFilter::default());
        let products = by_path(&eps, "/public/v1/catalog/products");
        let props = &products.input_schema["properties"];

        assert!(props.get("X-Trace").is_none());
        assert_eq!(props["status"]["enum"], json!(["Draft", "Published", "Unpublished"]));
        assert!(
            props["status"]["description"]
                .as_str()
                .is_some_and(|d| d.ends_with("**Valid values:** Draft, Published, Unpublished"))
        );
        assert_eq!(props["name"]["example"], "Teams");
        assert_eq!(props["name"]["description"], "Filter by name");
        for synthetic in ["rql", "limit", "offset", "page"] {
            assert!(props.get(synthetic).is_some(), "{synthetic}");
        }
        assert_eq!(products.input_schema["additionalProperties"], true);

        let by_id = by_path(&eps, "/public/v1/catalog/products/{id}");
        assert!(by_id.input_schema["properties"].get("id").is_none());
        assert_eq!(by_id.path_parameters().count(), 1);
    }

    #[test]
    fn defaults_for_missing_operation_metadata() {
        let spec = marketplace_spec();
        let eps = extract_get_endpoints(&spec, &PathFilter::default());
        let orders = by_path(&eps, "/public/v1/commerce/orders");
        assert_eq!(orders.operation_id, "public_v1_commerce_orders");
        assert_eq!(orders.summary, "List orders");
        assert_eq!(orders.description, "");

        let lines = by_path(&eps, "/public/v1/commerce/orders/{orderId}/lines");
        assert_eq!(lines.operation_id, "public_v1_commerce_orders__orderId__lines");
    }

    #[test]
    fn simplified_schema_is_capped() {
        let mut props = Map::new();
        for i in 0..15 {
            props.insert(format!("f{i:02}"), json!({ "type": "string" }));
        }
        let wide = json!({ "type": "object", "properties": props });
        assert_eq!(
            simplify_schema(&wide)["properties"]
                .as_object()
                .map(Map::len),
            Some(10)
        );

        let deep = json!({ "properties": { "a": { "properties": { "b": { "properties": {
            "c": { "type": "string" } } } } } } });
        assert_eq!(
            simplify_schema(&deep)["properties"]["a"]["properties"]["b"]["properties"]["c"],
            json!({ "type": "object", "description": "..." })
        );
        assert_eq!(
            simplify_schema(&json!({})),
            json!({ "type": "object", "description": "..." })
        );
    }

    #[test]
    fn response_info_keeps_only_200_json() {
        let spec = marketplace_spec();
        let eps = extract_get_endpoints(&spec, &PathFilter::default());
        let products = by_path(&eps, "/public/v1/catalog/products");
        assert_eq!(products.response.description.as_deref(), Some("Product page"));
        // Display projection leaves the `$ref` unresolved, so nothing survives.
        assert_eq!(products.response.schema, Some(json!({})));

        let lines = by_path(&eps, "/public/v1/commerce/orders/{orderId}/lines");
        assert_eq!(
            lines.response.schema,
            Some(json!({ "type": "array", "items": {} }))
        );
    }
}
