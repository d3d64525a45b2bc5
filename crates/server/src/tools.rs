//! Tool definitions and argument parsing.

use rmcp::ErrorData;
use rmcp::model::{JsonObject, Tool, ToolAnnotations};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

pub const QUERY: &str = "marketplace_query";
pub const QUICK_QUERIES: &str = "marketplace_quick_queries";
pub const RESOURCES: &str = "marketplace_resources";
pub const RESOURCE_INFO: &str = "marketplace_resource_info";
pub const RESOURCE_SCHEMA: &str = "marketplace_resource_schema";
pub const AUDIT_FIELDS: &str = "marketplace_audit_fields";

const QUERY_DESCRIPTION: &str = "Query the marketplace API using Resource Query Language (RQL).\n\n\
Arguments:\n\
- resource: resource id from marketplace_resources(), e.g. catalog.products or commerce.orders.\n\
- rql: RQL filter sent as the raw query string, e.g. eq(status,Active), ilike(name,*Microsoft*), \
and(eq(status,Active),gt(price,100)). Dates are UTC (YYYY-MM-DDTHH:MM:SS.mmmZ).\n\
- limit: max items (default 10, capped at 100). With large limits select only the fields you need.\n\
- offset / page: pagination.\n\
- select: fields to include or exclude, e.g. +name,+description or -metadata. Include 'audit' to get \
audit timestamps. Nested: +subscriptions, +subscriptions.id,+subscriptions.name.\n\
- order: e.g. -audit.created.at or +name. Ordering by audit fields needs 'audit' in select.\n\
- path_params: values for path placeholders, e.g. {\"id\": \"PRD-1234-5678\"} for catalog.products.by_id.\n\n\
Use marketplace_resource_schema(resource) to check which fields exist before filtering.";

/// Arguments of tools that take one resource id.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceArgs {
    pub resource: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFieldsArgs {
    #[serde(default)]
    pub resource: Option<String>,
}

/// Deserialize tool arguments; absent arguments deserialize from `{}`.
///
/// # Errors
///
/// Returns `invalid_params` when the arguments do not match `T`.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Option<JsonObject>) -> Result<T, ErrorData> {
    let value = Value::Object(args.unwrap_or_default());
    serde_json::from_value(value).map_err(|e| {
        ErrorData::invalid_params(format!("invalid arguments for {tool}: {e}"), None)
    })
}

fn read_only() -> ToolAnnotations {
    ToolAnnotations {
        title: None,
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(true),
    }
}

fn tool(name: &'static str, description: &'static str, schema: Value, open_world: bool) -> Tool {
    let schema = match schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    };
    let mut tool = Tool::new(name, description, Arc::new(schema));
    let mut annotations = read_only();
    annotations.open_world_hint = Some(open_world);
    tool.annotations = Some(annotations);
    tool
}

fn resource_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "resource": { "type": "string", "description": description },
        },
        "required": ["resource"],
    })
}

/// Every tool the server exposes, in listing order.
#[must_use]
pub fn definitions() -> Vec<Tool> {
    vec![
        tool(
            QUERY,
            QUERY_DESCRIPTION,
            json!({
                "type": "object",
                "properties": {
                    "resource": {
                        "type": "string",
                        "description": "Resource id, e.g. catalog.products or commerce.orders",
                    },
                    "rql": { "type": "string", "description": "RQL filter expression", "default": "" },
                    "limit": { "type": "integer", "description": "Max items (default 10, max 100)" },
                    "offset": { "type": "integer", "description": "Items to skip" },
                    "page": { "type": "integer", "description": "Page number (alternative to offset)" },
                    "select": { "type": "string", "description": "Fields to include (+field) or exclude (-field)" },
                    "order": { "type": "string", "description": "Sort order, e.g. -audit.created.at" },
                    "path_params": {
                        "type": "object",
                        "description": "Values for path placeholders such as id or orderId",
                        "additionalProperties": { "type": "string" },
                    },
                },
                "required": ["resource"],
            }),
            true,
        ),
        tool(
            QUICK_QUERIES,
            "Ready-to-use query templates for common tasks (orders, products, agreements, subscriptions, accounts) plus RQL tips.",
            json!({ "type": "object", "properties": {} }),
            false,
        ),
        tool(
            RESOURCES,
            "List every queryable resource grouped by category, with filterable fields and example queries.",
            json!({ "type": "object", "properties": {} }),
            true,
        ),
        tool(
            RESOURCE_INFO,
            "Parameters, enum values, related resources and example queries for one resource.",
            resource_schema("Resource id, e.g. commerce.orders"),
            true,
        ),
        tool(
            RESOURCE_SCHEMA,
            "Field-level response schema for one resource with types, enum values and filtering hints.",
            resource_schema("Resource id, e.g. catalog.products"),
            true,
        ),
        tool(
            AUDIT_FIELDS,
            "Audit timestamp events (created, updated, ...) available per resource. Filter or sort on \
them as audit.<event>.at and include 'audit' in select.",
            json!({
                "type": "object",
                "properties": {
                    "resource": {
                        "type": "string",
                        "description": "Resource id; omit to list every resource",
                    },
                },
            }),
            true,
        ),
    ]
}
