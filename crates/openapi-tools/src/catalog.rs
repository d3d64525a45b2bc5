//! Discovery payloads: the categorized resource catalog, per-resource details and field-level
//! schemas. Everything here is derived from a [`RegistrySnapshot`] and never touches the network.

use crate::parser::EndpointDescriptor;
use crate::registry::RegistrySnapshot;
use crate::resolver::SchemaResolver;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

const MAX_FILTERABLE_FIELDS: usize = 5;
const MAX_CHILDREN: usize = 10;
const MAX_SIMILAR: usize = 5;
const MAX_NESTED_FIELDS: usize = 5;
const MAX_SIMPLE_FILTERS: usize = 5;
const MAX_SEARCH_CANDIDATES: usize = 3;
const MAX_ENUM_FILTERS: usize = 3;

const RESOURCES_HINT: &str = "Use marketplace_resources() to see all available resources";

const SEARCHABLE_SUFFIXES: [&str; 3] = [".products", ".items", ".vendors"];

fn unknown_resource(resource: &str) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("error".into(), json!(format!("Unknown resource: {resource}")));
    out.insert("hint".into(), json!(RESOURCES_HINT));
    out
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Declared query enums, keyed by parameter name.
fn query_enums(endpoint: &EndpointDescriptor) -> BTreeMap<&str, &Vec<Value>> {
    endpoint
        .query_parameters()
        .filter_map(|p| p.enum_values().map(|values| (p.name.as_str(), values)))
        .collect()
}

fn catalog_entry(endpoint: &EndpointDescriptor) -> Value {
    let id = endpoint.resource_id.as_str();
    let filterable: Vec<&str> = endpoint
        .query_parameters()
        .map(|p| p.name.as_str())
        .filter(|n| !n.is_empty())
        .collect();
    let enums = query_enums(endpoint);

    let mut examples = vec![format!("marketplace_query(resource='{id}', limit=10)")];
    if filterable.contains(&"status") || enums.keys().any(|k| k.contains("status")) {
        let status = enums
            .get("status")
            .and_then(|values| values.first())
            .map_or_else(|| "Active".to_string(), value_text);
        examples.push(format!(
            "marketplace_query(resource='{id}', rql='eq(status,{status})', limit=20)"
        ));
    }
    if filterable.contains(&"name") || SEARCHABLE_SUFFIXES.iter().any(|s| id.ends_with(s)) {
        examples.push(format!(
            "marketplace_query(resource='{id}', rql='ilike(name,*keyword*)', limit=10)"
        ));
    }

    let mut entry = Map::new();
    entry.insert("resource".into(), json!(id));
    entry.insert("summary".into(), json!(endpoint.summary));
    entry.insert("path".into(), json!(endpoint.path));
    if !endpoint.description.is_empty() {
        entry.insert("description".into(), json!(endpoint.description));
    }
    if !filterable.is_empty() {
        let first: Vec<&str> = filterable.into_iter().take(MAX_FILTERABLE_FIELDS).collect();
        entry.insert("filterable_fields".into(), json!(first));
    }
    if !enums.is_empty() {
        entry.insert("enum_fields".into(), json!(enums));
    }
    entry.insert("example_queries".into(), json!(examples));
    entry.insert(
        "get_full_schema".into(),
        json!(format!("marketplace_resource_schema(resource='{id}')")),
    );
    Value::Object(entry)
}

/// Categorized catalog of every registered resource with ready-to-run example queries.
#[must_use]
pub fn list_resources(
    api_base_url: &str,
    user_id: Option<&str>,
    snapshot: &RegistrySnapshot,
) -> Value {
    let mut categories: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for (id, endpoint) in snapshot.resources() {
        let category = id.split('.').next().unwrap_or(id);
        categories
            .entry(category)
            .or_default()
            .push(catalog_entry(endpoint));
    }

    json!({
        "api_endpoint": api_base_url,
        "user": user_id.unwrap_or("unknown"),
        "total_resources": snapshot.len(),
        "categories": categories,
        "usage": {
            "query_resource": "Use marketplace_query(resource='category.resource', ...) to query any resource",
            "get_schema": "Use marketplace_resource_schema(resource='...') to see full field list and types",
            "get_details": "Use marketplace_resource_info(resource='...') for parameter details",
        },
        "tips": {
            "filtering": "Use RQL for complex filters: eq(field,value), ilike(name,*keyword*), and(condition1,condition2)",
            "pagination": "Use limit= and offset= parameters for pagination. Maximum limit is 100 (values above 100 are capped). \
With large limits use select= with only the fields you need (see marketplace_resource_schema), otherwise the response may exceed the context limit.",
            "sorting": "Use order= parameter: order=-created (descending), order=+name (ascending)",
            "field_selection": "Use select= parameter: select=+id,+name,+status or select=-metadata. \
Many fields are omitted by default (see $meta.omitted in responses); use select=+field to include them, e.g. lines, parameters, subscriptions. \
For nested collections +subscriptions returns full items, while +subscriptions.id,+subscriptions.name returns only those fields per item. \
RQL filter fields must exist on the resource; check with marketplace_resource_schema(resource).",
        },
    })
}

#[derive(Default)]
struct Related {
    parent: Option<(usize, Value)>,
    children: Vec<Value>,
    similar: Vec<Value>,
}

fn related_resources(endpoint: &EndpointDescriptor, snapshot: &RegistrySnapshot) -> Related {
    let id = endpoint.resource_id.as_str();
    let path = endpoint.path.as_str();
    let parts: Vec<&str> = id.split('.').collect();
    let mut related = Related::default();

    for (other_id, other) in snapshot.resources() {
        if other_id == id {
            continue;
        }
        let other_path = other.path.as_str();
        let brief = || json!({ "resource": other_id, "summary": other.summary });

        if other_path
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('/'))
            && other_id
                .strip_prefix(id)
                .is_some_and(|rest| rest.starts_with('.'))
        {
            related.children.push(brief());
        }

        let is_ancestor = path
            .strip_prefix(other_path)
            .is_some_and(|rest| rest.starts_with('/'))
            && id
                .strip_prefix(other_id.as_str())
                .is_some_and(|rest| rest.starts_with('.'));
        if is_ancestor && related.parent.as_ref().is_none_or(|(len, _)| other_path.len() > *len) {
            related.parent = Some((
                other_path.len(),
                json!({ "resource": other_id, "summary": other.summary, "path": other_path }),
            ));
        }

        let other_parts: Vec<&str> = other_id.split('.').collect();
        if parts.len() >= 2
            && parts.len() == other_parts.len()
            && parts[..2] == other_parts[..2]
        {
            related.similar.push(brief());
        }
    }

    related.children.truncate(MAX_CHILDREN);
    related.similar.truncate(MAX_SIMILAR);
    related
}

/// Parameters, enum values, related resources and example calls for one resource.
#[must_use]
pub fn resource_info(resource: &str, snapshot: &RegistrySnapshot) -> Value {
    let Some(endpoint) = snapshot.get(resource) else {
        return Value::Object(unknown_resource(resource));
    };

    let enums = query_enums(endpoint);
    let path_params: Map<String, Value> = endpoint
        .path_parameters()
        .map(|p| {
            let description = p
                .description
                .clone()
                .unwrap_or_else(|| format!("Path parameter: {}", p.name));
            (
                p.name.clone(),
                json!({
                    "type": p.schema_type(),
                    "description": description,
                    "required": p.required,
                }),
            )
        })
        .collect();

    let mut examples = vec![format!("marketplace_query(resource='{resource}', limit=10)")];
    if let Some((field, value)) = enums
        .iter()
        .find_map(|(field, values)| values.first().map(|v| (field, v)))
    {
        examples.push(format!(
            "marketplace_query(resource='{resource}', rql='eq({field},{})', limit=10)",
            value_text(value)
        ));
    }
    if !path_params.is_empty() {
        let placeholders: Map<String, Value> = path_params
            .keys()
            .map(|k| (k.clone(), json!(format!("<{k}_value>"))))
            .collect();
        examples.push(format!(
            "marketplace_query(resource='{resource}', path_params={}, select='+id,+name')",
            Value::Object(placeholders)
        ));
    }

    let mut out = Map::new();
    out.insert("resource".into(), json!(resource));
    out.insert("path".into(), json!(endpoint.path));
    out.insert("summary".into(), json!(endpoint.summary));
    out.insert("description".into(), json!(endpoint.description));
    out.insert("parameters".into(), json!(endpoint.parameters));
    out.insert("response_schema".into(), json!(endpoint.response));
    out.insert(
        "common_parameters".into(),
        json!({
            "rql": "RQL query string for filtering and sorting",
            "limit": "Maximum number of items to return",
            "offset": "Number of items to skip",
            "page": "Page number",
            "select": "Fields to include/exclude. Use select=+field to include fields omitted by default (see $meta.omitted in responses), e.g. select=+lines,+parameters.",
            "order": "Sort order (e.g., -created for descending, +name for ascending)",
            "path_params": "Dictionary of path parameters (e.g., {id: PRD-1234-5678})",
        }),
    );
    out.insert(
        "omitted_fields_note".into(),
        json!("Many resources omit certain fields by default for performance. Check $meta.omitted in query responses to see which fields are available but not included. Use select=+field to include them."),
    );
    out.insert("example_queries".into(), json!(examples));

    if let Some(first) = enums.keys().next() {
        let names: Vec<&str> = enums.keys().copied().collect();
        out.insert(
            "filtering_tips".into(),
            json!(format!(
                "Filter by {} using RQL: eq({first},<value>)",
                names.join(", ")
            )),
        );
        out.insert("enum_fields".into(), json!(enums));
    }

    if !path_params.is_empty() {
        let list: Vec<String> = path_params.keys().map(|k| format!("{k}=<value>")).collect();
        out.insert(
            "path_params_required".into(),
            json!(format!(
                "This resource requires path parameters: {}",
                list.join(", ")
            )),
        );
        out.insert("path_parameters".into(), Value::Object(path_params));
    }

    let related = related_resources(endpoint, snapshot);
    let mut rel = Map::new();
    if let Some((_, parent)) = related.parent {
        rel.insert("parent".into(), parent);
    }
    if !related.children.is_empty() {
        rel.insert("children".into(), json!(related.children));
    }
    if !related.similar.is_empty() {
        rel.insert("similar".into(), json!(related.similar));
    }
    if !rel.is_empty() {
        out.insert("related_resources".into(), Value::Object(rel));
    }

    Value::Object(out)
}

fn type_of<'a>(resolver: &SchemaResolver<'a>, schema: &'a Value) -> (&'a Value, String) {
    let resolved = resolver.resolve(schema);
    let ty = resolved
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| resolved.get("properties").map(|_| "object".to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    (resolved, ty)
}

fn description_of(schema: &Value, resolved: &Value) -> Value {
    schema
        .get("description")
        .or_else(|| resolved.get("description"))
        .cloned()
        .unwrap_or_else(|| json!(""))
}

fn field_info<'a>(resolver: &SchemaResolver<'a>, schema: &'a Value) -> Map<String, Value> {
    let (resolved, ty) = type_of(resolver, schema);
    let mut info = Map::new();
    info.insert("type".into(), json!(ty));
    info.insert("description".into(), description_of(schema, resolved));
    if let Some(values) = resolved.get("enum") {
        info.insert("enum".into(), values.clone());
        info.insert("valid_values".into(), values.clone());
    }
    for key in ["example", "format"] {
        if let Some(v) = resolved.get(key) {
            info.insert(key.into(), v.clone());
        }
    }
    if ty == "object"
        && let Some(props) = resolver.properties(resolved)
    {
        let nested: Map<String, Value> = props
            .iter()
            .take(MAX_NESTED_FIELDS)
            .map(|(name, nested_schema)| {
                let (nested_resolved, nested_ty) = type_of(resolver, nested_schema);
                (
                    name.clone(),
                    json!({
                        "type": nested_ty,
                        "description": description_of(nested_schema, nested_resolved),
                    }),
                )
            })
            .collect();
        info.insert("nested_fields".into(), Value::Object(nested));
    }
    info
}

fn schema_payload(resource: &str, endpoint: &EndpointDescriptor, spec: &Value) -> Value {
    let path = endpoint.path.as_str();
    let Some(path_item) = spec.get("paths").and_then(|p| p.get(path)) else {
        return json!({
            "error": format!("Path {path} not found in OpenAPI spec"),
            "resource": resource,
        });
    };
    let Some(operation) = path_item.get("get") else {
        return json!({
            "error": format!("GET operation not found for {path}"),
            "resource": resource,
        });
    };

    let text = |key: &str| {
        operation
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let mut out = Map::new();
    out.insert("resource".into(), json!(resource));
    out.insert("path".into(), json!(path));
    out.insert("summary".into(), json!(text("summary")));
    out.insert("description".into(), json!(text("description")));

    let resolver = SchemaResolver::new(spec);
    if let Some(schema) = resolver.get_response_schema(path) {
        out.insert("response_schema".into(), resolver.resolve(schema).clone());

        if let Some(props) = resolver.properties(resolver.item_schema(schema)) {
            let fields: Map<String, Value> = props
                .iter()
                .map(|(name, field)| (name.clone(), Value::Object(field_info(&resolver, field))))
                .collect();

            let simple: Vec<String> = fields
                .keys()
                .take(MAX_SIMPLE_FILTERS)
                .map(|f| format!("eq({f},value)"))
                .collect();
            let search: Vec<String> = fields
                .iter()
                .take(MAX_SEARCH_CANDIDATES)
                .filter(|(_, info)| info["type"] == "string")
                .map(|(f, _)| format!("ilike({f},*keyword*)"))
                .collect();
            let enum_filters: Vec<String> = fields
                .iter()
                .filter_map(|(f, info)| {
                    info.get("enum")
                        .and_then(|e| e.get(0))
                        .map(|v| format!("eq({f},{})", value_text(v)))
                })
                .take(MAX_ENUM_FILTERS)
                .collect();

            out.insert("fields".into(), Value::Object(fields));
            out.insert(
                "filtering_hints".into(),
                json!({
                    "simple_filters": simple,
                    "search_fields": search,
                    "enum_filters": enum_filters,
                }),
            );
        }
    }

    out.insert(
        "common_queries".into(),
        json!({
            "basic": format!("{resource}?limit=10"),
            "with_filters": format!("{resource}?eq(status,Active)&limit=20"),
            "with_sorting": format!("{resource}?order=-id&limit=10"),
            "full_example": format!("{resource}?eq(status,Active)&order=-id&select=+id,+name,+status&limit=50"),
        }),
    );
    Value::Object(out)
}

/// Field-level schema of the entity a resource returns, with filtering hints.
#[must_use]
pub fn resource_schema(resource: &str, snapshot: &RegistrySnapshot) -> Value {
    match snapshot.get(resource) {
        Some(endpoint) => schema_payload(resource, endpoint, snapshot.spec()),
        None => {
            let mut out = unknown_resource(resource);
            out.insert(
                "available_categories".into(),
                json!(snapshot.categories()),
            );
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathFilter;
    use marketplace_test_support::marketplace_spec;

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::build(marketplace_spec(), &PathFilter::default())
    }

    fn strings(v: &Value) -> Vec<String> {
        let mut out: Vec<String> = v
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn entry<'a>(catalog: &'a Value, category: &str, resource: &str) -> &'a Value {
        catalog["categories"][category]
            .as_array()
            .and_then(|a| a.iter().find(|e| e["resource"] == resource))
            .unwrap_or(&Value::Null)
    }

    #[test]
    fn catalog_groups_by_first_segment() {
        let s = snapshot();
        let catalog = list_resources("https://api.example.com", None, &s);
        assert_eq!(catalog["user"], "unknown");
        assert_eq!(catalog["total_resources"], 6);
        assert_eq!(catalog["api_endpoint"], "https://api.example.com");
        let mut categories: Vec<&String> = catalog["categories"]
            .as_object()
            .map(|m| m.keys().collect())
            .unwrap_or_default();
        categories.sort();
        assert_eq!(categories, ["accounts", "catalog", "commerce"]);
        assert_eq!(catalog["categories"]["commerce"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn catalog_entry_examples_follow_parameters() {
        let s = snapshot();
        let catalog = list_resources("https://api.example.com", Some("USR-1"), &s);
        assert_eq!(catalog["user"], "USR-1");

        let products = entry(&catalog, "catalog", "catalog.products");
        assert_eq!(products["description"], "Products visible to the caller");
        assert_eq!(strings(&products["filterable_fields"]), ["name", "status"]);
        assert_eq!(
            products["enum_fields"]["status"],
            json!(["Draft", "Published", "Unpublished"])
        );
        let examples = strings(&products["example_queries"]);
        assert!(examples.contains(
            &"marketplace_query(resource='catalog.products', rql='eq(status,Draft)', limit=20)"
                .to_string()
        ));
        assert!(examples.iter().any(|e| e.contains("ilike(name,*keyword*)")));
        assert_eq!(
            products["get_full_schema"],
            "marketplace_resource_schema(resource='catalog.products')"
        );

        let orders = entry(&catalog, "commerce", "commerce.orders");
        assert!(orders.get("description").is_none());
        assert!(orders.get("filterable_fields").is_none());
        assert_eq!(
            orders["example_queries"],
            json!(["marketplace_query(resource='commerce.orders', limit=10)"])
        );

        let by_id = entry(&catalog, "catalog", "catalog.products.by_id");
        assert_eq!(by_id["example_queries"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn empty_snapshot_catalog() {
        let catalog = list_resources("https://x", None, &RegistrySnapshot::empty());
        assert_eq!(catalog["total_resources"], 0);
        assert_eq!(catalog["categories"], json!({}));
    }

    #[test]
    fn info_for_unknown_resource() {
        let info = resource_info("catalog.nope", &snapshot());
        assert_eq!(info["error"], "Unknown resource: catalog.nope");
        assert_eq!(info["hint"], RESOURCES_HINT);
    }

    #[test]
    fn info_lists_enums_children_and_examples() {
        let info = resource_info("catalog.products", &snapshot());
        assert_eq!(info["path"], "/public/v1/catalog/products");
        assert_eq!(info["summary"], "List products");
        assert_eq!(info["parameters"].as_array().map(Vec::len), Some(3));
        assert_eq!(info["response_schema"]["description"], "Product page");
        assert_eq!(
            info["filtering_tips"],
            "Filter by status using RQL: eq(status,<value>)"
        );
        assert!(info.get("path_parameters").is_none());
        assert_eq!(
            info["related_resources"]["children"],
            json!([{ "resource": "catalog.products.by_id", "summary": "Get product" }])
        );
        assert!(info["related_resources"].get("parent").is_none());
        assert_eq!(
            info["example_queries"][1],
            "marketplace_query(resource='catalog.products', rql='eq(status,Draft)', limit=10)"
        );
    }

    #[test]
    fn info_describes_path_parameters_and_parent() {
        let info = resource_info("commerce.orders.{orderId}.lines", &snapshot());
        assert_eq!(
            info["path_parameters"]["orderId"],
            json!({
                "type": "string",
                "description": "Path parameter: orderId",
                "required": true,
            })
        );
        assert_eq!(
            info["path_params_required"],
            "This resource requires path parameters: orderId=<value>"
        );
        assert_eq!(
            info["related_resources"]["parent"],
            json!({
                "resource": "commerce.orders",
                "summary": "List orders",
                "path": "/public/v1/commerce/orders",
            })
        );
        let last = info["example_queries"]
            .as_array()
            .and_then(|a| a.last())
            .and_then(Value::as_str)
            .unwrap_or_default();
        assert!(last.contains(r#"path_params={"orderId":"<orderId_value>"}"#), "{last}");
    }

    #[test]
    fn info_lists_similar_resources() {
        let info = resource_info("commerce.orders", &snapshot());
        // commerce.agreements differs in the second segment.
        assert!(info["related_resources"].get("similar").is_none());
        assert_eq!(
            info["related_resources"]["children"][0]["resource"],
            "commerce.orders.{orderId}.lines"
        );
    }

    #[test]
    fn schema_for_unknown_resource_lists_categories() {
        let out = resource_schema("nope", &snapshot());
        assert_eq!(out["error"], "Unknown resource: nope");
        assert_eq!(
            strings(&out["available_categories"]),
            ["accounts", "catalog", "commerce"]
        );
    }

    #[test]
    fn schema_describes_entity_fields() {
        let out = resource_schema("commerce.orders", &snapshot());
        assert_eq!(out["summary"], "List orders");
        let fields = &out["fields"];
        assert_eq!(fields["id"]["type"], "string");
        assert_eq!(
            fields["status"]["valid_values"],
            json!(["Draft", "Querying", "Processing", "Completed", "Failed"])
        );
        assert_eq!(fields["orderAudit"]["type"], "object");
        let mut nested: Vec<&String> = fields["orderAudit"]["nested_fields"]
            .as_object()
            .map(|m| m.keys().collect())
            .unwrap_or_default();
        nested.sort();
        assert_eq!(nested, ["created", "failed", "notes", "updated"]);
        assert_eq!(fields["price"]["nested_fields"]["PPxM"]["type"], "number");
        assert_eq!(
            out["filtering_hints"]["enum_filters"],
            json!(["eq(status,Draft)"])
        );
        assert_eq!(out["common_queries"]["basic"], "commerce.orders?limit=10");
    }

    #[test]
    fn schema_follows_allof_and_keeps_examples() {
        let out = resource_schema("catalog.products.by_id", &snapshot());
        let fields = &out["fields"];
        assert_eq!(fields["id"]["example"], "PRD-1234-5678");
        assert_eq!(fields["name"]["description"], "Product name");
        assert_eq!(fields["audit"]["type"], "object");
        assert!(out["filtering_hints"]["simple_filters"]
            .as_array()
            .is_some_and(|a| !a.is_empty() && a.len() <= MAX_SIMPLE_FILTERS));
    }

    #[test]
    fn schema_reports_paths_missing_from_document() {
        let s = snapshot();
        let endpoint = s.get("commerce.orders").cloned().expect("orders registered");
        let out = schema_payload("commerce.orders", &endpoint, &json!({ "paths": {} }));
        assert_eq!(
            out,
            json!({
                "error": "Path /public/v1/commerce/orders not found in OpenAPI spec",
                "resource": "commerce.orders",
            })
        );
        let no_get = json!({ "paths": { "/public/v1/commerce/orders": { "post": {} } } });
        let out = schema_payload("commerce.orders", &endpoint, &no_get);
        assert_eq!(
            out["error"],
            "GET operation not found for /public/v1/commerce/orders"
        );
    }
}
