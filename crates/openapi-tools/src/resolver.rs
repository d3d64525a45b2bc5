//! Local `$ref` / `allOf` resolution over a raw `OpenAPI` document.
//!
//! Specs downloaded from the platform lean on indirection everywhere: list endpoints return
//! `{ $meta, data: [ $ref ] }` envelopes, entities are composed with `allOf`, and nested objects
//! are `$ref`s into `#/components/schemas`. Every fragment is first classified into a
//! [`SchemaNode`] and resolution is a total function over that classification: it never fails,
//! it just stops at the first fragment it cannot take further.
//!
//! Only document-local references (`#/...`) are followed.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Keys under which list envelopes carry their items.
const ENVELOPE_KEYS: [&str; 3] = ["data", "items", "results"];

/// Guard against pathological `$ref` chains.
const MAX_REF_HOPS: usize = 32;

/// A schema fragment classified by how resolution treats it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaNode<'a> {
    /// `{"$ref": "..."}`; takes precedence over everything else in the fragment.
    Ref(&'a str),
    /// `{"allOf": [...]}`.
    AllOf(&'a [Value]),
    /// `{"type": "array", "items": ...}`; `items` may be missing.
    Array(Option<&'a Value>),
    /// A fragment with a `properties` map, with or without `type: object`.
    Object(&'a Map<String, Value>),
    /// Any other concrete schema (strings, numbers, property-less objects).
    Primitive(&'a Value),
    /// Not a JSON object at all.
    Unresolved,
}

impl<'a> SchemaNode<'a> {
    #[must_use]
    pub fn classify(v: &'a Value) -> Self {
        let Value::Object(map) = v else {
            return SchemaNode::Unresolved;
        };
        if let Some(r) = map.get("$ref").and_then(Value::as_str) {
            return SchemaNode::Ref(r);
        }
        if let Some(parts) = map.get("allOf").and_then(Value::as_array) {
            return SchemaNode::AllOf(parts);
        }
        if map.get("type").and_then(Value::as_str) == Some("array") {
            return SchemaNode::Array(map.get("items"));
        }
        if let Some(props) = map.get("properties").and_then(Value::as_object) {
            return SchemaNode::Object(props);
        }
        SchemaNode::Primitive(v)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaResolver<'a> {
    spec: &'a Value,
}

impl<'a> SchemaResolver<'a> {
    #[must_use]
    pub fn new(spec: &'a Value) -> Self {
        Self { spec }
    }

    /// Look up a document-local reference such as `#/components/schemas/Order`.
    #[must_use]
    pub fn lookup_ref(&self, reference: &str) -> Option<&'a Value> {
        let pointer = reference.strip_prefix('#')?;
        if !pointer.starts_with('/') {
            return None;
        }
        self.spec.pointer(pointer).filter(|v| v.is_object())
    }

    /// Follow `$ref` chains and `allOf` composition until a concrete fragment is reached.
    ///
    /// `$ref` is followed before `allOf` is considered; within `allOf` the first `$ref` member
    /// that resolves to a non-empty fragment wins. When nothing can be resolved the input is
    /// returned unchanged.
    #[must_use]
    pub fn resolve(&self, schema: &'a Value) -> &'a Value {
        self.resolve_bounded(schema, 0)
    }

    fn resolve_bounded(&self, schema: &'a Value, hops: usize) -> &'a Value {
        if hops >= MAX_REF_HOPS {
            return schema;
        }
        match SchemaNode::classify(schema) {
            SchemaNode::Ref(r) => match self.lookup_ref(r) {
                Some(target) => self.resolve_bounded(target, hops + 1),
                None => schema,
            },
            SchemaNode::AllOf(parts) => parts
                .iter()
                .filter_map(|part| match SchemaNode::classify(part) {
                    SchemaNode::Ref(r) => self.lookup_ref(r),
                    _ => None,
                })
                .map(|target| self.resolve_bounded(target, hops + 1))
                .find(|resolved| resolved.as_object().is_some_and(|m| !m.is_empty()))
                .unwrap_or(schema),
            _ => schema,
        }
    }

    /// Properties of the resolved fragment, if it has any.
    #[must_use]
    pub fn properties(&self, schema: &'a Value) -> Option<&'a Map<String, Value>> {
        match SchemaNode::classify(self.resolve(schema)) {
            SchemaNode::Object(props) => Some(props),
            _ => None,
        }
    }

    /// Schema of one underlying entity for a response schema.
    ///
    /// - arrays yield their resolved `items`;
    /// - objects whose `data`/`items`/`results` property is an array yield that array's items;
    /// - everything else yields the resolved schema itself.
    #[must_use]
    pub fn item_schema(&self, schema: &'a Value) -> &'a Value {
        let resolved = self.resolve(schema);
        match SchemaNode::classify(resolved) {
            SchemaNode::Array(Some(items)) => self.resolve(items),
            SchemaNode::Object(props) => ENVELOPE_KEYS
                .iter()
                .filter_map(|k| props.get(*k))
                .find_map(|prop| match SchemaNode::classify(self.resolve(prop)) {
                    SchemaNode::Array(Some(items)) => Some(self.resolve(items)),
                    _ => None,
                })
                .unwrap_or(resolved),
            _ => resolved,
        }
    }

    /// The `200` `application/json` schema of the GET operation at `path`.
    #[must_use]
    pub fn get_response_schema(&self, path: &str) -> Option<&'a Value> {
        self.spec
            .get("paths")?
            .get(path)?
            .get("get")?
            .get("responses")?
            .get("200")?
            .get("content")?
            .get("application/json")?
            .get("schema")
    }

    /// Top-level field names of the entity returned by the GET operation at `path`.
    ///
    /// Empty when the path, its response schema, or its properties are missing.
    #[must_use]
    pub fn allowed_fields(&self, path: &str) -> BTreeSet<String> {
        self.get_response_schema(path)
            .and_then(|schema| self.properties(self.item_schema(schema)))
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_test_support::marketplace_spec;
    use serde_json::json;

    fn field_names(props: Option<&Map<String, Value>>) -> Vec<String> {
        let mut names: Vec<String> = props
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn classification_prefers_ref_then_allof() {
        let v = json!({ "$ref": "#/x", "allOf": [], "properties": {} });
        assert_eq!(SchemaNode::classify(&v), SchemaNode::Ref("#/x"));
        let v = json!({ "allOf": [], "properties": {} });
        assert!(matches!(SchemaNode::classify(&v), SchemaNode::AllOf(_)));
        let v = json!({ "properties": { "id": {} } });
        assert!(matches!(SchemaNode::classify(&v), SchemaNode::Object(_)));
        assert_eq!(SchemaNode::classify(&json!("x")), SchemaNode::Unresolved);
    }

    #[test]
    fn ref_chains_and_allof_resolve_to_properties() {
        let spec = marketplace_spec();
        let r = SchemaResolver::new(&spec);
        let product = json!({ "$ref": "#/components/schemas/Product" });
        assert_eq!(
            field_names(r.properties(&product)),
            ["audit", "id", "name", "status"]
        );
    }

    #[test]
    fn unresolvable_input_is_returned_unchanged() {
        let spec = marketplace_spec();
        let r = SchemaResolver::new(&spec);
        let missing = json!({ "$ref": "#/components/schemas/Nope" });
        assert_eq!(r.resolve(&missing), &missing);
        let external = json!({ "$ref": "common.yaml#/Foo" });
        assert_eq!(r.resolve(&external), &external);
    }

    #[test]
    fn cyclic_refs_terminate() {
        let spec = json!({
            "components": { "schemas": {
                "A": { "$ref": "#/components/schemas/B" },
                "B": { "$ref": "#/components/schemas/A" }
            }}
        });
        let r = SchemaResolver::new(&spec);
        let start = json!({ "$ref": "#/components/schemas/A" });
        assert!(r.properties(&start).is_none());
    }

    #[test]
    fn item_schema_unwraps_envelopes_and_arrays() {
        let spec = marketplace_spec();
        let r = SchemaResolver::new(&spec);

        let list = r
            .get_response_schema("/public/v1/catalog/products")
            .expect("products schema");
        assert_eq!(
            field_names(r.properties(r.item_schema(list))),
            ["audit", "id", "name", "status"]
        );

        // Inline envelope without `type: object`.
        let orders = r
            .get_response_schema("/public/v1/commerce/orders")
            .expect("orders schema");
        assert!(
            r.properties(r.item_schema(orders))
                .is_some_and(|p| p.contains_key("orderAudit"))
        );

        let lines = r
            .get_response_schema("/public/v1/commerce/orders/{orderId}/lines")
            .expect("lines schema");
        assert_eq!(
            field_names(r.properties(r.item_schema(lines))),
            ["id", "quantity"]
        );
    }

    #[test]
    fn allowed_fields_for_missing_paths_are_empty() {
        let spec = marketplace_spec();
        let r = SchemaResolver::new(&spec);
        assert!(r.allowed_fields("/public/v1/nope").is_empty());
        assert!(r.allowed_fields("/public/v1/notifications/batches").is_empty());
        assert!(r.allowed_fields("/public/v1/accounts/api-tokens").contains("token"));
    }
}
