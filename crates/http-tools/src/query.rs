//! Query-string assembly for marketplace requests.
//!
//! The platform expects an RQL expression as the *literal* query string: `rql="eq(status,Failed)"`
//! plus `limit=10` becomes `?eq(status,Failed)&limit=10`, never `?rql=...`. Every other parameter
//! is form-encoded and appended after it.

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    rql: Option<String>,
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw RQL expression. Empty or whitespace-only expressions are ignored.
    #[must_use]
    pub fn with_rql(mut self, rql: impl Into<String>) -> Self {
        let rql = rql.into();
        self.rql = (!rql.trim().is_empty()).then_some(rql);
        self
    }

    /// Append a key/value pair, preserving insertion order.
    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.pairs.push((key.into(), value.to_string()));
    }

    #[must_use]
    pub fn rql(&self) -> Option<&str> {
        self.rql.as_deref()
    }

    /// First value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rql.is_none() && self.pairs.is_empty()
    }

    /// Encoded query string without the leading `?`, or `None` when there is nothing to send.
    #[must_use]
    pub fn to_query_string(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::with_capacity(2);
        if let Some(rql) = &self.rql {
            parts.push(rql.clone());
        }
        if !self.pairs.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.pairs.iter())
                .finish();
            parts.push(encoded);
        }
        (!parts.is_empty()).then(|| parts.join("&"))
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_query_string().as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rql_goes_first_unencoded() {
        let mut q = QueryParams::new().with_rql("and(eq(status,Active),ilike(name,*Teams*))");
        q.push("limit", 10);
        q.push("select", "id,name");
        assert_eq!(
            q.to_query_string().as_deref(),
            Some("and(eq(status,Active),ilike(name,*Teams*))&limit=10&select=id%2Cname")
        );
    }

    #[test]
    fn pairs_only_when_no_rql() {
        let mut q = QueryParams::new().with_rql("   ");
        q.push("limit", 5);
        q.push("order", "-audit.created.at");
        assert_eq!(q.rql(), None);
        assert_eq!(
            q.to_query_string().as_deref(),
            Some("limit=5&order=-audit.created.at")
        );
    }

    #[test]
    fn empty_query_has_no_string() {
        let q = QueryParams::new();
        assert!(q.is_empty());
        assert_eq!(q.to_query_string(), None);
        assert_eq!(q.to_string(), "");
    }

    #[test]
    fn rql_alone() {
        let q = QueryParams::new().with_rql("eq(status,Failed)");
        assert_eq!(q.to_query_string().as_deref(), Some("eq(status,Failed)"));
        assert_eq!(q.get("limit"), None);
    }
}
