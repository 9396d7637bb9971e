//! The process-wide schema catalog.
//!
//! Operators look up known event schemas and concept mappings through the
//! control plane. The catalog is built once at startup and injected into
//! every node as read-only shared state; it is never mutated at runtime.

use arrow::datatypes::SchemaRef;
use indexmap::IndexMap;

/// Read-only catalog of event schemas and concepts.
///
/// A concept maps a logical field name to the concrete field names it may
/// resolve to across schemas.
#[derive(Debug, Default)]
pub struct Catalog {
    schemas: IndexMap<String, SchemaRef>,
    concepts: IndexMap<String, Vec<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named schema. Returns `self` for chaining during startup.
    pub fn with_schema(mut self, name: impl Into<String>, schema: SchemaRef) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    /// Add a concept mapping. Returns `self` for chaining during startup.
    pub fn with_concept(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = String>,
    ) -> Self {
        self.concepts.insert(name.into(), fields.into_iter().collect());
        self
    }

    /// Look up a schema by name.
    pub fn schema(&self, name: &str) -> Option<&SchemaRef> {
        self.schemas.get(name)
    }

    /// All known schemas, in registration order.
    pub fn schemas(&self) -> impl Iterator<Item = (&str, &SchemaRef)> {
        self.schemas.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up the fields a concept resolves to.
    pub fn concept(&self, name: &str) -> Option<&[String]> {
        self.concepts.get(name).map(Vec::as_slice)
    }

    /// All known concepts, in registration order.
    pub fn concepts(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.concepts.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_lookup_and_order() {
        let schema = Arc::new(Schema::new(vec![Field::new("ts", DataType::Int64, false)]));
        let catalog = Catalog::new()
            .with_schema("flow", Arc::clone(&schema))
            .with_schema("alert", Arc::clone(&schema))
            .with_concept("timestamp", vec!["ts".to_string(), "time".to_string()]);

        assert!(catalog.schema("flow").is_some());
        assert!(catalog.schema("missing").is_none());
        let names: Vec<_> = catalog.schemas().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["flow", "alert"]);
        assert_eq!(
            catalog.concept("timestamp"),
            Some(&["ts".to_string(), "time".to_string()][..])
        );
    }
}
