//! Typed JSON Schema subset for tool parameters
//!
//! Covers what tool definitions actually use: primitive types, enums,
//! numeric bounds, string lengths, nested objects and arrays.
//! Validation is recursive and reports every violation, not just the first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Label used for the root value in error messages
const ROOT_LABEL: &str = "parameter";

/// Primitive schema type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether a JSON value has this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (recursive) parameter schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
}

impl Schema {
    fn of(kind: SchemaType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Object schema (the root of every tool's parameters)
    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    /// Array schema with an item schema
    pub fn array(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Add a property (object schemas)
    pub fn property(mut self, name: &str, schema: Schema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    /// Add a property and mark it required
    pub fn required_property(mut self, name: &str, schema: Schema) -> Self {
        self.required.push(name.to_string());
        self.property(name, schema)
    }

    pub fn with_enum<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn max(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn min_len(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn max_len(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// JSON Schema document for this schema
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    /// Validate a value against this schema, collecting every violation.
    ///
    /// An empty result means the value is valid.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        if self.kind != Some(SchemaType::Object) {
            errors.push(format!(
                "schema must be of type object, got {}",
                self.kind.map(|k| k.as_str()).unwrap_or("untyped")
            ));
            return errors;
        }
        self.validate_at(value, "", &mut errors);
        errors
    }

    fn validate_at(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        let label = if path.is_empty() { ROOT_LABEL } else { path };

        if let Some(kind) = self.kind {
            if !kind.matches(value) {
                errors.push(format!("{} should be {}", label, kind));
                return;
            }
        }

        if !self.enum_values.is_empty() && !self.enum_values.contains(value) {
            let allowed: Vec<String> = self.enum_values.iter().map(|v| v.to_string()).collect();
            errors.push(format!("{} must be one of [{}]", label, allowed.join(", ")));
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    errors.push(format!("{} must be >= {}", label, min));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    errors.push(format!("{} must be <= {}", label, max));
                }
            }
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    errors.push(format!("{} must be at least {} chars", label, min));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    errors.push(format!("{} must be at most {} chars", label, max));
                }
            }
        }

        if let Some(obj) = value.as_object() {
            for name in &self.required {
                if !obj.contains_key(name) {
                    errors.push(format!("missing required {}", join_path(path, name)));
                }
            }
            for (name, child) in obj {
                if let Some(schema) = self.properties.get(name) {
                    schema.validate_at(child, &join_path(path, name), errors);
                }
            }
        }

        if let (Some(items), Some(arr)) = (&self.items, value.as_array()) {
            for (i, item) in arr.iter().enumerate() {
                items.validate_at(item, &format!("{}[{}]", label, i), errors);
            }
        }
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Schema {
        Schema::object()
            .required_property("query", Schema::string().min_len(2))
            .property("count", Schema::integer().min(1.0).max(10.0))
            .property("mode", Schema::string().with_enum(["fast", "deep"]))
    }

    #[test]
    fn test_valid_params() {
        let errors = search_schema().validate(&json!({"query": "rust", "count": 3, "mode": "fast"}));
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_collects_all_errors() {
        let errors = search_schema().validate(&json!({"query": "x", "count": 20}));
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&"query must be at least 2 chars".to_string()));
        assert!(errors.contains(&"count must be <= 10".to_string()));
    }

    #[test]
    fn test_missing_required() {
        let errors = search_schema().validate(&json!({}));
        assert_eq!(errors, vec!["missing required query".to_string()]);
    }

    #[test]
    fn test_type_mismatch_stops_descent() {
        let schema = Schema::object().property(
            "opts",
            Schema::object().required_property("depth", Schema::integer()),
        );
        let errors = schema.validate(&json!({"opts": "deep"}));
        assert_eq!(errors, vec!["opts should be object".to_string()]);
    }

    #[test]
    fn test_nested_paths() {
        let schema = Schema::object().property(
            "filter",
            Schema::object()
                .required_property("field", Schema::string())
                .property("tags", Schema::array(Schema::string().max_len(3))),
        );
        let errors = schema.validate(&json!({"filter": {"tags": ["ok", "toolong", 5]}}));
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&"missing required filter.field".to_string()));
        assert!(errors.contains(&"filter.tags[1] must be at most 3 chars".to_string()));
        assert!(errors.contains(&"filter.tags[2] should be string".to_string()));
    }

    #[test]
    fn test_integer_rejects_float() {
        let schema = Schema::object().property("n", Schema::integer());
        assert_eq!(schema.validate(&json!({"n": 1.5})), vec!["n should be integer".to_string()]);
        assert!(schema.validate(&json!({"n": 2})).is_empty());
    }

    #[test]
    fn test_enum_violation() {
        let errors = search_schema().validate(&json!({"query": "abc", "mode": "slow"}));
        assert_eq!(errors, vec![r#"mode must be one of ["fast", "deep"]"#.to_string()]);
    }

    #[test]
    fn test_root_must_be_object_value() {
        let errors = search_schema().validate(&json!(["query"]));
        assert_eq!(errors, vec!["parameter should be object".to_string()]);
    }

    #[test]
    fn test_non_object_root_schema() {
        let errors = Schema::string().validate(&json!("x"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("schema must be of type object"));
    }

    #[test]
    fn test_json_roundtrip_keys() {
        let doc = search_schema().to_json();
        assert_eq!(doc["type"], "object");
        assert_eq!(doc["properties"]["query"]["minLength"], 2);
        assert_eq!(doc["required"], json!(["query"]));

        let parsed: Schema = serde_json::from_value(doc).unwrap();
        assert_eq!(parsed, search_schema());
    }
}
