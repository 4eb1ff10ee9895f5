use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::{Result, SearchError};
use crate::model::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Per-collection metadata schema checked on ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default = "allow_additional")]
    pub additional_fields: bool,
}

fn allow_additional() -> bool {
    true
}

impl Default for MetadataSchema {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            additional_fields: true,
        }
    }
}

impl MetadataSchema {
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required,
            },
        );
        self
    }

    pub fn closed(mut self) -> Self {
        self.additional_fields = false;
        self
    }

    /// Reports the first violation. Fields are checked in name order so the
    /// message is stable.
    pub fn validate(&self, metadata: &Metadata) -> Result<()> {
        for (name, spec) in &self.fields {
            match metadata.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SearchError::validation(format!(
                        "metadata field '{name}' is required"
                    )));
                }
                Some(value) if !value.is_null() && !spec.field_type.accepts(value) => {
                    return Err(SearchError::validation(format!(
                        "metadata field '{name}' must be of type {}",
                        spec.field_type.name()
                    )));
                }
                _ => {}
            }
        }

        if !self.additional_fields {
            if let Some(extra) = metadata.keys().find(|k| !self.fields.contains_key(*k)) {
                return Err(SearchError::validation(format!(
                    "metadata field '{extra}' is not declared in the collection schema"
                )));
            }
        }

        Ok(())
    }
}

/// Serialized JSON size of a metadata object in bytes.
pub fn metadata_size(metadata: &Metadata) -> Result<usize> {
    serde_json::to_vec(metadata)
        .map(|bytes| bytes.len())
        .map_err(|e| SearchError::validation(format!("metadata is not serializable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(v: Value) -> Metadata {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn required_and_typed_fields() {
        let schema = MetadataSchema::default()
            .field("source", FieldType::String, true)
            .field("page", FieldType::Integer, false);

        assert!(schema.validate(&meta(json!({"source": "a.pdf", "page": 3}))).is_ok());
        assert!(schema.validate(&meta(json!({"source": "a.pdf"}))).is_ok());

        let missing = schema.validate(&meta(json!({"page": 3}))).unwrap_err();
        assert!(missing.to_string().contains("'source' is required"));

        let wrong = schema.validate(&meta(json!({"source": "a", "page": 1.5}))).unwrap_err();
        assert!(wrong.to_string().contains("'page' must be of type integer"));
    }

    #[test]
    fn closed_schema_rejects_unknown_fields() {
        let schema = MetadataSchema::default()
            .field("source", FieldType::Any, false)
            .closed();
        assert!(schema.validate(&meta(json!({"source": 1}))).is_ok());
        assert!(schema
            .validate(&meta(json!({"other": 1})))
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn schema_deserializes_with_defaults() {
        let schema: MetadataSchema = serde_json::from_value(json!({
            "fields": {"lang": {"type": "string"}}
        }))
        .unwrap();
        assert!(schema.additional_fields);
        assert!(!schema.fields["lang"].required);
    }

    #[test]
    fn size_counts_escaped_characters() {
        assert_eq!(metadata_size(&Metadata::new()).unwrap(), 2);
        assert_eq!(metadata_size(&meta(json!({"a": 1}))).unwrap(), 7);
        // each control character serializes as \u0001
        let escaped = meta(json!({"t": "\u{1}".repeat(10)}));
        assert_eq!(metadata_size(&escaped).unwrap(), 8 + 60);
        let quoted = meta(json!({"q": "\"\\"}));
        assert_eq!(metadata_size(&quoted).unwrap(), 8 + 4);
    }
}
