use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CustomFields;

/// The app-specific attributes of one custom ticket property.
///
/// Event schemas are JSON schemas; these extension keywords sit next to the
/// standard ones, which are enforced by the compiled validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomField {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_visible: bool,
    pub editable: bool,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct SchemaShape {
    #[serde(rename = "type")]
    kind: String,
    required: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, CustomField>,
}

/// A compiled event custom-field schema.
pub struct CustomFieldsSchema {
    pub required: Vec<String>,
    pub properties: BTreeMap<String, CustomField>,
    validator: jsonschema::Validator,
}

impl fmt::Debug for CustomFieldsSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFieldsSchema")
            .field("required", &self.required)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl CustomFieldsSchema {
    /// Compiles a raw schema as submitted with an event.
    pub fn from_value(raw: &Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .build(raw)
            .map_err(|e| format!("invalid custom fields schema: {e}"))?;
        let shape: SchemaShape = serde_json::from_value(raw.clone())
            .map_err(|e| format!("invalid custom fields schema: {e}"))?;

        if shape.kind != "object" {
            return Err(format!("schema type must be 'object', got '{}'", shape.kind));
        }
        if let Some(missing) = shape
            .required
            .iter()
            .find(|key| !shape.properties.contains_key(*key))
        {
            return Err(format!("required property '{missing}' is not defined"));
        }

        Ok(Self {
            required: shape.required,
            properties: shape.properties,
            validator,
        })
    }

    /// Checks a ticket's complete set of custom values: every key must be a
    /// declared property and the whole map must satisfy the schema.
    pub fn check(&self, fields: &CustomFields) -> Result<(), String> {
        if let Some(key) = fields.keys().find(|key| !self.properties.contains_key(*key)) {
            return Err(format!("unknown custom field '{key}'"));
        }

        let instance = Value::Object(fields.clone());
        self.validator
            .validate(&instance)
            .map_err(|e| format!("invalid custom fields: {e}"))
    }

    /// Drops every value whose property is not visible to regular users.
    pub fn retain_user_visible(&self, fields: &mut CustomFields) {
        fields.retain(|key, _| self.properties.get(key).is_some_and(|p| p.user_visible));
    }

    pub fn is_editable(&self, key: &str) -> bool {
        self.properties.get(key).is_some_and(|p| p.editable)
    }
}

/// Strips custom fields a non-admin should not see. If the event has no usable
/// schema nothing is shown.
pub fn redact_for_user(schema: Option<&Value>, fields: &mut CustomFields) {
    match schema.map(CustomFieldsSchema::from_value) {
        Some(Ok(schema)) => schema.retain_user_visible(fields),
        _ => fields.clear(),
    }
}
