//! Thing descriptions.
//!
//! A description is the JSON document an application hands to the hub. It
//! is kept verbatim for `GET /things/{name}` and parsed once into typed
//! metadata for validation.

use crate::schema::{invalid, Constraint, TypeRegistry, ValueType};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Errors raised while parsing a description.
#[derive(Debug, Error)]
pub enum DescriptionError {
    /// The document does not have the expected shape.
    #[error("Invalid thing description: {0}")]
    Json(#[from] serde_json::Error),

    /// The description has no usable name.
    #[error("Thing description has no name")]
    MissingName,
}

/// Metadata for one property.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDescription {
    #[serde(flatten)]
    pub constraint: Constraint,
    /// Clients may write the property unless this is explicitly `false`.
    #[serde(default)]
    pub writable: Option<bool>,
}

impl PropertyDescription {
    /// Whether external clients may write this property.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable != Some(false)
    }
}

/// Metadata for one action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionDescription {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input: Option<Constraint>,
    #[serde(default)]
    pub output: Option<Constraint>,
}

/// A parsed thing description.
#[derive(Debug, Clone, Deserialize)]
pub struct ThingDescription {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub types: TypeRegistry,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDescription>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionDescription>,
    /// Event data constraints; `null` declares an event that carries no
    /// constrained data.
    #[serde(default)]
    pub events: BTreeMap<String, Option<Constraint>>,
    /// The document as supplied.
    #[serde(skip)]
    pub document: Value,
}

impl ThingDescription {
    /// Parse a description document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed (including regexes
    /// that do not compile) or has no name.
    pub fn parse(document: Value) -> Result<Self, DescriptionError> {
        let mut description: ThingDescription = serde_json::from_value(document.clone())?;
        if description.name.is_empty() {
            return Err(DescriptionError::MissingName);
        }
        description.document = document;
        description.check_types();
        Ok(description)
    }

    /// Parse a description from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid description.
    pub fn from_json(text: &str) -> Result<Self, DescriptionError> {
        Self::parse(serde_json::from_str(text)?)
    }

    /// Initial value of a property: its own `value`, else the `value` of
    /// the custom type it names.
    #[must_use]
    pub fn initial_value(&self, property: &PropertyDescription) -> Option<Value> {
        if let Some(value) = &property.constraint.value {
            return Some(value.clone());
        }
        match &property.constraint.kind {
            Some(ValueType::Named(name)) => self.types.get(name).and_then(|t| t.value.clone()),
            _ => None,
        }
    }

    fn check_types(&self) {
        for (name, property) in &self.properties {
            if let Some(ValueType::Named(kind)) = &property.constraint.kind {
                if !self.types.contains_key(kind) {
                    warn!(
                        thing = %self.name,
                        property = %name,
                        kind = %kind,
                        "Property refers to an undeclared type"
                    );
                }
            }
            if let Some(value) = self.initial_value(property) {
                if invalid(Some(&value), Some(&property.constraint), &self.types) {
                    warn!(
                        thing = %self.name,
                        property = %name,
                        "Initial value does not satisfy its constraint"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tank() -> Value {
        json!({
            "name": "tank",
            "id": "urn:dev:tank-1",
            "types": {
                "level": {"type": "number", "minimum": 0, "maximum": 100, "value": 50}
            },
            "properties": {
                "level": {"type": "level", "writable": false},
                "valve": {"type": "boolean", "value": false},
                "label": {"type": "string", "description": "display name"}
            },
            "actions": {
                "drain": {"input": {"type": "integer"}, "output": {"type": "boolean"}},
                "stop": {}
            },
            "events": {
                "overflow": {"type": "number"},
                "alarm": null
            }
        })
    }

    #[test]
    fn test_parse() {
        let td = ThingDescription::parse(tank()).unwrap();
        assert_eq!(td.name, "tank");
        assert_eq!(td.id.as_deref(), Some("urn:dev:tank-1"));
        assert_eq!(td.properties.len(), 3);
        assert!(!td.properties["level"].is_writable());
        assert!(td.properties["valve"].is_writable());
        assert_eq!(
            td.properties["label"].constraint.description.as_deref(),
            Some("display name")
        );
        assert!(td.actions["stop"].input.is_none());
        assert!(td.events["alarm"].is_none());
        assert!(td.events["overflow"].is_some());
        assert_eq!(td.document, tank());
    }

    #[test]
    fn test_initial_values() {
        let td = ThingDescription::parse(tank()).unwrap();
        assert_eq!(td.initial_value(&td.properties["level"]), Some(json!(50)));
        assert_eq!(td.initial_value(&td.properties["valve"]), Some(json!(false)));
        assert_eq!(td.initial_value(&td.properties["label"]), None);
    }

    #[test]
    fn test_missing_name() {
        assert!(matches!(
            ThingDescription::parse(json!({"properties": {}})),
            Err(DescriptionError::MissingName)
        ));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let doc = json!({
            "name": "x",
            "properties": {"code": {"type": "string", "regex": "[unclosed"}}
        });
        assert!(matches!(
            ThingDescription::parse(doc),
            Err(DescriptionError::Json(_))
        ));
    }
}
