//! Schema constraints and the validator that checks values against them.
//!
//! Constraints are a small subset of JSON Schema as used by thing
//! descriptions: a `type` (primitive or the name of a thing-level custom
//! type), numeric bounds, array bounds with an item constraint, object
//! members with a required list, `enum`/`const` lists and a string `regex`.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Custom types declared by a thing, keyed by type name.
pub type TypeRegistry = BTreeMap<String, Constraint>;

/// Custom types may refer to each other; deeper chains are rejected.
const MAX_DEPTH: usize = 32;

/// The `type` of a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Boolean,
    String,
    Number,
    Integer,
    Array,
    Object,
    Enum,
    Const,
    /// A custom type resolved through the thing's [`TypeRegistry`].
    Named(String),
}

impl From<String> for ValueType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "null" => ValueType::Null,
            "boolean" => ValueType::Boolean,
            "string" => ValueType::String,
            "number" => ValueType::Number,
            "integer" => ValueType::Integer,
            "array" => ValueType::Array,
            "object" => ValueType::Object,
            "enum" => ValueType::Enum,
            "const" => ValueType::Const,
            _ => ValueType::Named(name),
        }
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ValueType::from)
    }
}

/// A compiled `regex` constraint. Matching is unanchored.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not compile.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    /// Source text of the pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// A schema fragment a value must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    /// Primitive kind or custom type name. Untyped constraints accept any
    /// present value that passes `enum`/`const`.
    #[serde(rename = "type", default)]
    pub kind: Option<ValueType>,
    #[serde(default)]
    pub description: Option<String>,
    /// Initial value for properties declared with this constraint.
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub min_items: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub regex: Option<Pattern>,
    #[serde(default)]
    pub items: Option<Box<Constraint>>,
    /// Object members. Keys not listed here are rejected.
    #[serde(default)]
    pub properties: Option<BTreeMap<String, Constraint>>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "enum", default)]
    pub one_of: Option<Vec<Value>>,
    #[serde(rename = "const", default)]
    pub constant: Option<Value>,
}

impl Constraint {
    /// Constraint with only a type.
    #[must_use]
    pub fn of(kind: ValueType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }
}

/// Whether `value` fails `constraint`.
///
/// `None` for `value` stands for an absent (undefined) value; `None` for
/// `constraint` accepts any present value and rejects an absent one.
/// The check is pure: it never mutates its inputs and always gives the same
/// answer for the same arguments.
#[must_use]
pub fn invalid(
    value: Option<&Value>,
    constraint: Option<&Constraint>,
    types: &TypeRegistry,
) -> bool {
    match constraint {
        None => value.is_none(),
        Some(constraint) => invalid_at(value, constraint, types, 0),
    }
}

fn invalid_at(value: Option<&Value>, c: &Constraint, types: &TypeRegistry, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return true;
    }

    if let Some(ValueType::Named(name)) = &c.kind {
        return match types.get(name) {
            Some(resolved) => invalid_at(value, resolved, types, depth + 1),
            None => true,
        };
    }

    let Some(value) = value else {
        return c.kind.is_some() || c.one_of.is_some() || c.constant.is_some();
    };

    if let Some(list) = &c.one_of {
        if !list.contains(value) {
            return true;
        }
        if matches!(c.kind, None | Some(ValueType::Enum)) {
            return false;
        }
    }

    if let Some(constant) = &c.constant {
        if value != constant {
            return true;
        }
        if matches!(c.kind, None | Some(ValueType::Const)) {
            return false;
        }
    }

    let Some(kind) = &c.kind else {
        return false;
    };

    match kind {
        ValueType::Null => !value.is_null(),
        ValueType::Boolean => !value.is_boolean(),
        ValueType::String => match value.as_str() {
            Some(text) => c.regex.as_ref().is_some_and(|re| !re.is_match(text)),
            None => true,
        },
        ValueType::Number | ValueType::Integer => {
            let Some(number) = value.as_f64() else {
                return true;
            };
            if *kind == ValueType::Integer && number.fract() != 0.0 {
                return true;
            }
            c.minimum.is_some_and(|min| number < min) || c.maximum.is_some_and(|max| number > max)
        }
        ValueType::Array => {
            let Some(items) = value.as_array() else {
                return true;
            };
            if c.min_items.is_some_and(|min| items.len() < min)
                || c.max_items.is_some_and(|max| items.len() > max)
            {
                return true;
            }
            match &c.items {
                Some(item) => items
                    .iter()
                    .any(|element| invalid_at(Some(element), item, types, depth + 1)),
                None => false,
            }
        }
        ValueType::Object => {
            let Some(members) = value.as_object() else {
                return true;
            };
            // Without a property map no key is declared.
            for (name, member) in members {
                let declared = c.properties.as_ref().and_then(|declared| declared.get(name));
                match declared {
                    Some(inner) => {
                        if invalid_at(Some(member), inner, types, depth + 1) {
                            return true;
                        }
                    }
                    None => return true,
                }
            }
            c.required.iter().any(|name| !members.contains_key(name))
        }
        // Reached only when the list itself is missing.
        ValueType::Enum | ValueType::Const => true,
        ValueType::Named(_) => true,
    }
}
