//! JSON Schema subset used to describe tool parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A JSON Schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
        enum_values: Option<Vec<String>>,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        items: Option<Box<JsonSchema>>,
    },
    Object {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        properties: Option<BTreeMap<String, JsonSchema>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
    },
}

impl JsonSchema {
    pub fn string() -> Self {
        Self::String {
            description: None,
            enum_values: None,
        }
    }

    pub fn string_with_description(description: impl Into<String>) -> Self {
        Self::String {
            description: Some(description.into()),
            enum_values: None,
        }
    }

    pub fn string_enum(values: Vec<String>) -> Self {
        Self::String {
            description: None,
            enum_values: Some(values),
        }
    }

    pub fn number() -> Self {
        Self::Number { description: None }
    }

    pub fn number_with_description(description: impl Into<String>) -> Self {
        Self::Number {
            description: Some(description.into()),
        }
    }

    pub fn integer() -> Self {
        Self::Integer {
            description: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn integer_with_description(description: impl Into<String>) -> Self {
        Self::Integer {
            description: Some(description.into()),
            minimum: None,
            maximum: None,
        }
    }

    pub fn boolean() -> Self {
        Self::Boolean { description: None }
    }

    pub fn boolean_with_description(description: impl Into<String>) -> Self {
        Self::Boolean {
            description: Some(description.into()),
        }
    }

    pub fn array(items: JsonSchema) -> Self {
        Self::Array {
            description: None,
            items: Some(Box::new(items)),
        }
    }

    pub fn object() -> Self {
        Self::Object {
            description: None,
            properties: None,
            required: None,
        }
    }

    /// The JSON type keyword of this schema
    pub fn type_name(&self) -> &'static str {
        match self {
            JsonSchema::String { .. } => "string",
            JsonSchema::Number { .. } => "number",
            JsonSchema::Integer { .. } => "integer",
            JsonSchema::Boolean { .. } => "boolean",
            JsonSchema::Array { .. } => "array",
            JsonSchema::Object { .. } => "object",
        }
    }

    /// Add a description to this schema
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        match &mut self {
            JsonSchema::String { description, .. }
            | JsonSchema::Number { description }
            | JsonSchema::Integer { description, .. }
            | JsonSchema::Boolean { description }
            | JsonSchema::Array { description, .. }
            | JsonSchema::Object { description, .. } => *description = Some(desc.into()),
        }
        self
    }
}
