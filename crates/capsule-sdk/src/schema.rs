//! Function schema types presented to the model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Schema for a single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, integer, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Parameter description
    #[serde(default)]
    pub description: String,
    /// Enum values if applicable
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Default value if applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Element schema for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterProperty>>,
    /// Nested properties for objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, ParameterProperty>>,
    /// Required nested properties for objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            default: None,
            items: None,
            properties: None,
            required: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn array(description: impl Into<String>, items: ParameterProperty) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::typed("array", description)
        }
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::typed("object", description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Add a nested property to an object parameter
    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), prop);
        self
    }

    /// Add a nested required property to an object parameter
    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.required.get_or_insert_with(Vec::new).push(name.clone());
        self.with_property(name, prop)
    }
}

/// Schema describing the arguments object of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Always "object" for a valid capability
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }

    pub fn is_object(&self) -> bool {
        self.schema_type == "object"
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A callable function as advertised to the completion API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl FunctionSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_serializes_as_json_schema() {
        let schema = FunctionSchema::new(
            "memory",
            "Store and retrieve memories",
            ParameterSchema::new()
                .with_required(
                    "action",
                    ParameterProperty::string("What to do").with_enum(["store", "retrieve"]),
                )
                .with_property("key", ParameterProperty::string("Memory key")),
        );

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["parameters"]["type"], "object");
        assert_eq!(value["parameters"]["required"], json!(["action"]));
        assert_eq!(
            value["parameters"]["properties"]["action"]["enum"],
            json!(["store", "retrieve"])
        );
        assert!(value["parameters"]["properties"]["key"].get("enum").is_none());
    }

    #[test]
    fn test_nested_schema_parses() {
        let raw = json!({
            "name": "notes",
            "description": "Batch notes",
            "parameters": {
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": { "text": { "type": "string" } },
                            "required": ["text"]
                        }
                    }
                }
            }
        });

        let schema: FunctionSchema = serde_json::from_value(raw).unwrap();
        let items = schema.parameters.properties["items"].items.as_ref().unwrap();
        assert_eq!(items.param_type, "object");
        assert_eq!(items.required.as_deref(), Some(&["text".to_string()][..]));
        assert!(schema.parameters.required.is_empty());
    }

    #[test]
    fn test_nested_builder() {
        let prop = ParameterProperty::object("A point")
            .with_required("x", ParameterProperty::number("X"))
            .with_property("label", ParameterProperty::string("Label"));

        assert_eq!(prop.properties.as_ref().map(|p| p.len()), Some(2));
        assert_eq!(prop.required, Some(vec!["x".to_string()]));
    }
}
