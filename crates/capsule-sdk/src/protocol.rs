//! Line-delimited JSON protocol between the host and capability units
//!
//! Every request and every response is a single JSON object terminated by `\n`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::FunctionSchema;

/// Host-to-unit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Ask the unit to describe itself
    Describe,
    /// Initialize the unit with the shared context
    Init { context: InitContext },
    /// Execute the capability with JSON-encoded arguments
    Execute { arguments: String },
}

/// Unit-to-host response; exactly one of the fields is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    /// Convert into a `Result`, treating an absent result as `null`
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Context handed to a unit during initialization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitContext {
    /// Model name the host is talking to
    pub model: String,
    /// Directory a unit may use for its own persistent data
    pub data_dir: String,
}

/// Self-description returned by `describe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: String,
    pub description: String,
    pub schema: FunctionSchema,
}

impl Descriptor {
    /// Check that the descriptor conforms to the capability contract
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_id(&self.id) {
            return Err(format!(
                "invalid capability id {:?}: expected non-empty [A-Za-z0-9_-]",
                self.id
            ));
        }
        if self.schema.name != self.id {
            return Err(format!(
                "function name {:?} does not match capability id {:?}",
                self.schema.name, self.id
            ));
        }
        if !self.schema.parameters.is_object() {
            return Err(format!(
                "parameters of {:?} must be of type object, got {:?}",
                self.id, self.schema.parameters.schema_type
            ));
        }
        Ok(())
    }
}

/// Capability ids double as function names, so they are restricted
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParameterSchema;
    use serde_json::json;

    fn descriptor(id: &str, name: &str) -> Descriptor {
        Descriptor {
            id: id.to_string(),
            description: "test".to_string(),
            schema: FunctionSchema::new(name, "test", ParameterSchema::new()),
        }
    }

    #[test]
    fn test_request_wire_format() {
        let describe = serde_json::to_value(Request::Describe).unwrap();
        assert_eq!(describe, json!({"method": "describe"}));

        let execute = serde_json::to_value(Request::Execute {
            arguments: r#"{"a":1}"#.to_string(),
        })
        .unwrap();
        assert_eq!(execute, json!({"method": "execute", "arguments": "{\"a\":1}"}));

        let parsed: Request =
            serde_json::from_str(r#"{"method":"init","context":{"model":"m","data_dir":"/tmp"}}"#)
                .unwrap();
        assert!(matches!(parsed, Request::Init { context } if context.model == "m"));
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(Response::ok(json!("hi")).into_result(), Ok(json!("hi")));
        assert_eq!(Response::err("boom").into_result(), Err("boom".to_string()));

        let empty: Response = serde_json::from_str(r#"{"result":null}"#).unwrap();
        assert_eq!(empty.into_result(), Ok(Value::Null));
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(descriptor("date-time", "date-time").validate().is_ok());
        assert!(descriptor("", "").validate().is_err());
        assert!(descriptor("bad id", "bad id").validate().is_err());
        assert!(descriptor("a", "b").validate().is_err());

        let mut not_object = descriptor("a", "a");
        not_object.schema.parameters.schema_type = "string".to_string();
        assert!(not_object.validate().is_err());
    }
}
