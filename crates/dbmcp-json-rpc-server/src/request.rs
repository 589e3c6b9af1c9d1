use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{JsonRpcVersion, RequestId};

/// Parameters for a JSON-RPC request or notification
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
}

impl RequestParams {
    /// Get a named parameter (object params only)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            RequestParams::Object(map) => map.get(key),
            RequestParams::Array(_) => None,
        }
    }

    /// Get a positional parameter (array params only)
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            RequestParams::Array(vec) => vec.get(index),
            RequestParams::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            RequestParams::Object(map) => Some(map),
            RequestParams::Array(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RequestParams::Object(map) => map.is_empty(),
            RequestParams::Array(vec) => vec.is_empty(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestParams::Object(map) => Value::Object(map.clone()),
            RequestParams::Array(arr) => Value::Array(arr.clone()),
        }
    }

    /// Decode the params into a method-specific shape.
    ///
    /// This is the point where loosely typed params meet a concrete type; callers
    /// fall back to [`RequestParams::get`] when they only need a field or two.
    pub fn decode<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.to_value())
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(map: Map<String, Value>) -> Self {
        RequestParams::Object(map)
    }
}

impl From<Vec<Value>> for RequestParams {
    fn from(vec: Vec<Value>) -> Self {
        RequestParams::Array(vec)
    }
}

/// A JSON-RPC request (carries an id, expects exactly one response)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a new request with no parameters
    pub fn new_no_params(id: RequestId, method: impl Into<String>) -> Self {
        Self::new(id, method, None)
    }

    /// Create a new request with object parameters taken from a JSON value.
    /// Non-object values are dropped.
    pub fn with_value_params(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => Some(RequestParams::Object(map)),
            Value::Array(arr) => Some(RequestParams::Array(arr)),
            _ => None,
        };
        Self::new(id, method, params)
    }

    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json};

    #[test]
    fn test_request_with_object_params() {
        let request = JsonRpcRequest::with_value_params(
            RequestId::String("req1".to_string()),
            "set_value",
            json!({"name": "test", "value": 42}),
        );

        assert_eq!(request.get_param("name"), Some(&json!("test")));
        assert_eq!(request.get_param("value"), Some(&json!(42)));
        assert_eq!(request.get_param("missing"), None);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let parsed: JsonRpcRequest = from_str(
            r#"{"jsonrpc":"2.0","id":3,"method":"ping","extra":{"x":1},"params":null}"#,
        )
        .unwrap();
        assert_eq!(parsed.id, RequestId::Number(3));
        assert!(parsed.params.is_none());
    }

    #[test]
    fn test_decode_params() {
        #[derive(serde::Deserialize)]
        struct Named {
            name: String,
        }

        let params = RequestParams::Object(
            json!({"name": "echo", "other": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let named: Named = params.decode().unwrap();
        assert_eq!(named.name, "echo");
    }
}
