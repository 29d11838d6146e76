use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PbmockError;
use crate::http_rule::HttpRule;

/// Options key carrying the HTTP binding of a method.
pub const HTTP_RULE_OPTION: &str = "google.api.http";

/// A decoded message of any type, as produced by a [`MessageType`].
pub type DynMessage = Box<dyn Any + Send + Sync>;

/// JSON codec for one message type.
pub trait MessageType: Send + Sync {
    fn type_name(&self) -> &str;

    fn from_json(&self, json: Value) -> Result<DynMessage, PbmockError>;

    fn to_json(&self, message: &(dyn Any + Send + Sync)) -> Result<Value, PbmockError>;
}

impl std::fmt::Debug for dyn MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageType")
            .field("type_name", &self.type_name())
            .finish()
    }
}

/// Message backed by a serde type `T`.
pub struct JsonMessage<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonMessage<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            _marker: PhantomData,
        }
    }
}

impl<T> MessageType for JsonMessage<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn type_name(&self) -> &str {
        &self.name
    }

    fn from_json(&self, json: Value) -> Result<DynMessage, PbmockError> {
        let message: T =
            serde_json::from_value(json).map_err(|e| PbmockError::codec(&self.name, e))?;
        Ok(Box::new(message))
    }

    fn to_json(&self, message: &(dyn Any + Send + Sync)) -> Result<Value, PbmockError> {
        let message = message
            .downcast_ref::<T>()
            .ok_or_else(|| PbmockError::codec(&self.name, "unexpected message type"))?;
        serde_json::to_value(message).map_err(|e| PbmockError::codec(&self.name, e))
    }
}

/// Message without a Rust type, carried as a JSON object.
///
/// Used for services loaded from schema files.
#[derive(Debug, Clone)]
pub struct DynamicMessage {
    name: String,
}

impl DynamicMessage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl MessageType for DynamicMessage {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn from_json(&self, json: Value) -> Result<DynMessage, PbmockError> {
        match json {
            Value::Object(_) => Ok(Box::new(json)),
            other => Err(PbmockError::codec(
                &self.name,
                format!("expected a JSON object, got {}", json_type_name(&other)),
            )),
        }
    }

    fn to_json(&self, message: &(dyn Any + Send + Sync)) -> Result<Value, PbmockError> {
        let value = message
            .downcast_ref::<Value>()
            .ok_or_else(|| PbmockError::codec(&self.name, "unexpected message type"))?;
        match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(PbmockError::codec(
                &self.name,
                format!("expected a JSON object, got {}", json_type_name(other)),
            )),
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema of one RPC method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// Local name, unique within the service.
    pub name: String,
    /// Type name of the owning service.
    pub service: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub input: Arc<dyn MessageType>,
    pub output: Arc<dyn MessageType>,
    pub options: Map<String, Value>,
}

impl MethodDescriptor {
    pub fn new(name: &str, input: Arc<dyn MessageType>, output: Arc<dyn MessageType>) -> Self {
        Self {
            name: name.to_string(),
            service: String::new(),
            client_streaming: false,
            server_streaming: false,
            input,
            output,
            options: Map::new(),
        }
    }

    /// Unary method between two serde message types.
    pub fn typed<I, O>(name: &str, input_type: &str, output_type: &str) -> Self
    where
        I: Serialize + DeserializeOwned + Send + Sync + 'static,
        O: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self::new(
            name,
            Arc::new(JsonMessage::<I>::new(input_type)),
            Arc::new(JsonMessage::<O>::new(output_type)),
        )
    }

    pub fn with_http_rule(mut self, rule: &HttpRule) -> Self {
        if let Ok(value) = serde_json::to_value(rule) {
            self.options.insert(HTTP_RULE_OPTION.to_string(), value);
        }
        self
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn streaming(mut self, client: bool, server: bool) -> Self {
        self.client_streaming = client;
        self.server_streaming = server;
        self
    }

    pub fn is_unary(&self) -> bool {
        !self.client_streaming && !self.server_streaming
    }
}

/// Immutable schema of one RPC service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub type_name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            methods: Vec::new(),
        }
    }

    /// Append a method; a method with the same local name is replaced in place.
    pub fn with_method(mut self, mut method: MethodDescriptor) -> Self {
        method.service = self.type_name.clone();
        match self.methods.iter().position(|m| m.name == method.name) {
            Some(idx) => self.methods[idx] = method,
            None => self.methods.push(method),
        }
        self
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct HelloRequest {
        name: String,
    }

    #[test]
    fn json_message_decodes_typed_value() {
        let codec = JsonMessage::<HelloRequest>::new("greeter.HelloRequest");
        let msg = codec.from_json(json!({"name": "Ann"})).unwrap();
        let req = msg.downcast_ref::<HelloRequest>().unwrap();
        assert_eq!(req.name, "Ann");
        assert_eq!(codec.to_json(msg.as_ref()).unwrap(), json!({"name": "Ann"}));
    }

    #[test]
    fn json_message_rejects_wrong_shape() {
        let codec = JsonMessage::<HelloRequest>::new("greeter.HelloRequest");
        let err = codec.from_json(json!({"name": 42})).unwrap_err();
        assert_eq!(err.code(), "codec_error");
        assert!(err.to_string().contains("greeter.HelloRequest"));
    }

    #[test]
    fn json_message_rejects_foreign_message() {
        let codec = JsonMessage::<HelloRequest>::new("greeter.HelloRequest");
        let foreign: DynMessage = Box::new(17u32);
        let err = codec.to_json(foreign.as_ref()).unwrap_err();
        assert!(err.to_string().contains("unexpected message type"));
    }

    #[test]
    fn dynamic_message_requires_object() {
        let codec = DynamicMessage::new("greeter.HelloRequest");
        assert!(codec.from_json(json!({"name": "Ann"})).is_ok());
        let err = codec.from_json(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("got array"), "got: {err}");
    }

    #[test]
    fn with_method_sets_service_and_replaces_duplicates() {
        let svc = ServiceDescriptor::new("greeter.Greeter")
            .with_method(MethodDescriptor::typed::<HelloRequest, HelloRequest>(
                "SayHello", "a", "b",
            ))
            .with_method(
                MethodDescriptor::typed::<HelloRequest, HelloRequest>("SayHello", "a", "b")
                    .streaming(false, true),
            );
        assert_eq!(svc.methods.len(), 1);
        let method = svc.method("SayHello").unwrap();
        assert_eq!(method.service, "greeter.Greeter");
        assert!(!method.is_unary());
    }

    #[test]
    fn with_http_rule_stores_option() {
        let method = MethodDescriptor::typed::<HelloRequest, HelloRequest>("SayHello", "a", "b")
            .with_http_rule(&HttpRule::post("/v1/hello"));
        assert_eq!(
            method.options[HTTP_RULE_OPTION],
            json!({"post": "/v1/hello", "body": "*"})
        );
    }
}
