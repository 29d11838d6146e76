use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PbmockError {
    #[error("Unsupported HTTP binding, only a non-empty 'post' template is accepted: {rule}")]
    UnsupportedBinding { rule: String },

    #[error("Unsupported body mapping, only body='*' is accepted: {rule}")]
    UnsupportedBodyMapping { rule: String },

    #[error("Unknown unary method '{method}' on service {service}")]
    UnknownMethod { service: String, method: String },

    #[error("{0} calls are not implemented")]
    NotImplemented(&'static str),

    #[error("Invalid mock definition: {0}")]
    InvalidModuleSpec(String),

    #[error("Service {service} is missing mock implementation for method {method}")]
    MissingMockImplementation { service: String, method: String },

    #[error("Mock server was never started")]
    ServerNotStarted,

    #[error("Mock server was already started")]
    ServerAlreadyStarted,

    #[error("Cannot convert {message_type}: {detail}")]
    CodecError { message_type: String, detail: String },

    #[error("Mock handler failed: {0}")]
    HandlerError(String),

    #[error("Transport error: {0}")]
    TransportError(Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("Error in schema {}: {detail}", path.display())]
    SchemaError { path: PathBuf, detail: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Shared(Arc<PbmockError>),
}

impl PbmockError {
    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            PbmockError::UnsupportedBinding { .. } => "unsupported_binding",
            PbmockError::UnsupportedBodyMapping { .. } => "unsupported_body_mapping",
            PbmockError::UnknownMethod { .. } => "unknown_method",
            PbmockError::NotImplemented(_) => "not_implemented",
            PbmockError::InvalidModuleSpec(_) => "invalid_module_spec",
            PbmockError::MissingMockImplementation { .. } => "missing_mock_implementation",
            PbmockError::ServerNotStarted => "server_not_started",
            PbmockError::ServerAlreadyStarted => "server_already_started",
            PbmockError::CodecError { .. } => "codec_error",
            PbmockError::HandlerError(_) => "handler_error",
            PbmockError::TransportError(_) => "transport_error",
            PbmockError::InvalidArgument(_) => "invalid_argument",
            PbmockError::ConfigError { .. } => "config_error",
            PbmockError::SchemaError { .. } => "schema_error",
            PbmockError::IoError(_) => "io_error",
            PbmockError::Shared(inner) => inner.code(),
        }
    }

    pub fn service_name(&self) -> Option<&str> {
        match self {
            PbmockError::UnknownMethod { service, .. } => Some(service),
            PbmockError::MissingMockImplementation { service, .. } => Some(service),
            PbmockError::Shared(inner) => inner.service_name(),
            _ => None,
        }
    }

    pub fn method_name(&self) -> Option<&str> {
        match self {
            PbmockError::UnknownMethod { method, .. } => Some(method),
            PbmockError::MissingMockImplementation { method, .. } => Some(method),
            PbmockError::Shared(inner) => inner.method_name(),
            _ => None,
        }
    }

    /// Structured JSON error object, also used as the mock server's 500 body.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(service) = self.service_name() {
            obj.insert("service".into(), serde_json::Value::String(service.to_string()));
        }
        if let Some(method) = self.method_name() {
            obj.insert("method".into(), serde_json::Value::String(method.to_string()));
        }
        obj.insert("message".into(), serde_json::Value::String(self.to_string()));
        obj.insert("code".into(), serde_json::Value::String(self.code().to_string()));
        serde_json::json!({ "error": obj })
    }

    pub(crate) fn codec(message_type: &str, detail: impl std::fmt::Display) -> Self {
        PbmockError::CodecError {
            message_type: message_type.to_string(),
            detail: detail.to_string(),
        }
    }
}
