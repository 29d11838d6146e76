use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;

use crate::descriptor::{DynMessage, MethodDescriptor};
use crate::error::PbmockError;
use crate::transports::UnaryCall;

/// Options controlling JSON conversion of messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonOptions {
    /// Extra message type names resolvable while converting `Any` fields.
    pub type_registry: Vec<String>,
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcOptions {
    /// Request metadata, sent as HTTP headers.
    pub meta: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub json_options: JsonOptions,
}

/// Partial [`RpcOptions`]; unset fields fall back to defaults on merge.
#[derive(Debug, Clone, Default)]
pub struct PartialRpcOptions {
    pub meta: Option<HashMap<String, String>>,
    pub timeout: Option<Duration>,
    pub json_options: Option<JsonOptions>,
}

impl PartialRpcOptions {
    pub fn merge_into(self, defaults: RpcOptions) -> RpcOptions {
        RpcOptions {
            meta: self.meta.unwrap_or(defaults.meta),
            timeout: self.timeout.or(defaults.timeout),
            json_options: self.json_options.unwrap_or(defaults.json_options),
        }
    }
}

/// Context handed to [`HttpPost::post`] alongside each request.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportContext {
    pub rpc_options: RpcOptions,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub data: serde_json::Value,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
}

/// Minimal HTTP capability the REST transport is built on.
#[async_trait]
pub trait HttpPost: Send + Sync {
    /// POST `body` as JSON to `url` and return the decoded response.
    async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
        ctx: &HttpTransportContext,
    ) -> Result<HttpResponse, PbmockError>;
}

impl std::fmt::Debug for dyn RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport").finish()
    }
}

/// The four RPC call kinds.
pub trait RpcTransport: Send + Sync {
    /// Fill unset option fields with defaults; `partial` takes precedence.
    fn merge_options(&self, partial: Option<PartialRpcOptions>) -> RpcOptions;

    fn unary(
        &self,
        method: &MethodDescriptor,
        input: DynMessage,
        options: RpcOptions,
    ) -> Result<UnaryCall, PbmockError>;

    fn server_streaming(
        &self,
        method: &MethodDescriptor,
        input: DynMessage,
        options: RpcOptions,
    ) -> Result<Infallible, PbmockError>;

    fn client_streaming(
        &self,
        method: &MethodDescriptor,
        options: RpcOptions,
    ) -> Result<Infallible, PbmockError>;

    fn duplex(
        &self,
        method: &MethodDescriptor,
        options: RpcOptions,
    ) -> Result<Infallible, PbmockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_defaults_for_unset_fields() {
        let defaults = RpcOptions {
            timeout: Some(Duration::from_secs(5)),
            ..RpcOptions::default()
        };
        let merged = PartialRpcOptions::default().merge_into(defaults.clone());
        assert_eq!(merged, defaults);
    }

    #[test]
    fn merge_prefers_partial_fields() {
        let mut meta = HashMap::new();
        meta.insert("x-trace".to_string(), "abc".to_string());
        let merged = PartialRpcOptions {
            meta: Some(meta.clone()),
            timeout: Some(Duration::from_millis(10)),
            json_options: None,
        }
        .merge_into(RpcOptions {
            timeout: Some(Duration::from_secs(5)),
            ..RpcOptions::default()
        });
        assert_eq!(merged.meta, meta);
        assert_eq!(merged.timeout, Some(Duration::from_millis(10)));
        assert!(merged.json_options.type_registry.is_empty());
    }
}
