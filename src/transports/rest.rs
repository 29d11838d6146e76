use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::descriptor::{DynMessage, MethodDescriptor, ServiceDescriptor};
use crate::error::PbmockError;
use crate::http_rule::{method_binding, PostBinding};
use crate::transport::{
    HttpPost, HttpResponse, HttpTransportContext, PartialRpcOptions, RpcOptions, RpcTransport,
};

type ResponseTask = Shared<BoxFuture<'static, Result<Arc<HttpResponse>, Arc<PbmockError>>>>;

/// Status of a finished call, derived from the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: String,
    pub detail: String,
}

/// Handle to an in-flight unary call.
///
/// The HTTP request is issued when the call is created; each accessor
/// awaits the same response independently.
pub struct UnaryCall {
    method: MethodDescriptor,
    request_headers: HashMap<String, String>,
    input: DynMessage,
    task: ResponseTask,
}

impl std::fmt::Debug for UnaryCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnaryCall")
            .field("service", &self.method.service)
            .field("method", &self.method.name)
            .field("request_headers", &self.request_headers)
            .finish_non_exhaustive()
    }
}

impl UnaryCall {
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn request_headers(&self) -> &HashMap<String, String> {
        &self.request_headers
    }

    pub fn input(&self) -> &DynMessage {
        &self.input
    }

    pub async fn response_headers(&self) -> Result<HashMap<String, String>, PbmockError> {
        self.wait().await?;
        Ok(HashMap::new())
    }

    pub async fn response(&self) -> Result<DynMessage, PbmockError> {
        let resp = self.wait().await?;
        self.method.output.from_json(resp.data.clone())
    }

    /// Like [`UnaryCall::response`], downcast to the output message type.
    pub async fn response_as<O: Send + Sync + 'static>(&self) -> Result<O, PbmockError> {
        let message = self.response().await?;
        message
            .downcast::<O>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                PbmockError::codec(self.method.output.type_name(), "unexpected message type")
            })
    }

    pub async fn status(&self) -> Result<RpcStatus, PbmockError> {
        let resp = self.wait().await?;
        Ok(RpcStatus {
            code: resp.status.to_string(),
            detail: resp.status_text.clone(),
        })
    }

    pub async fn trailers(&self) -> Result<HashMap<String, String>, PbmockError> {
        self.wait().await?;
        Ok(HashMap::new())
    }

    async fn wait(&self) -> Result<Arc<HttpResponse>, PbmockError> {
        self.task.clone().await.map_err(PbmockError::Shared)
    }
}

/// Handler precomputed for one unary method.
struct UnaryHandler {
    method: MethodDescriptor,
    binding: PostBinding,
}

impl UnaryHandler {
    fn call(&self, http: Arc<dyn HttpPost>, input: DynMessage, options: RpcOptions) -> UnaryCall {
        let body = self.method.input.to_json(input.as_ref());
        let url = self.binding.post.clone();
        let request_headers = options.meta.clone();
        let ctx = HttpTransportContext {
            rpc_options: options,
        };

        let request = async move {
            let body = body.map_err(Arc::new)?;
            debug!(url = %url, "sending unary request");
            http.post(&url, body, &ctx).await.map(Arc::new).map_err(Arc::new)
        }
        .boxed();

        let task = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let spawned = handle.spawn(request);
                async move {
                    match spawned.await {
                        Ok(result) => result,
                        Err(e) => Err(Arc::new(PbmockError::TransportError(Box::new(e)))),
                    }
                }
                .boxed()
            }
            // outside a runtime the request is sent when the call is first awaited
            Err(_) => request,
        }
        .shared();

        UnaryCall {
            method: self.method.clone(),
            request_headers,
            input,
            task,
        }
    }
}

/// RPC transport that maps unary calls onto HTTP POST with JSON bodies.
pub struct RestRpcTransport {
    service: Arc<ServiceDescriptor>,
    http: Arc<dyn HttpPost>,
    unary_handlers: HashMap<String, UnaryHandler>,
}

impl std::fmt::Debug for RestRpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRpcTransport")
            .field("service", &self.service.type_name)
            .field("unary_methods", &self.unary_handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RestRpcTransport {
    /// Build a transport for `service`.
    ///
    /// Fails if any unary method lacks a usable POST binding.
    pub fn new(
        service: Arc<ServiceDescriptor>,
        http: Arc<dyn HttpPost>,
    ) -> Result<Self, PbmockError> {
        let mut unary_handlers = HashMap::new();
        for method in service.methods.iter().filter(|m| m.is_unary()) {
            let binding = method_binding(method)?;
            unary_handlers.insert(
                method.name.clone(),
                UnaryHandler {
                    method: method.clone(),
                    binding,
                },
            );
        }

        Ok(Self {
            service,
            http,
            unary_handlers,
        })
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Unary call by method name.
    pub fn call(
        &self,
        method: &str,
        input: DynMessage,
        options: RpcOptions,
    ) -> Result<UnaryCall, PbmockError> {
        let handler = self.handler(method)?;
        Ok(handler.call(self.http.clone(), input, options))
    }

    fn handler(&self, method: &str) -> Result<&UnaryHandler, PbmockError> {
        self.unary_handlers
            .get(method)
            .ok_or_else(|| PbmockError::UnknownMethod {
                service: self.service.type_name.clone(),
                method: method.to_string(),
            })
    }
}

impl RpcTransport for RestRpcTransport {
    fn merge_options(&self, partial: Option<PartialRpcOptions>) -> RpcOptions {
        partial.unwrap_or_default().merge_into(RpcOptions::default())
    }

    fn unary(
        &self,
        method: &MethodDescriptor,
        input: DynMessage,
        options: RpcOptions,
    ) -> Result<UnaryCall, PbmockError> {
        if method.service != self.service.type_name {
            return Err(PbmockError::UnknownMethod {
                service: method.service.clone(),
                method: method.name.clone(),
            });
        }
        self.call(&method.name, input, options)
    }

    fn server_streaming(
        &self,
        _method: &MethodDescriptor,
        _input: DynMessage,
        _options: RpcOptions,
    ) -> Result<Infallible, PbmockError> {
        Err(PbmockError::NotImplemented("server streaming"))
    }

    fn client_streaming(
        &self,
        _method: &MethodDescriptor,
        _options: RpcOptions,
    ) -> Result<Infallible, PbmockError> {
        Err(PbmockError::NotImplemented("client streaming"))
    }

    fn duplex(
        &self,
        _method: &MethodDescriptor,
        _options: RpcOptions,
    ) -> Result<Infallible, PbmockError> {
        Err(PbmockError::NotImplemented("duplex streaming"))
    }
}
