use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::descriptor::DynMessage;
use crate::error::PbmockError;

/// Context passed to mock handlers.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct CallContext {}

/// Type-erased mock handler for one method.
pub type MockHandler = Arc<
    dyn Fn(DynMessage, CallContext) -> BoxFuture<'static, Result<DynMessage, PbmockError>>
        + Send
        + Sync,
>;

/// Mock implementation of a service: method local name to handler.
#[derive(Clone, Default)]
pub struct ServiceImpl {
    handlers: HashMap<String, MockHandler>,
}

impl std::fmt::Debug for ServiceImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceImpl")
            .field("methods", &self.method_names())
            .finish()
    }
}

impl ServiceImpl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler. Input and output must match the method's
    /// message types, otherwise calls fail with a codec error.
    pub fn method<I, O, F, Fut>(mut self, name: &str, f: F) -> Self
    where
        I: Send + Sync + 'static,
        O: Send + Sync + 'static,
        F: Fn(I, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, PbmockError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let method = name.to_string();
        let handler: MockHandler = Arc::new(move |input: DynMessage, ctx: CallContext| {
            let f = f.clone();
            let method = method.clone();
            async move {
                let input = input.downcast::<I>().map_err(|_| {
                    PbmockError::codec(&method, "input does not match the handler's message type")
                })?;
                let output = f(*input, ctx).await?;
                Ok::<DynMessage, PbmockError>(Box::new(output))
            }
            .boxed()
        });
        self.handlers.insert(name.to_string(), handler);
        self
    }

    /// Register an already type-erased handler.
    pub fn raw(mut self, name: &str, handler: MockHandler) -> Self {
        self.handlers.insert(name.to_string(), handler);
        self
    }

    pub fn handler(&self, name: &str) -> Option<&MockHandler> {
        self.handlers.get(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn typed_handler_round_trips() {
        let svc = ServiceImpl::new().method("Double", |n: u32, _ctx| async move { Ok(n * 2) });
        let handler = svc.handler("Double").unwrap();
        let out = handler(Box::new(21u32), CallContext::default()).await.unwrap();
        assert_eq!(*out.downcast::<u32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn typed_handler_rejects_wrong_input_type() {
        let svc = ServiceImpl::new().method("Double", |n: u32, _ctx| async move { Ok(n * 2) });
        let handler = svc.handler("Double").unwrap();
        let err = handler(Box::new("text"), CallContext::default()).await.unwrap_err();
        assert_eq!(err.code(), "codec_error");
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let svc = ServiceImpl::new().method("Fail", |_: u32, _ctx| async move {
            Err::<u32, _>(PbmockError::HandlerError("nope".into()))
        });
        let err = svc.handler("Fail").unwrap()(Box::new(1u32), CallContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Mock handler failed: nope");
    }

    #[test]
    fn method_names_are_sorted() {
        let svc = ServiceImpl::new()
            .method("b", |n: u32, _ctx| async move { Ok(n) })
            .method("a", |n: u32, _ctx| async move { Ok(n) });
        assert_eq!(svc.method_names(), vec!["a", "b"]);
        assert!(svc.handler("c").is_none());
    }
}
