use std::net::SocketAddr;
use std::sync::Arc;

use pbmock::http_rule::HttpRule;
use pbmock::mock::{MockServer, MockServerOptions, ServiceImpl, ServiceSpec, StartParams};
use pbmock::{MethodDescriptor, PbmockError, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

/// `greeter.Greeter` with `SayHello` bound to `POST /v1/hello`, body `*`.
pub fn greeter_descriptor() -> Arc<ServiceDescriptor> {
    Arc::new(
        ServiceDescriptor::new("greeter.Greeter").with_method(
            MethodDescriptor::typed::<HelloRequest, HelloReply>(
                "SayHello",
                "greeter.HelloRequest",
                "greeter.HelloReply",
            )
            .with_http_rule(&HttpRule::post("/v1/hello")),
        ),
    )
}

/// Greeter mock answering `hi <name>`, prefixed with `greeting`.
pub fn greeter_impl(greeting: &'static str) -> ServiceImpl {
    ServiceImpl::new().method("SayHello", move |req: HelloRequest, _ctx| async move {
        Ok(HelloReply {
            message: format!("{greeting} {}", req.name),
        })
    })
}

pub fn greeter_spec(greeting: &'static str) -> ServiceSpec {
    ServiceSpec::new(greeter_descriptor(), move || greeter_impl(greeting))
}

/// Options for a server on an ephemeral local port.
pub fn local_options() -> MockServerOptions {
    MockServerOptions {
        port: 0,
        ..MockServerOptions::default()
    }
}

/// A started server and the task driving it.
pub struct Running {
    pub server: Arc<MockServer>,
    pub addr: SocketAddr,
    task: JoinHandle<Result<(), PbmockError>>,
}

#[allow(dead_code)]
impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.server.close().await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}

pub async fn start(server: MockServer) -> Running {
    let server = Arc::new(server);
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.start(StartParams::default()).await }
    });
    let addr = server.listening().await.expect("server failed to bind");
    Running { server, addr, task }
}
