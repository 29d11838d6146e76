pub mod args;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod http_rule;
pub mod mock;
pub mod schema;
pub mod transport;
pub mod transports;
pub mod watch;

pub use config::{load_config, MockSettings, PbmockConfig};
pub use descriptor::{
    DynMessage, DynamicMessage, JsonMessage, MessageType, MethodDescriptor, ServiceDescriptor,
};
pub use error::PbmockError;
pub use http_rule::{get_rule, parse_rule, HttpRule, PostBinding};
pub use mock::{
    MockRegistry, MockServer, MockServerOptions, ReloadSupervisor, ServiceImpl, ServiceSpec,
};
pub use schema::ServiceCatalog;
pub use transport::{HttpPost, RpcOptions, RpcTransport};
pub use transports::{ReqwestPost, RestRpcTransport, UnaryCall};
