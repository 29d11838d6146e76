//! Mock registration, dispatch and hot reload.

pub mod debounce;
pub mod definition;
pub mod registry;
pub mod reload;
pub mod server;
pub mod service;

pub use debounce::Debouncer;
pub use registry::{MockRegistry, ModuleSpec, ServiceBinding, ServiceSpec};
pub use reload::{ReloadFactory, ReloadSupervisor, Reloadable, RunParams};
pub use server::{MockServer, MockServerOptions, StartParams};
pub use service::{CallContext, MockHandler, ServiceImpl};
