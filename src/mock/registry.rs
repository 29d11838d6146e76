use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::ServiceDescriptor;
use crate::mock::service::ServiceImpl;

/// Produces a fresh mock implementation each time a module is added.
pub type ServiceFactory = Arc<dyn Fn() -> ServiceImpl + Send + Sync>;

/// One service declared by a mock module.
#[derive(Clone)]
pub struct ServiceSpec {
    pub descriptor: Arc<ServiceDescriptor>,
    pub factory: ServiceFactory,
    pub prefix: Option<String>,
}

impl std::fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("service", &self.descriptor.type_name)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ServiceSpec {
    pub fn new<F>(descriptor: Arc<ServiceDescriptor>, factory: F) -> Self
    where
        F: Fn() -> ServiceImpl + Send + Sync + 'static,
    {
        Self {
            descriptor,
            factory: Arc::new(factory),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }
}

/// Everything a mock module registers, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ModuleSpec {
    pub services: Vec<ServiceSpec>,
}

impl From<ServiceSpec> for ModuleSpec {
    fn from(spec: ServiceSpec) -> Self {
        Self {
            services: vec![spec],
        }
    }
}

impl From<Vec<ServiceSpec>> for ModuleSpec {
    fn from(services: Vec<ServiceSpec>) -> Self {
        Self { services }
    }
}

/// Active (service, implementation, prefix) triple derived from the registry.
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    pub descriptor: Arc<ServiceDescriptor>,
    pub service: Arc<ServiceImpl>,
    pub prefix: String,
}

struct MockModule {
    id: String,
    spec: ModuleSpec,
    services: Vec<Arc<ServiceImpl>>,
}

/// Tracks which mock modules are loaded and what they provide.
///
/// Modules keep registration order; re-adding a module moves it to the end.
#[derive(Default)]
pub struct MockRegistry {
    modules: Vec<MockModule>,
    // service type name -> number of modules registering it
    known_services: HashMap<String, usize>,
}

impl std::fmt::Debug for MockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRegistry")
            .field("modules", &self.module_ids())
            .finish()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `spec` under `module_id`, replacing any previous registration.
    pub fn add_module(&mut self, module_id: &str, spec: impl Into<ModuleSpec>) -> &mut Self {
        let spec = spec.into();

        if self.contains(module_id) {
            warn!("Module {module_id} already registered, removing it first");
            self.remove_module(module_id);
        }

        for svc in &spec.services {
            let count = self
                .known_services
                .entry(svc.descriptor.type_name.clone())
                .or_insert(0);
            if *count > 0 {
                warn!(
                    "Service {} already registered, module {module_id} takes precedence",
                    svc.descriptor.type_name
                );
            }
            *count += 1;
        }

        let services = spec
            .services
            .iter()
            .map(|svc| Arc::new((svc.factory)()))
            .collect();

        debug!(module = module_id, services = spec.services.len(), "mock module added");
        self.modules.push(MockModule {
            id: module_id.to_string(),
            spec,
            services,
        });
        self
    }

    /// Remove a module. Returns `false` if it was not registered.
    pub fn remove_module(&mut self, module_id: &str) -> bool {
        let Some(idx) = self.modules.iter().position(|m| m.id == module_id) else {
            return false;
        };
        let module = self.modules.remove(idx);

        for svc in &module.spec.services {
            let name = &svc.descriptor.type_name;
            if let Some(count) = self.known_services.get_mut(name) {
                *count -= 1;
                if *count == 0 {
                    self.known_services.remove(name);
                }
            }
        }
        debug!(module = module_id, "mock module removed");
        true
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.iter().any(|m| m.id == module_id)
    }

    pub fn module_ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Flattened bindings in module registration order, then declaration order.
    pub fn list_bindings(&self) -> Vec<ServiceBinding> {
        self.modules
            .iter()
            .flat_map(|module| {
                module
                    .spec
                    .services
                    .iter()
                    .zip(&module.services)
                    .map(|(spec, service)| ServiceBinding {
                        descriptor: spec.descriptor.clone(),
                        service: service.clone(),
                        prefix: spec.prefix.clone().unwrap_or_default(),
                    })
            })
            .collect()
    }
}
