//! Declarative mock definition files.
//!
//! A definition file holds one service definition or a list of them:
//!
//! ```json
//! {
//!   "type": "greeter.Greeter",
//!   "prefix": "/greeter",
//!   "service": { "SayHello": { "message": "hi" } }
//! }
//! ```
//!
//! `type` names a service from the schema catalog and `service` maps each
//! mocked method to the response it returns.

use std::path::Path;
use std::sync::Arc;

use futures::future::FutureExt;
use serde_json::{Map, Value};

use crate::config::loader::strip_jsonc_comments;
use crate::descriptor::{json_type_name, DynMessage};
use crate::error::PbmockError;
use crate::mock::registry::{ModuleSpec, ServiceSpec};
use crate::mock::service::{CallContext, MockHandler, ServiceImpl};
use crate::schema::ServiceCatalog;

/// A validated, not yet resolved, service definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub type_name: String,
    pub responses: Map<String, Value>,
    pub prefix: Option<String>,
}

fn invalid(msg: String) -> PbmockError {
    PbmockError::InvalidModuleSpec(msg)
}

fn validate_service(value: &Value) -> Result<ServiceDefinition, PbmockError> {
    let obj = value.as_object().ok_or_else(|| {
        invalid(format!(
            "require service to be object, got {}",
            json_type_name(value)
        ))
    })?;

    let type_name = match obj.get("type") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        other => {
            return Err(invalid(format!(
                "require service.type to be a service name, got {}",
                other.map_or("undefined", json_type_name)
            )))
        }
    };

    let responses = match obj.get("service") {
        Some(Value::Object(map)) => map.clone(),
        other => {
            return Err(invalid(format!(
                "require service.service to be object, got {}",
                other.map_or("undefined", json_type_name)
            )))
        }
    };

    let prefix = match obj.get("prefix") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(invalid(format!(
                "require service.prefix to be string, got {}",
                json_type_name(other)
            )))
        }
    };

    Ok(ServiceDefinition {
        type_name,
        responses,
        prefix,
    })
}

/// Validate a single definition or a list of them into a uniform list.
pub fn validate_definition(value: &Value) -> Result<Vec<ServiceDefinition>, PbmockError> {
    match value {
        Value::Array(items) => items.iter().map(validate_service).collect(),
        single => Ok(vec![validate_service(single)?]),
    }
}

fn canned(response: Value) -> MockHandler {
    Arc::new(move |_input: DynMessage, _ctx: CallContext| {
        let response = response.clone();
        async move { Ok::<DynMessage, PbmockError>(Box::new(response)) }.boxed()
    })
}

/// Resolve definitions against `catalog` into a registrable module.
pub fn into_module_spec(
    definitions: Vec<ServiceDefinition>,
    catalog: &ServiceCatalog,
) -> Result<ModuleSpec, PbmockError> {
    let mut services = Vec::with_capacity(definitions.len());
    for def in definitions {
        let descriptor = catalog.get(&def.type_name).ok_or_else(|| {
            invalid(format!(
                "unknown service type '{}', known: {}",
                def.type_name,
                catalog.service_names().join(", ")
            ))
        })?;

        let responses = def.responses;
        let mut spec = ServiceSpec::new(descriptor, move || {
            responses
                .iter()
                .fold(ServiceImpl::new(), |svc, (method, response)| {
                    svc.raw(method, canned(response.clone()))
                })
        });
        spec.prefix = def.prefix;
        services.push(spec);
    }
    Ok(ModuleSpec { services })
}

/// Read, validate and resolve a definition file.
pub fn load_module_file(path: &Path, catalog: &ServiceCatalog) -> Result<ModuleSpec, PbmockError> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&strip_jsonc_comments(&content))
        .map_err(|e| invalid(format!("{}: invalid JSON: {e}", path.display())))?;
    into_module_spec(validate_definition(&value)?, catalog)
}
