use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::loader::strip_jsonc_comments;
use crate::descriptor::{DynamicMessage, MethodDescriptor, ServiceDescriptor};
use crate::error::PbmockError;

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    services: Vec<ServiceSchema>,
}

#[derive(Debug, Deserialize)]
struct ServiceSchema {
    name: String,
    #[serde(default)]
    methods: Vec<MethodSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MethodSchema {
    name: String,
    #[serde(default)]
    input_type: Option<String>,
    #[serde(default)]
    output_type: Option<String>,
    #[serde(default)]
    client_streaming: bool,
    #[serde(default)]
    server_streaming: bool,
    #[serde(default)]
    options: Map<String, Value>,
}

impl ServiceSchema {
    fn into_descriptor(self) -> ServiceDescriptor {
        let mut descriptor = ServiceDescriptor::new(&self.name);
        for method in self.methods {
            let input = method
                .input_type
                .unwrap_or_else(|| format!("{}.{}Request", self.name, method.name));
            let output = method
                .output_type
                .unwrap_or_else(|| format!("{}.{}Response", self.name, method.name));
            let mut md = MethodDescriptor::new(
                &method.name,
                Arc::new(DynamicMessage::new(&input)),
                Arc::new(DynamicMessage::new(&output)),
            )
            .streaming(method.client_streaming, method.server_streaming);
            md.options = method.options;
            descriptor = descriptor.with_method(md);
        }
        descriptor
    }
}

/// Service descriptors loaded from JSON schema files, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, PbmockError> {
        let mut catalog = Self::new();
        catalog.load_file(path)?;
        Ok(catalog)
    }

    pub fn load_all(paths: &[PathBuf]) -> Result<Self, PbmockError> {
        let mut catalog = Self::new();
        for path in paths {
            catalog.load_file(path)?;
        }
        Ok(catalog)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), PbmockError> {
        let content = std::fs::read_to_string(path).map_err(|e| PbmockError::SchemaError {
            path: path.to_path_buf(),
            detail: format!("Cannot read file: {e}"),
        })?;
        self.add_json(&content).map_err(|detail| PbmockError::SchemaError {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Parse schema JSON(C) and add its services.
    pub fn add_json(&mut self, content: &str) -> Result<(), String> {
        let file: SchemaFile = serde_json::from_str(&strip_jsonc_comments(content))
            .map_err(|e| format!("Invalid JSON: {e}"))?;
        for svc in file.services {
            if self.services.contains_key(&svc.name) {
                return Err(format!("Duplicate service '{}'", svc.name));
            }
            let descriptor = svc.into_descriptor();
            self.services
                .insert(descriptor.type_name.clone(), Arc::new(descriptor));
        }
        Ok(())
    }

    pub fn insert(&mut self, descriptor: ServiceDescriptor) {
        self.services
            .insert(descriptor.type_name.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.get(name).cloned()
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
