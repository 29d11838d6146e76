use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::args::{parse_method_ref, request_body, suggest_method};
use crate::config::load_config;
use crate::descriptor::{MethodDescriptor, ServiceDescriptor};
use crate::error::PbmockError;
use crate::schema::ServiceCatalog;
use crate::transport::{PartialRpcOptions, RpcTransport};
use crate::transports::{ReqwestPost, RestRpcTransport};

/// Default timeout for call operations.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:18877";

#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    /// `package.Service.Method`
    pub method_ref: String,
    pub args: Vec<String>,
    pub data: Option<String>,
    pub schemas: Vec<String>,
    pub base_url: Option<String>,
    /// `K=V` metadata sent as request headers.
    pub headers: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub config: Option<String>,
}

fn parse_headers(headers: &[String]) -> Result<HashMap<String, String>, PbmockError> {
    headers
        .iter()
        .map(|h| {
            let (k, v) = h.split_once('=').or_else(|| h.split_once(':')).ok_or_else(|| {
                PbmockError::InvalidArgument(format!("Cannot parse header '{h}': expected 'K=V'"))
            })?;
            Ok((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn find_method(
    catalog: &ServiceCatalog,
    service: &str,
    method: &str,
) -> Result<(Arc<ServiceDescriptor>, MethodDescriptor), PbmockError> {
    let descriptor = catalog.get(service).ok_or_else(|| {
        let mut msg = format!("Unknown service '{service}'.");
        if let Some(s) = suggest_method(service, &catalog.service_names()) {
            msg.push_str(&format!(" Did you mean '{s}'?"));
        }
        PbmockError::InvalidArgument(msg)
    })?;
    let found = descriptor.method(method).cloned();
    match found {
        Some(m) => Ok((descriptor, m)),
        None => {
            if let Some(s) = suggest_method(method, &descriptor.method_names()) {
                eprintln!("Did you mean '{service}.{s}'?");
            }
            Err(PbmockError::UnknownMethod {
                service: service.to_string(),
                method: method.to_string(),
            })
        }
    }
}

/// Run the call command.
pub async fn run_call(call: CallArgs) -> Result<(), PbmockError> {
    let config = load_config(call.config.as_deref())?;
    let (service, method_name) = parse_method_ref(&call.method_ref)?;

    let schemas: Vec<PathBuf> = if call.schemas.is_empty() {
        config.schemas.iter().map(PathBuf::from).collect()
    } else {
        call.schemas.iter().map(PathBuf::from).collect()
    };
    if schemas.is_empty() {
        return Err(PbmockError::InvalidArgument(
            "No schema files: pass --schema or set \"schemas\" in pbmock.json".to_string(),
        ));
    }
    let catalog = ServiceCatalog::load_all(&schemas)?;
    let (descriptor, method) = find_method(&catalog, &service, &method_name)?;

    let body = request_body(call.data.as_deref(), &call.args)?;
    let base_url = call
        .base_url
        .or(config.call.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let timeout = Duration::from_millis(
        call.timeout_ms
            .or(config.call.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
    );

    let http = ReqwestPost::new(&base_url, &config.call.headers)?;
    let transport = RestRpcTransport::new(descriptor, Arc::new(http))?;
    let options = transport.merge_options(Some(PartialRpcOptions {
        meta: Some(parse_headers(&call.headers)?),
        timeout: Some(timeout),
        json_options: None,
    }));

    let input = method.input.from_json(body)?;
    if !method.is_unary() {
        let never = match (method.client_streaming, method.server_streaming) {
            (false, true) => transport.server_streaming(&method, input, options)?,
            (true, false) => transport.client_streaming(&method, options)?,
            _ => transport.duplex(&method, options)?,
        };
        match never {}
    }

    let pending = transport.call(&method.name, input, options)?;
    let status = pending.status().await?;
    let output = pending.response().await?;
    let json = method.output.to_json(output.as_ref())?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
    );
    eprintln!("status: {} {}", status.code, status.detail);

    if !status.code.starts_with('2') {
        return Err(PbmockError::TransportError(
            format!("HTTP {} {} from {base_url}", status.code, status.detail).into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_headers_accepts_equals_and_colon() {
        let headers =
            parse_headers(&["x-env=dev".into(), "Authorization: Bearer t".into()]).unwrap();
        assert_eq!(headers.get("x-env").unwrap(), "dev");
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn find_method_suggests_close_names() {
        let mut catalog = ServiceCatalog::new();
        catalog
            .add_json(r#"{"services":[{"name":"greeter.Greeter","methods":[{"name":"SayHello"}]}]}"#)
            .unwrap();

        let (svc, method) = find_method(&catalog, "greeter.Greeter", "SayHello").unwrap();
        assert_eq!(svc.type_name, "greeter.Greeter");
        assert_eq!(method.name, "SayHello");

        let err = find_method(&catalog, "greeter.Greeter", "SayHelo").unwrap_err();
        assert_eq!(err.code(), "unknown_method");

        let err = find_method(&catalog, "greeter.Greter", "SayHello").unwrap_err();
        assert!(err.to_string().contains("Did you mean 'greeter.Greeter'?"), "got: {err}");
    }

    #[test]
    fn parse_headers_rejects_garbage() {
        let err = parse_headers(&["nope".into()]).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }
}
