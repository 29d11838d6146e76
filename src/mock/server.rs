use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use colored::Colorize;
use futures::future::FutureExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::descriptor::MethodDescriptor;
use crate::error::PbmockError;
use crate::http_rule::method_binding;
use crate::mock::registry::ServiceBinding;
use crate::mock::reload::{Reloadable, RunParams};
use crate::mock::service::{CallContext, MockHandler};

pub const DEFAULT_PORT: u16 = 18877;
pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockServerOptions {
    pub host: String,
    pub port: u16,
    /// Path prefix every route is mounted under.
    pub prefix: String,
    /// Log every request through `tower_http`'s trace layer.
    pub request_log: bool,
}

impl Default for MockServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            prefix: "/".to_string(),
            request_log: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StartParams {
    pub log_start: bool,
}

struct MethodRoute {
    path: String,
    service: String,
    method: MethodDescriptor,
    handler: MockHandler,
}

/// HTTP listener dispatching POST routes to mock implementations.
///
/// Built from a snapshot of bindings; routes are fixed for its lifetime.
pub struct MockServer {
    opts: MockServerOptions,
    router: Router,
    routes: Vec<String>,
    started: AtomicBool,
    shutdown: CancellationToken,
    closed: CancellationToken,
    local_addr: watch::Sender<Option<SocketAddr>>,
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("opts", &self.opts)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl MockServer {
    /// Build the route table. Fails before listening if a binding is unusable
    /// or an implementation lacks a method.
    pub fn new(
        opts: MockServerOptions,
        bindings: Vec<ServiceBinding>,
    ) -> Result<Self, PbmockError> {
        let table = route_table(&opts.prefix, &bindings)?;
        let routes: Vec<String> = table.values().map(|r| r.path.clone()).collect();

        let mut router = Router::new();
        for route in table.into_values() {
            let path = route.path.clone();
            let route = Arc::new(route);
            router = router.route(&path, post(move |body: Bytes| dispatch(route.clone(), body)));
        }
        if opts.request_log {
            router = router.layer(TraceLayer::new_for_http());
        }

        let (local_addr, _) = watch::channel(None);
        Ok(Self {
            opts,
            router,
            routes,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
            local_addr,
        })
    }

    pub fn options(&self) -> &MockServerOptions {
        &self.opts
    }

    /// Full paths of every registered route, sorted.
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    /// Wait until the listener is bound. `None` if the server closed first.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut rx = self.local_addr.subscribe();
        tokio::select! {
            _ = rx.wait_for(Option::is_some) => {}
            _ = self.closed.cancelled() => {}
        }
        let addr = *rx.borrow();
        addr
    }

    /// Bind and serve until [`MockServer::close`] is called.
    pub async fn start(&self, params: StartParams) -> Result<(), PbmockError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PbmockError::ServerAlreadyStarted);
        }

        let listener = match TcpListener::bind((self.opts.host.as_str(), self.opts.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.closed.cancel();
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        self.local_addr.send_replace(Some(addr));

        if params.log_start {
            info!("Mock server started");
            print_server_urls(&self.opts, addr);
        }

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        self.closed.cancel();
        result.map_err(PbmockError::from)
    }

    /// Stop accepting connections and wait for the listener to close.
    pub async fn close(&self) -> Result<(), PbmockError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(PbmockError::ServerNotStarted);
        }
        self.shutdown.cancel();
        self.closed.cancelled().await;
        Ok(())
    }
}

#[async_trait]
impl Reloadable for MockServer {
    async fn run(&self, params: RunParams) -> Result<(), PbmockError> {
        self.start(StartParams {
            log_start: params.first_run,
        })
        .await
    }

    async fn close(&self) -> Result<(), PbmockError> {
        MockServer::close(self).await
    }
}

/// Route table keyed by the path with capture names erased, so templates
/// that differ only in variable names collide; later bindings replace
/// earlier ones.
fn route_table(
    prefix: &str,
    bindings: &[ServiceBinding],
) -> Result<BTreeMap<String, MethodRoute>, PbmockError> {
    let mut table: BTreeMap<String, MethodRoute> = BTreeMap::new();

    for binding in bindings {
        let service = &binding.descriptor.type_name;
        for method in &binding.descriptor.methods {
            if !method.is_unary() {
                warn!("Skipping streaming method {service}.{}", method.name);
                continue;
            }

            let handler = binding.service.handler(&method.name).ok_or_else(|| {
                PbmockError::MissingMockImplementation {
                    service: service.clone(),
                    method: method.name.clone(),
                }
            })?;

            let template = method_binding(method)?.post;
            let path = join_paths(&[prefix, &binding.prefix, &router_path(&template)?]);
            let key = route_key(&path)?;

            let route = MethodRoute {
                path,
                service: service.clone(),
                method: method.clone(),
                handler: handler.clone(),
            };
            if let Some(previous) = table.insert(key, route) {
                warn!(
                    "Route POST {} of {}.{} replaced by {service}.{}",
                    previous.path, previous.service, previous.method.name, method.name
                );
            }
        }
    }

    check_captures(&table)?;
    Ok(table)
}

/// Join path segments with single slashes, always rooted.
pub(crate) fn join_paths(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            path.push('/');
            path.push_str(part);
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

fn unsupported(path: &str) -> PbmockError {
    PbmockError::UnsupportedBinding {
        rule: format!("{{\"post\":\"{path}\"}}"),
    }
}

/// Translate a binding template into the router's path syntax.
///
/// `{name}` and `{name=*}` capture one whole segment; a variable whose
/// pattern spans segments becomes a trailing catch-all.
pub(crate) fn router_path(template: &str) -> Result<String, PbmockError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let close = rest[open..].find('}').ok_or_else(|| unsupported(template))? + open;
        let var = &rest[open + 1..close];
        let (field, pattern) = var.split_once('=').unwrap_or((var, "*"));
        let field = field.trim().replace('.', "_");
        rest = &rest[close + 1..];

        let valid_name = !field.is_empty()
            && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let whole_segment = out.ends_with('/') && (rest.is_empty() || rest.starts_with('/'));
        if !valid_name || !whole_segment {
            return Err(unsupported(template));
        }

        if pattern.contains('/') || pattern.contains("**") {
            if !rest.is_empty() {
                return Err(unsupported(template));
            }
            out.push_str(&format!("{{*{field}}}"));
        } else {
            out.push_str(&format!("{{{field}}}"));
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Segment kinds of a router path, with capture names erased.
///
/// Rejects segments the router cannot register: stray braces, a leading
/// `:` or `*` and a catch-all that is not last.
fn route_key(path: &str) -> Result<String, PbmockError> {
    let segments: Vec<&str> = path.split('/').collect();
    let mut key = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().copied().enumerate() {
        if let Some(name) = segment.strip_prefix("{*").and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() || i + 1 != segments.len() {
                return Err(unsupported(path));
            }
            key.push("{*}");
        } else if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(unsupported(path));
            }
            key.push("{}");
        } else if segment.contains(['{', '}']) || segment.starts_with([':', '*']) {
            return Err(unsupported(path));
        } else {
            key.push(segment);
        }
    }
    Ok(key.join("/"))
}

/// The router allows only one kind of capture after a given path prefix:
/// `/a/{id}` and `/a/{*rest}` cannot both be registered.
fn check_captures(table: &BTreeMap<String, MethodRoute>) -> Result<(), PbmockError> {
    let mut seen: HashMap<&str, (&str, &str)> = HashMap::new();
    for (key, route) in table {
        let mut offset = 0;
        for segment in key.split('/') {
            if segment == "{}" || segment == "{*}" {
                let parent = &key[..offset];
                match seen.get(parent) {
                    Some((kind, other)) if *kind != segment => {
                        return Err(PbmockError::UnsupportedBinding {
                            rule: format!(
                                "{{\"post\":\"{}\"}} conflicts with {other}",
                                route.path
                            ),
                        });
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(parent, (segment, route.path.as_str()));
                    }
                }
            }
            offset += segment.len() + 1;
        }
    }
    Ok(())
}

async fn dispatch(route: Arc<MethodRoute>, body: Bytes) -> Response {
    match invoke(&route, &body).await {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(e) => {
            error!(
                service = %route.service,
                method = %route.method.name,
                "request error: {e}"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(e.to_json())).into_response()
        }
    }
}

async fn invoke(route: &MethodRoute, body: &[u8]) -> Result<Value, PbmockError> {
    let json: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body)
            .map_err(|e| PbmockError::codec(route.method.input.type_name(), e))?
    };
    let input = route.method.input.from_json(json)?;

    // a handler may panic before handing back its future
    let output = AssertUnwindSafe(async { (route.handler)(input, CallContext::default()).await })
        .catch_unwind()
        .await
        .map_err(|panic| PbmockError::HandlerError(panic_message(panic.as_ref())))??;

    route.method.output.to_json(output.as_ref())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

fn print_server_urls(opts: &MockServerOptions, addr: SocketAddr) {
    let prefix = join_paths(&[&opts.prefix]);
    let local = format!("http://127.0.0.1:{}{}", addr.port(), prefix);
    info!("  {} {}", "➜  Local:".green(), local.cyan());
    if opts.host.starts_with('0') {
        let network = format!("http://{}:{}{}", opts.host, addr.port(), prefix);
        info!("  {} {}", "➜  Network:".green(), network.cyan());
    } else {
        info!("  {} {}", "➜  Network:".green(), "use --host to expose".dimmed());
    }
}
