use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use colored::Colorize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::MockSettings;
use crate::error::PbmockError;
use crate::mock::definition::load_module_file;
use crate::mock::reload::run_until;
use crate::mock::{Debouncer, MockRegistry, MockServer, ReloadSupervisor, Reloadable};
use crate::schema::ServiceCatalog;
use crate::watch::{MockWatcher, WatchEvent};

fn lock(registry: &Mutex<MockRegistry>) -> MutexGuard<'_, MockRegistry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

fn module_id(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Apply watcher events to the registry. Returns the paths whose change
/// altered the registry and therefore needs a reload.
///
/// A definition that fails to load is logged and leaves its previous
/// registration, if any, in place.
pub fn apply_events(
    registry: &Mutex<MockRegistry>,
    catalog: &ServiceCatalog,
    events: Vec<WatchEvent>,
) -> Vec<PathBuf> {
    let mut changed = Vec::new();
    for event in events {
        match event {
            WatchEvent::Added(path) | WatchEvent::Changed(path) => {
                match load_module_file(&path, catalog) {
                    Ok(spec) => {
                        lock(registry).add_module(&module_id(&path), spec);
                        changed.push(path);
                    }
                    Err(e) => error!("failed to add mock, path={}, error={e}", path.display()),
                }
            }
            WatchEvent::Removed(path) => {
                if lock(registry).remove_module(&module_id(&path)) {
                    changed.push(path);
                }
            }
        }
    }
    changed
}

fn log_reload(paths: &BTreeSet<String>) {
    let joined = paths.iter().cloned().collect::<Vec<_>>().join(", ");
    info!("{} {}", "reload".green(), joined.dimmed());
}

async fn watch_loop(
    mut watcher: MockWatcher,
    registry: Arc<Mutex<MockRegistry>>,
    catalog: Arc<ServiceCatalog>,
    debouncer: Debouncer,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the initial scan already happened
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match watcher.poll().await {
            Ok(events) => {
                for path in apply_events(&registry, &catalog, events) {
                    debouncer.push(path.display().to_string());
                }
            }
            Err(e) => warn!("Failed to scan {}: {e}", watcher.dir().display()),
        }
    }
}

/// Run the mock server until Ctrl-C, hot reloading on definition changes.
pub async fn run_mock(settings: MockSettings) -> Result<(), PbmockError> {
    let dir = settings
        .dir
        .canonicalize()
        .map_err(|e| PbmockError::ConfigError {
            path: settings.dir.clone(),
            detail: format!("Cannot watch directory: {e}"),
        })?;
    if settings.schemas.is_empty() {
        return Err(PbmockError::InvalidArgument(
            "No schema files: pass --schema or set \"schemas\" in pbmock.json".to_string(),
        ));
    }

    let catalog = Arc::new(ServiceCatalog::load_all(&settings.schemas)?);
    info!(
        "loaded {} services: {}",
        catalog.len(),
        catalog.service_names().join(", ")
    );

    let registry = Arc::new(Mutex::new(MockRegistry::new()));
    let mut watcher = MockWatcher::new(&dir, &settings.file_suffix);
    info!(
        "watching on {}, pattern={}",
        dir.display(),
        watcher.patterns().join(",")
    );
    let initial = watcher.poll().await?;
    apply_events(&registry, &catalog, initial);

    let supervisor = Arc::new(ReloadSupervisor::new({
        let registry = registry.clone();
        let opts = settings.server.clone();
        move || -> Result<Arc<dyn Reloadable>, PbmockError> {
            let bindings = lock(&registry).list_bindings();
            Ok(Arc::new(MockServer::new(opts.clone(), bindings)?))
        }
    }));

    let (debouncer, debounce_task) = Debouncer::spawn(settings.debounce, {
        let supervisor = supervisor.clone();
        move |paths: BTreeSet<String>| {
            let supervisor = supervisor.clone();
            async move {
                log_reload(&paths);
                supervisor.reload().await;
            }
        }
    });
    let watching = tokio::spawn(watch_loop(
        watcher,
        registry,
        catalog,
        debouncer,
        settings.poll_interval,
    ));

    run_until(&*supervisor, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await;

    watching.abort();
    let _ = watching.await;
    let _ = debounce_task.await;
    info!("Mock server stopped");
    Ok(())
}
