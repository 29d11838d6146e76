use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::PbmockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub first_run: bool,
}

/// Something the supervisor can run until closed, then throw away.
#[async_trait]
pub trait Reloadable: Send + Sync {
    /// Run until [`Reloadable::close`] is called or the instance fails.
    async fn run(&self, params: RunParams) -> Result<(), PbmockError>;

    async fn close(&self) -> Result<(), PbmockError>;
}

impl std::fmt::Debug for dyn Reloadable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Reloadable")
    }
}

/// Builds a fresh instance for every supervisor cycle.
pub trait ReloadFactory: Send + Sync {
    fn build(&self) -> Result<Arc<dyn Reloadable>, PbmockError>;
}

impl<F> ReloadFactory for F
where
    F: Fn() -> Result<Arc<dyn Reloadable>, PbmockError> + Send + Sync,
{
    fn build(&self) -> Result<Arc<dyn Reloadable>, PbmockError> {
        self()
    }
}

#[derive(Clone, Default)]
struct Cycle {
    cancel: CancellationToken,
    done: CancellationToken,
}

struct ReloadState {
    current: Option<Cycle>,
    stop_requested: bool,
    first_run: bool,
}

/// Restart loop keeping at most one instance alive.
///
/// Every cycle builds an instance, runs it until `reload()` or `stop()`
/// closes it, then starts over unless a stop was requested.
pub struct ReloadSupervisor<F> {
    factory: F,
    state: Mutex<ReloadState>,
    // bumped whenever a cycle starts or the loop exits
    generation: watch::Sender<u64>,
    builds: AtomicUsize,
}

impl<F> std::fmt::Debug for ReloadSupervisor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadSupervisor")
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}

impl<F> ReloadSupervisor<F> {
    /// Number of instances built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl<F: ReloadFactory> ReloadSupervisor<F> {
    pub fn new(factory: F) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            factory,
            state: Mutex::new(ReloadState {
                current: None,
                stop_requested: false,
                first_run: true,
            }),
            generation,
            builds: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReloadState> {
        // state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn run_forever(&self) {
        loop {
            let cycle = Cycle::default();
            let first_run = {
                let mut state = self.lock();
                if state.stop_requested {
                    state.current = None;
                    self.generation.send_modify(|g| *g += 1);
                    return;
                }
                state.current = Some(cycle.clone());
                self.generation.send_modify(|g| *g += 1);
                state.first_run
            };

            self.run_cycle(&cycle, RunParams { first_run }).await;
            cycle.done.cancel();

            let mut state = self.lock();
            state.first_run = false;
            if state.stop_requested {
                state.current = None;
                self.generation.send_modify(|g| *g += 1);
                debug!("reload loop stopped");
                return;
            }
        }
    }

    async fn run_cycle(&self, cycle: &Cycle, params: RunParams) {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let instance = match self.factory.build() {
            Ok(instance) => instance,
            Err(e) => {
                error!("Failed to build server: {e}");
                cycle.cancel.cancelled().await;
                return;
            }
        };

        let run = instance.run(params);
        tokio::pin!(run);
        tokio::select! {
            biased;
            result = &mut run => {
                if let Err(e) = result {
                    error!("Server stopped: {e}");
                }
                // wait for the next reload instead of spinning on a broken instance
                cycle.cancel.cancelled().await;
            }
            _ = cycle.cancel.cancelled() => {
                let (result, closed) = tokio::join!(run, instance.close());
                if let Err(e) = closed {
                    error!("Failed to close server: {e}");
                }
                if let Err(e) = result {
                    error!("Server stopped: {e}");
                }
            }
        }
    }

    /// Close the live instance and wait until its replacement has started.
    pub async fn reload(&self) {
        let (cycle, generation) = {
            let state = self.lock();
            (state.current.clone(), *self.generation.borrow())
        };
        let Some(cycle) = cycle else {
            return;
        };
        cycle.cancel.cancel();
        cycle.done.cancelled().await;

        let mut rx = self.generation.subscribe();
        let _ = rx.wait_for(|g| *g != generation).await;
    }

    /// Close the live instance and end the loop.
    pub async fn stop(&self) {
        let cycle = {
            let mut state = self.lock();
            state.stop_requested = true;
            state.current.clone()
        };
        if let Some(cycle) = cycle {
            cycle.cancel.cancel();
            cycle.done.cancelled().await;
        }
    }
}

/// Run `supervisor` until `signal` resolves, then stop it.
pub async fn run_until<F, S>(supervisor: &ReloadSupervisor<F>, signal: S)
where
    F: ReloadFactory,
    S: Future<Output = ()>,
{
    let run = supervisor.run_forever();
    tokio::pin!(run);
    tokio::select! {
        _ = &mut run => return,
        _ = signal => {}
    }
    tokio::join!(run, supervisor.stop());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct Probe {
        live: AtomicUsize,
        max_live: AtomicUsize,
        first_runs: AtomicUsize,
    }

    struct Instance {
        probe: Arc<Probe>,
        closed: CancellationToken,
        started: AtomicBool,
    }

    #[async_trait]
    impl Reloadable for Instance {
        async fn run(&self, params: RunParams) -> Result<(), PbmockError> {
            self.started.store(true, Ordering::SeqCst);
            let live = self.probe.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_live.fetch_max(live, Ordering::SeqCst);
            if params.first_run {
                self.probe.first_runs.fetch_add(1, Ordering::SeqCst);
            }
            self.closed.cancelled().await;
            self.probe.live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), PbmockError> {
            if !self.started.load(Ordering::SeqCst) {
                return Err(PbmockError::ServerNotStarted);
            }
            self.closed.cancel();
            Ok(())
        }
    }

    fn factory(probe: Arc<Probe>) -> impl ReloadFactory {
        move || -> Result<Arc<dyn Reloadable>, PbmockError> {
            Ok(Arc::new(Instance {
                probe: probe.clone(),
                closed: CancellationToken::new(),
                started: AtomicBool::new(false),
            }))
        }
    }

    #[tokio::test]
    async fn n_reloads_build_n_plus_one_instances() {
        let probe = Arc::new(Probe::default());
        let supervisor = Arc::new(ReloadSupervisor::new(factory(probe.clone())));
        let looping = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run_forever().await }
        });

        while supervisor.build_count() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..3 {
            supervisor.reload().await;
        }
        supervisor.stop().await;
        tokio::time::timeout(Duration::from_secs(5), looping)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(supervisor.build_count(), 4);
        assert_eq!(probe.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(probe.first_runs.load(Ordering::SeqCst), 1);
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn debug_reports_build_count() {
        let supervisor = ReloadSupervisor::new(factory(Arc::new(Probe::default())));
        assert_eq!(format!("{supervisor:?}"), "ReloadSupervisor { builds: 0, .. }");
    }

    #[tokio::test]
    async fn stop_before_run_builds_nothing() {
        let supervisor = ReloadSupervisor::new(factory(Arc::new(Probe::default())));
        supervisor.reload().await;
        supervisor.stop().await;
        supervisor.run_forever().await;
        assert_eq!(supervisor.build_count(), 0);
    }

    #[tokio::test]
    async fn build_failure_waits_for_next_reload() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let probe = Arc::new(Probe::default());
        let counter = attempts.clone();
        let inner = factory(probe.clone());
        let supervisor = Arc::new(ReloadSupervisor::new(
            move || -> Result<Arc<dyn Reloadable>, PbmockError> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(PbmockError::InvalidModuleSpec("broken".into()));
                }
                inner.build()
            },
        ));
        let looping = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run_forever().await }
        });

        while supervisor.build_count() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(supervisor.build_count(), 1);

        supervisor.reload().await;
        while probe.live.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        supervisor.stop().await;
        looping.await.unwrap();
        assert_eq!(supervisor.build_count(), 2);
    }

    #[tokio::test]
    async fn run_until_stops_on_signal() {
        let probe = Arc::new(Probe::default());
        let supervisor = ReloadSupervisor::new(factory(probe.clone()));
        run_until(&supervisor, tokio::time::sleep(Duration::from_millis(20))).await;
        assert_eq!(supervisor.build_count(), 1);
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
    }
}
