use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

pub const DEFAULT_WAIT: Duration = Duration::from_millis(500);

/// Coalesces bursts of changed paths into one callback.
///
/// Each push restarts the wait window; when it elapses the callback gets
/// every path pushed since the last fire.
#[derive(Debug, Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<String>,
}

impl Debouncer {
    /// Spawn the timer task. It ends once every handle is dropped, firing
    /// one last time if paths are still pending.
    pub fn spawn<F, Fut>(wait: Duration, on_fire: F) -> (Self, JoinHandle<()>)
    where
        F: Fn(BTreeSet<String>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(wait, rx, on_fire));
        (Self { tx }, task)
    }

    pub fn push(&self, path: impl Into<String>) {
        // the task only goes away once every sender is dropped
        let _ = self.tx.send(path.into());
    }
}

async fn run<F, Fut>(wait: Duration, mut rx: mpsc::UnboundedReceiver<String>, on_fire: F)
where
    F: Fn(BTreeSet<String>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut pending = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(path) => {
                    pending.insert(path);
                    deadline = Some(Instant::now() + wait);
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                on_fire(std::mem::take(&mut pending)).await;
            }
        }
    }

    if !pending.is_empty() {
        on_fire(pending).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Fired = Arc<Mutex<Vec<BTreeSet<String>>>>;

    fn recorder() -> (Fired, impl Fn(BTreeSet<String>) -> std::future::Ready<()> + Send + 'static) {
        let fired: Fired = Arc::default();
        let sink = fired.clone();
        (fired, move |paths| {
            sink.lock().unwrap().push(paths);
            std::future::ready(())
        })
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_with_union() {
        let (fired, on_fire) = recorder();
        let (debouncer, _task) = Debouncer::spawn(DEFAULT_WAIT, on_fire);

        debouncer.push("a");
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.push("b");
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.push("a");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock().unwrap(), vec![set(&["a", "b"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_fire_separately() {
        let (fired, on_fire) = recorder();
        let (debouncer, _task) = Debouncer::spawn(DEFAULT_WAIT, on_fire);

        debouncer.push("a");
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.push("b");
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(*fired.lock().unwrap(), vec![set(&["a"]), set(&["b"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_flushes_pending() {
        let (fired, on_fire) = recorder();
        let (debouncer, task) = Debouncer::spawn(DEFAULT_WAIT, on_fire);

        debouncer.push("a");
        drop(debouncer);
        task.await.unwrap();

        assert_eq!(*fired.lock().unwrap(), vec![set(&["a"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_drop_does_not_fire() {
        let (fired, on_fire) = recorder();
        let (debouncer, task) = Debouncer::spawn(DEFAULT_WAIT, on_fire);
        drop(debouncer);
        task.await.unwrap();
        assert!(fired.lock().unwrap().is_empty());
    }
}
