//! `notify`-backed watcher bridged into an async debounce task (§4.6.1).
//! The watcher's synchronous callback runs on `notify`'s own thread and
//! forwards raw events over an unbounded channel; shutdown uses the same
//! `Arc<Notify>` handle/listener pair the teacher used for its input task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WatchShutdown {
    notify: Arc<Notify>,
}

impl WatchShutdown {
    pub fn signal(&self) {
        self.notify.notify_one();
    }
}

#[derive(Clone)]
pub(crate) struct ShutdownListener {
    notify: Arc<Notify>,
}

impl ShutdownListener {
    pub(crate) fn new_pair() -> (WatchShutdown, Self) {
        let notify = Arc::new(Notify::new());
        (
            WatchShutdown { notify: notify.clone() },
            ShutdownListener { notify },
        )
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
pub enum RawFsEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Owns the `notify` watcher thread and exposes `watch`/`unwatch` plus the
/// receiver end a debounce task drains.
pub struct Watcher {
    inner: notify::RecommendedWatcher,
}

impl Watcher {
    pub fn spawn() -> notify::Result<(Self, UnboundedReceiver<RawFsEvent>)> {
        let (tx, rx): (UnboundedSender<RawFsEvent>, _) = mpsc::unbounded_channel();
        let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "fs watcher error");
                    return;
                }
            };
            let removal = matches!(
                event.kind,
                notify::EventKind::Remove(_)
                    | notify::EventKind::Modify(notify::event::ModifyKind::Name(
                        notify::event::RenameMode::From
                    ))
            );
            for path in event.paths {
                let raw = if removal {
                    RawFsEvent::Removed(path)
                } else {
                    RawFsEvent::Changed(path)
                };
                if tx.send(raw).is_err() {
                    debug!("fs watcher channel closed, dropping event");
                }
            }
        })?;
        Ok((Self { inner }, rx))
    }

    pub fn watch(&mut self, path: &Path) -> notify::Result<()> {
        use notify::Watcher as _;
        self.inner.watch(path, notify::RecursiveMode::NonRecursive)
    }

    pub fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        use notify::Watcher as _;
        self.inner.unwatch(path)
    }
}

/// Spawn the debounce task that drains `rx`, coalesces bursts per path over
/// the 300 ms window, and forwards settled events to `on_settled`.
pub fn spawn_debounce_task(
    rx: UnboundedReceiver<RawFsEvent>,
    on_settled: UnboundedSender<crate::Settled>,
) -> (JoinHandle<()>, WatchShutdown) {
    let (shutdown, listener) = ShutdownListener::new_pair();
    let handle = task::spawn(async move {
        crate::debounce::run(rx, on_settled, listener).await;
    });
    (handle, shutdown)
}
