//! Event plumbing: the channel-level `Event` enum driving the main loop, the
//! `AsyncEventSource`/`EventSourceRegistry` pair that feeds it, and the
//! `Signal`/`SignalBus` observer table that fans domain notifications out to
//! the GUI collaborator.

use std::path::PathBuf;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

pub const EVENT_CHANNEL_CAP: usize = 4096;

/// Top-level event consumed by the main loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A debounced filesystem notification from the working-directory
    /// monitor's collaborator thread.
    Fs(FsChange),
    /// A thumbnail worker finished (or failed) one path.
    ThumbnailDone { index: usize, outcome: ThumbnailOutcome },
    /// Periodic monotonic tick used to drive timed-buffer expiry
    /// (count/partial buffer timeouts, §4.3).
    Tick,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum FsChange {
    DirectoryChanged(PathBuf),
    FileChanged(PathBuf),
}

#[derive(Debug, Clone)]
pub enum ThumbnailOutcome {
    Created(PathBuf),
    Failed,
}

/// Trait implemented by any async event producer; each spawns one background
/// task pushing `Event`s into the shared channel and must exit promptly once
/// the channel closes.
pub trait AsyncEventSource: Send + 'static {
    fn name(&self) -> &'static str;
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources spawned together at startup.
#[derive(Default)]
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    /// Spawn all registered sources, draining the registry so a second call
    /// spawns nothing. Caller should drop its `Sender` before awaiting the
    /// returned handles so sources observe channel closure and exit.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

/// Monotonic tick source driving count/partial buffer timeout checks.
pub struct TickEventSource {
    interval: std::time::Duration,
}

impl TickEventSource {
    pub fn new(interval: std::time::Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Domain signals (§6 "Signals emitted to GUI") and the observer table that
// replaces Qt's signal/slot mechanism.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Signal {
    Loaded { images: usize, directories: usize },
    Changed { images: usize, directories: usize },
    ImagesChanged { images: usize, added: usize, removed: usize },
    ImageChanged,
    PartialMatches { prefix: String, candidate_count: usize },
    PartialCleared,
    StatusUpdate { reason: &'static str },
    StatusClear { reason: &'static str },
    ModeEntered(String),
    ModeLeft(String),
    ModeFirstEntered(String),
    ThumbnailCreated { index: usize, icon_path: Option<PathBuf> },
    /// A `:!...` command line; the shell invocation itself is out of scope
    /// here (§4.4 step 1) and is the GUI collaborator's responsibility.
    ShellCommand(String),
}

type Subscriber = Box<dyn Fn(&Signal) + Send + Sync>;

/// FIFO observer table: `subscribe` registers a callback, `emit` runs every
/// registered callback in subscription order.
#[derive(Default)]
pub struct SignalBus {
    subscribers: Vec<Subscriber>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, f: F)
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(f));
    }

    pub fn emit(&self, signal: Signal) {
        for sub in &self.subscribers {
            sub(&signal);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct OnceSource {
        fired: AtomicBool,
    }

    impl AsyncEventSource for OnceSource {
        fn name(&self) -> &'static str {
            "once"
        }

        fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
            tokio::spawn(async move {
                if !self.fired.swap(true, Ordering::SeqCst) {
                    let _ = tx.send(Event::Tick).await;
                }
            })
        }
    }

    #[tokio::test]
    async fn registry_spawns_and_drains() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(OnceSource {
            fired: AtomicBool::new(false),
        });
        reg.register(TickEventSource::new(Duration::from_millis(5)));
        let handles = reg.spawn_all(&tx);
        assert!(reg.spawn_all(&tx).is_empty(), "second spawn_all must be a no-op");

        let mut got_tick = 0;
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(100) && got_tick < 2 {
            if let Ok(Some(Event::Tick)) =
                tokio::time::timeout(Duration::from_millis(10), rx.recv()).await
            {
                got_tick += 1;
            }
        }
        assert!(got_tick >= 2);
        drop(tx);
        drop(rx);
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_millis(50), h).await;
        }
    }

    #[test]
    fn signal_bus_delivers_fifo() {
        let mut bus = SignalBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        for id in 0..3 {
            let order = order.clone();
            let calls = calls.clone();
            bus.subscribe(move |_sig| {
                calls.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(id);
            });
        }
        bus.emit(Signal::ImageChanged);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn signal_bus_empty_emit_is_noop() {
        let bus = SignalBus::new();
        bus.emit(Signal::PartialCleared);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
