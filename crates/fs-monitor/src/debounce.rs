//! Settle-window debounce, narrowed from the pack's richer multi-state
//! file-manager debouncer to this spec's single 300 ms window and two event
//! kinds (directory vs file changed). A path re-arriving while `Expiring`
//! is promoted back to `Debounced`, extending its window; `Deduping` lets a
//! freshly observed path coalesce a burst before its first emission.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::async_service::{RawFsEvent, ShutdownListener};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Eq, PartialEq)]
enum State {
    Deduping,
    Expiring,
    Debounced,
}

struct Pending {
    expiry: Instant,
    state: State,
    removed: bool,
}

/// A settled, debounce-window-expired change ready to forward to the
/// monitor. `removed` distinguishes a deletion from a content change;
/// the caller still classifies the path (file vs directory) itself.
#[derive(Debug, Clone)]
pub struct Settled {
    pub path: PathBuf,
    pub removed: bool,
}

pub async fn run(
    mut rx: UnboundedReceiver<RawFsEvent>,
    out: UnboundedSender<crate::Settled>,
    shutdown: ShutdownListener,
) {
    let mut pending: HashMap<PathBuf, Pending> = HashMap::new();
    loop {
        let sleep_until = pending
            .values()
            .map(|p| p.expiry)
            .min()
            .unwrap_or_else(|| Instant::now() + DEBOUNCE_WINDOW);

        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep_until(sleep_until), if !pending.is_empty() => {
                flush_expired(&mut pending, &out);
            }
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => handle_raw(&mut pending, event),
                    None => break,
                }
            }
        }
    }
}

fn handle_raw(pending: &mut HashMap<PathBuf, Pending>, event: RawFsEvent) {
    let (path, removed) = match event {
        RawFsEvent::Changed(p) => (p, false),
        RawFsEvent::Removed(p) => (p, true),
    };
    let now = Instant::now();
    match pending.get_mut(&path) {
        Some(p) => {
            p.removed = removed;
            if p.state == State::Expiring {
                p.state = State::Debounced;
                p.expiry = now + DEBOUNCE_WINDOW;
            }
        }
        None => {
            pending.insert(
                path,
                Pending {
                    expiry: now + DEBOUNCE_WINDOW,
                    state: State::Deduping,
                    removed,
                },
            );
        }
    }
}

fn flush_expired(pending: &mut HashMap<PathBuf, Pending>, out: &UnboundedSender<crate::Settled>) {
    let now = Instant::now();
    pending.retain(|path, p| {
        if p.expiry > now {
            return true;
        }
        match p.state {
            State::Expiring => return false,
            State::Deduping | State::Debounced => {
                let _ = out.send(crate::Settled {
                    path: path.clone(),
                    removed: p.removed,
                });
            }
        }
        p.state = State::Expiring;
        p.expiry = now + DEBOUNCE_WINDOW;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn single_event_settles_and_emits_once() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_shutdown, listener) = ShutdownListener::new_pair();
        let handle = tokio::spawn(run(raw_rx, out_tx, listener));
        raw_tx.send(RawFsEvent::Changed(PathBuf::from("/tmp/a"))).unwrap();
        let settled = tokio::time::timeout(Duration::from_millis(600), out_rx.recv())
            .await
            .expect("should settle within debounce window")
            .unwrap();
        assert_eq!(settled.path, PathBuf::from("/tmp/a"));
        assert!(!settled.removed);
        drop(raw_tx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn burst_within_window_emits_once() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_shutdown, listener) = ShutdownListener::new_pair();
        let handle = tokio::spawn(run(raw_rx, out_tx, listener));
        for _ in 0..5 {
            raw_tx.send(RawFsEvent::Changed(PathBuf::from("/tmp/b"))).unwrap();
        }
        let settled = tokio::time::timeout(Duration::from_millis(600), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.path, PathBuf::from("/tmp/b"));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), out_rx.recv())
                .await
                .is_err(),
            "burst must coalesce into a single emission"
        );
        drop(raw_tx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (_raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (shutdown, listener) = ShutdownListener::new_pair();
        let handle = tokio::spawn(run(raw_rx, out_tx, listener));
        shutdown.signal();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("shutdown should stop the loop promptly")
            .unwrap();
    }
}
