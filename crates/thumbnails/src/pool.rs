//! Bounded worker pool (§5, §4.7 concurrency model): one `spawn_blocking`
//! task per path gated by a semaphore, with generation-counter
//! cancel-and-resubmit so a fresh `create_thumbnails_async` call discards
//! results from any batch it superseded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use crate::cache::{ThumbnailCache, ThumbnailOutcome};

/// Hardware-concurrency-hinted worker count, capped so a handful of huge
/// directories can't spawn an unbounded number of blocking threads.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(8)
}

#[derive(Debug, Clone)]
pub struct ThumbnailCompleted {
    pub index: usize,
    pub icon_path: Option<PathBuf>,
}

pub struct ThumbnailPool {
    cache: Arc<ThumbnailCache>,
    semaphore: Arc<Semaphore>,
    generation: Arc<AtomicU64>,
    completions: UnboundedSender<ThumbnailCompleted>,
}

impl ThumbnailPool {
    pub fn new(cache: ThumbnailCache, workers: usize) -> (Self, UnboundedReceiver<ThumbnailCompleted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Self {
            cache: Arc::new(cache),
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            generation: Arc::new(AtomicU64::new(0)),
            completions: tx,
        };
        (pool, rx)
    }

    /// Bumps the generation and spawns one task per `(index, path)`. Tasks
    /// still in flight from a prior call see a stale generation when they
    /// finish and drop their result instead of sending it.
    pub fn create_thumbnails_async(&self, paths: Vec<(usize, PathBuf)>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        for (index, path) in paths {
            let cache = self.cache.clone();
            let semaphore = self.semaphore.clone();
            let my_generation = self.generation.clone();
            let tx = self.completions.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = tokio::task::spawn_blocking(move || cache.create_one(&path)).await;
                if my_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let icon_path = match outcome {
                    Ok(ThumbnailOutcome::Ready(p)) => Some(p),
                    Ok(ThumbnailOutcome::Failed { icon_path }) => Some(icon_path),
                    Err(_) => None,
                };
                let _ = tx.send(ThumbnailCompleted { index, icon_path });
            });
        }
    }

    /// Discards pending results without waiting for in-flight tasks; a
    /// subsequent `create_thumbnails_async` call already does this as a
    /// side effect, but callers that just want to clear (no resubmit) use
    /// this directly.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
