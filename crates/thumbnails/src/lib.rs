//! Freedesktop thumbnail cache (§4.7): MD5-named PNG cache with mtime-keyed
//! reuse, a fail-marker directory for unreadable sources, and a bounded
//! worker pool that generates thumbnails off the main thread.

mod cache;
mod pool;

pub use cache::{Size, ThumbnailCache, ThumbnailOutcome};
pub use pool::{ThumbnailCompleted, ThumbnailPool, default_worker_count};
