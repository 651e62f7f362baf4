//! Working-directory monitor (§4.6): tracks the current directory's
//! classified listing, debounces `notify` events through a background
//! task, and exposes that task as an `AsyncEventSource` the main loop can
//! register like any other event producer.

mod async_service;
mod debounce;

pub use async_service::{RawFsEvent, WatchShutdown, Watcher};
pub use debounce::Settled;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use collab::{EntryKind, FileClassifier};
use events::{AsyncEventSource, Event, FsChange, Signal};
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tracing::warn;

/// Bridges the `notify` watcher thread through the debounce task and
/// forwards settled changes into the main event channel as `Event::Fs`.
pub struct FsMonitorSource {
    raw_rx: mpsc::UnboundedReceiver<RawFsEvent>,
    classifier: Arc<dyn FileClassifier>,
}

impl FsMonitorSource {
    fn new(raw_rx: mpsc::UnboundedReceiver<RawFsEvent>, classifier: Arc<dyn FileClassifier>) -> Self {
        Self { raw_rx, classifier }
    }
}

impl AsyncEventSource for FsMonitorSource {
    fn name(&self) -> &'static str {
        "fs-monitor"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let Self { raw_rx, classifier } = *self;
        tokio::spawn(async move {
            let (settled_tx, mut settled_rx) = mpsc::unbounded_channel();
            let (debounce_handle, _shutdown) = async_service::spawn_debounce_task(raw_rx, settled_tx);
            while let Some(settled) = settled_rx.recv().await {
                let change = if matches!(classifier.classify(&settled.path), EntryKind::Directory) {
                    FsChange::DirectoryChanged(settled.path)
                } else {
                    FsChange::FileChanged(settled.path)
                };
                if tx.send(Event::Fs(change)).await.is_err() {
                    break;
                }
            }
            let _ = debounce_handle.await;
        })
    }
}

/// Owns the classified listing of the current directory and the `notify`
/// watch on it. `chdir` is the only place the process-wide working
/// directory changes.
pub struct WorkingDirectoryMonitor {
    current_dir: PathBuf,
    images: Vec<PathBuf>,
    directories: Vec<PathBuf>,
    show_hidden: bool,
    watched: Option<PathBuf>,
    watcher: Watcher,
}

impl WorkingDirectoryMonitor {
    /// Spawns the `notify` watcher and returns the monitor alongside the
    /// `AsyncEventSource` the caller registers with the main loop.
    pub fn spawn(
        show_hidden: bool,
        classifier: Arc<dyn FileClassifier>,
    ) -> notify::Result<(Self, FsMonitorSource)> {
        let (watcher, raw_rx) = Watcher::spawn()?;
        let monitor = Self {
            current_dir: PathBuf::new(),
            images: Vec::new(),
            directories: Vec::new(),
            show_hidden,
            watched: None,
            watcher,
        };
        Ok((monitor, FsMonitorSource::new(raw_rx, classifier)))
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn set_show_hidden(&mut self, show_hidden: bool) {
        self.show_hidden = show_hidden;
    }

    /// Moves into `path`, relisting and re-watching it. A no-op when
    /// `path` canonicalizes to the current directory and `reload_current`
    /// is false. Listing failures (permission denied, directory removed
    /// underneath us) are logged and leave the listing empty rather than
    /// failing the chdir.
    pub fn chdir(
        &mut self,
        path: &Path,
        reload_current: bool,
        classifier: &dyn FileClassifier,
    ) -> io::Result<Signal> {
        let canonical = path.canonicalize()?;
        if !reload_current && canonical == self.current_dir {
            return Ok(Signal::Loaded {
                images: self.images.len(),
                directories: self.directories.len(),
            });
        }
        if let Some(old) = self.watched.take() {
            if let Err(e) = self.watcher.unwatch(&old) {
                warn!(error = %e, path = %old.display(), "failed to unwatch previous directory");
            }
        }
        std::env::set_current_dir(&canonical)?;
        if let Err(e) = self.list_directory(&canonical, classifier) {
            warn!(error = %e, path = %canonical.display(), "failed to list directory");
            self.images.clear();
            self.directories.clear();
        }
        match self.watcher.watch(&canonical) {
            Ok(()) => self.watched = Some(canonical.clone()),
            Err(e) => warn!(error = %e, path = %canonical.display(), "failed to watch directory"),
        }
        self.current_dir = canonical;
        Ok(Signal::Loaded {
            images: self.images.len(),
            directories: self.directories.len(),
        })
    }

    fn list_directory(&mut self, dir: &Path, classifier: &dyn FileClassifier) -> io::Result<()> {
        let mut images = Vec::new();
        let mut directories = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !self.show_hidden && entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            match classifier.classify(&path) {
                EntryKind::Image => images.push(path),
                EntryKind::Directory => directories.push(path),
                EntryKind::Other => {}
            }
        }
        images.sort();
        directories.sort();
        self.images = images;
        self.directories = directories;
        Ok(())
    }

    /// Relists the current directory after a debounced `directory_changed`
    /// event and reports whether the image set actually changed.
    pub fn directory_changed(&mut self, classifier: &dyn FileClassifier) -> io::Result<Signal> {
        let before: HashSet<PathBuf> = self.images.iter().cloned().collect();
        let dir = self.current_dir.clone();
        self.list_directory(&dir, classifier)?;
        let after: HashSet<PathBuf> = self.images.iter().cloned().collect();
        let added = after.difference(&before).count();
        let removed = before.difference(&after).count();
        if added == 0 && removed == 0 {
            return Ok(Signal::Changed {
                images: self.images.len(),
                directories: self.directories.len(),
            });
        }
        Ok(Signal::ImagesChanged {
            images: self.images.len(),
            added,
            removed,
        })
    }

    /// A debounced `file_changed` event always refers to the active image;
    /// the monitor doesn't re-decode it, it just signals a reload is due.
    pub fn file_changed(&self, _path: &Path) -> Signal {
        Signal::ImageChanged
    }
}
