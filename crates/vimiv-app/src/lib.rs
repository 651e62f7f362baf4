//! `VimivApp`: the aggregate root that owns every registry and collaborator
//! handle (§2.1) and exposes the small set of entry points the event loop in
//! the binary crate drives — one key token, one command line, one
//! filesystem signal, one thumbnail completion at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use collab::{FileClassifier, IconProvider, ImageReader, VisibilityPredicate};
use commands::{AliasTable, Command, CommandHistory, CommandOutcome, CommandParser, CommandRegistry, Invocation, RepeatLastRegister, WildcardContext};
use config::SettingsRegistry;
use events::Signal;
use fs_monitor::{FsMonitorSource, WorkingDirectoryMonitor};
use keymap::{BindingTrie, KeyToken, Match};
use status::{StatusEvaluator, StatusModuleHost};
use thumbnails::{ThumbnailCompleted, ThumbnailPool};
use tokio::sync::mpsc::UnboundedReceiver;
use trash::TrashManager;
use vimiv_core::{ModeError, ModeId, ModeRegistry};

/// How long an accumulated count or partial-binding buffer survives without
/// a new token before it's dropped (§4.3's `keyhint.timeout`, default 5s).
pub const BUFFER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Trash(#[from] anyhow::Error),
}

/// Everything the event loop needs to drive one instance, returned alongside
/// the constructed app so the binary crate can register/spawn them.
pub struct AppHandles {
    pub fs_source: FsMonitorSource,
    pub thumbnail_completions: UnboundedReceiver<ThumbnailCompleted>,
}

pub struct VimivApp {
    modes: ModeRegistry,
    bindings: HashMap<String, BindingTrie<String>>,
    commands: CommandRegistry,
    aliases: AliasTable,
    history: HashMap<String, CommandHistory>,
    repeat: RepeatLastRegister,
    settings: SettingsRegistry,
    status: StatusModuleHost,
    monitor: WorkingDirectoryMonitor,
    thumbnails: ThumbnailPool,
    trash: TrashManager,
    classifier: Arc<dyn FileClassifier>,
    visibility: Box<dyn VisibilityPredicate>,
    icon_provider: Box<dyn IconProvider>,
    count_buffer: String,
    partial_buffer: Vec<KeyToken>,
    count_deadline: Option<std::time::Instant>,
    partial_deadline: Option<std::time::Instant>,
}

impl VimivApp {
    /// Builds one app: spawns the filesystem watcher, opens the thumbnail
    /// cache and trash manager under `cache_dir`/`data_dir`, and returns the
    /// handles the binary crate must spawn/drain.
    pub fn new(
        cache_dir: &Path,
        data_dir: &Path,
        show_hidden: bool,
        classifier: Arc<dyn FileClassifier>,
        image_reader: Arc<dyn ImageReader>,
        icon_provider: Box<dyn IconProvider>,
        visibility: Box<dyn VisibilityPredicate>,
    ) -> Result<(Self, AppHandles), AppError> {
        let (monitor, fs_source) = WorkingDirectoryMonitor::spawn(show_hidden, classifier.clone())?;
        let cache = thumbnails::ThumbnailCache::new(
            cache_dir,
            thumbnails::Size::Normal,
            image_reader,
            icon_provider.fail_icon(),
        )?;
        let (thumbnails, thumbnail_completions) =
            ThumbnailPool::new(cache, thumbnails::default_worker_count());
        let trash = TrashManager::new(data_dir)?;

        let app = Self {
            modes: ModeRegistry::new("image"),
            bindings: HashMap::new(),
            commands: CommandRegistry::new(),
            aliases: AliasTable::new(),
            history: HashMap::new(),
            repeat: RepeatLastRegister::default(),
            settings: SettingsRegistry::new(),
            status: StatusModuleHost::new(StatusEvaluator::new()),
            monitor,
            thumbnails,
            trash,
            classifier,
            visibility,
            icon_provider,
            count_buffer: String::new(),
            partial_buffer: Vec::new(),
            count_deadline: None,
            partial_deadline: None,
        };
        Ok((app, AppHandles { fs_source, thumbnail_completions }))
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.modes
    }

    pub fn modes_mut(&mut self) -> &mut ModeRegistry {
        &mut self.modes
    }

    pub fn settings(&mut self) -> &mut SettingsRegistry {
        &mut self.settings
    }

    pub fn commands(&mut self) -> &mut CommandRegistry {
        &mut self.commands
    }

    pub fn aliases(&mut self) -> &mut AliasTable {
        &mut self.aliases
    }

    pub fn status(&mut self) -> &mut StatusModuleHost {
        &mut self.status
    }

    pub fn trash(&self) -> &TrashManager {
        &self.trash
    }

    pub fn thumbnails(&self) -> &ThumbnailPool {
        &self.thumbnails
    }

    /// Registers a key sequence for `mode` to the given ex command line
    /// (§4.2/§6.1 `keys.conf`). Mirrors `config::KeybindingEntry`'s shape
    /// one layer up, where `vimiv_core` doesn't know about the trie yet.
    pub fn bind(&mut self, mode: impl Into<String>, seq: &[KeyToken], line: impl Into<String>) -> Result<(), keymap::InsertError> {
        self.bindings.entry(mode.into()).or_default().insert(seq, line.into())
    }

    pub fn unbind(&mut self, mode: &str, seq: &[KeyToken]) -> Option<String> {
        self.bindings.get_mut(mode).and_then(|trie| trie.delete(seq))
    }

    /// Feeds one key token through the dispatcher (§4.2/§4.3): accumulate a
    /// leading count, accumulate a binding partial, and act on the trie
    /// match. Returns the signals produced, if any.
    pub fn handle_key_token(&mut self, token: KeyToken, wildcards: &WildcardContext<'_>) -> Vec<Signal> {
        let mode_name = self.modes.name(self.modes.active()).to_string();
        let accepts_count = mode_name != "command";

        if self.partial_buffer.is_empty() && accepts_count {
            if let KeyToken::Char(c) = token {
                if c.is_ascii_digit() && !(c == '0' && self.count_buffer.is_empty()) {
                    self.count_buffer.push(c);
                    self.count_deadline = Some(std::time::Instant::now() + BUFFER_TIMEOUT);
                    return Vec::new();
                }
            }
        }

        self.partial_buffer.push(token);

        enum Outcome {
            Full(String),
            Partial { prefix: String, candidate_count: usize },
            NoMatch,
            NoBindings,
        }

        let outcome = match self.bindings.get(&mode_name) {
            None => Outcome::NoBindings,
            Some(trie) => match trie.match_tokens(&self.partial_buffer) {
                Match::Full(line) => Outcome::Full(line.clone()),
                Match::Partial => Outcome::Partial {
                    prefix: self.partial_buffer.iter().map(|t| t.to_string()).collect(),
                    candidate_count: trie.leaves(&self.partial_buffer).len(),
                },
                Match::NoMatch => Outcome::NoMatch,
            },
        };

        match outcome {
            Outcome::NoBindings => {
                self.clear_buffers();
                Vec::new()
            }
            Outcome::Full(line) => {
                let count = self.take_count();
                self.partial_buffer.clear();
                self.partial_deadline = None;
                self.dispatch_line(&mode_name, &line, count, wildcards)
            }
            Outcome::Partial { prefix, candidate_count } => {
                self.partial_deadline = Some(std::time::Instant::now() + BUFFER_TIMEOUT);
                vec![Signal::PartialMatches { prefix, candidate_count }]
            }
            Outcome::NoMatch => {
                let had_partial = self.partial_buffer.len() > 1;
                self.clear_buffers();
                if had_partial { vec![Signal::PartialCleared] } else { Vec::new() }
            }
        }
    }

    /// Runs the full `:cmdline` pipeline (§4.4) against a raw command-line
    /// buffer (already stripped of its `:`/search prefix by the GUI
    /// collaborator). Step 1: a leading `!` marks the remainder as an
    /// external shell command, which this crate never executes — it's
    /// passed through as a `Signal::ShellCommand` for the GUI collaborator
    /// to run. Otherwise steps 2-7 run the same coercion/alias/wildcard
    /// pipeline a fully matched binding uses.
    pub fn dispatch_line(&mut self, mode: &str, raw: &str, dispatcher_count: Option<u32>, wildcards: &WildcardContext<'_>) -> Vec<Signal> {
        let trimmed = raw.trim_start();
        if let Some(shell_cmd) = trimmed.strip_prefix('!') {
            return vec![Signal::ShellCommand(shell_cmd.to_string())];
        }
        let outcome = {
            let parser = CommandParser::new(&self.commands, &self.aliases);
            parser.parse(mode, raw, dispatcher_count, wildcards)
        };
        let outcome = match outcome {
            Ok(inv) => self.record_invocation(mode, inv),
            Err(commands::ParseError::Argument(msg)) => CommandOutcome::Err(msg),
            Err(commands::ParseError::Registry(e)) => CommandOutcome::Err(e.to_string()),
            Err(commands::ParseError::Empty) => return Vec::new(),
            Err(commands::ParseError::UnclosedQuote) => {
                CommandOutcome::Err("unclosed quote".to_string())
            }
        };
        let status_signal = match outcome.to_signal() {
            Signal::StatusClear { reason } => self.status.clear(reason),
            Signal::StatusUpdate { reason } => self.status.update(reason).1,
            _ => unreachable!("CommandOutcome::to_signal only yields status signals"),
        };
        vec![status_signal]
    }

    /// A successfully parsed invocation is recorded into that mode's history
    /// and, if the command is `store`-eligible, into the repeat-last
    /// register (§4.4.1). The command body itself (actually opening an
    /// image, deleting a file, ...) is executed by the GUI collaborator that
    /// owns the real handler table; this crate only validates and records.
    fn record_invocation(&mut self, mode: &str, inv: Invocation) -> CommandOutcome {
        let line = inv.command.clone();
        let store_eligible = self
            .commands
            .lookup(mode, &inv.command)
            .map(|c| c.store)
            .unwrap_or(false);
        if store_eligible {
            self.repeat.set(inv);
        }
        self.history.entry(mode.to_string()).or_default().push(line);
        CommandOutcome::Ok(None)
    }

    fn take_count(&mut self) -> Option<u32> {
        if self.count_buffer.is_empty() {
            return None;
        }
        let n = self.count_buffer.parse().ok();
        self.count_buffer.clear();
        self.count_deadline = None;
        n
    }

    fn clear_buffers(&mut self) {
        self.partial_buffer.clear();
        self.count_buffer.clear();
        self.partial_deadline = None;
        self.count_deadline = None;
    }

    /// Drives the two buffer timeouts (§4.3); call on every `Event::Tick`.
    pub fn on_tick(&mut self) -> Vec<Signal> {
        let now = std::time::Instant::now();
        let mut out = Vec::new();
        if self.count_deadline.is_some_and(|d| now >= d) {
            self.count_buffer.clear();
            self.count_deadline = None;
        }
        if self.partial_deadline.is_some_and(|d| now >= d) {
            self.partial_buffer.clear();
            self.partial_deadline = None;
            out.push(Signal::PartialCleared);
        }
        out
    }

    /// Moves into `path` (§4.6). `command()` callers that want the default
    /// "reuse current" behaviour pass `reload_current = false`.
    pub fn chdir(&mut self, path: &Path, reload_current: bool) -> std::io::Result<Signal> {
        self.monitor.chdir(path, reload_current, self.classifier.as_ref())
    }

    pub fn current_dir(&self) -> &Path {
        self.monitor.current_dir()
    }

    pub fn images(&self) -> &[PathBuf] {
        self.monitor.images()
    }

    pub fn directories(&self) -> &[PathBuf] {
        self.monitor.directories()
    }

    /// Applies a new `monitor.show_hidden` setting and re-lists the current
    /// directory under it.
    pub fn set_show_hidden(&mut self, show_hidden: bool) -> std::io::Result<Signal> {
        self.monitor.set_show_hidden(show_hidden);
        self.monitor.directory_changed(self.classifier.as_ref())
    }

    pub fn on_fs_change(&mut self, change: events::FsChange) -> std::io::Result<Signal> {
        match change {
            events::FsChange::DirectoryChanged(_) => {
                self.monitor.directory_changed(self.classifier.as_ref())
            }
            events::FsChange::FileChanged(path) => Ok(self.monitor.file_changed(&path)),
        }
    }

    pub fn create_thumbnails_async(&self, paths: Vec<(usize, PathBuf)>) {
        self.thumbnails.create_thumbnails_async(paths);
    }

    pub fn on_thumbnail_completed(&self, completed: ThumbnailCompleted) -> Signal {
        Signal::ThumbnailCreated { index: completed.index, icon_path: completed.icon_path }
    }

    /// Moves `path` to the trash (§4.8), reporting the widget-visibility
    /// predicate's current read so a caller can decide whether to toggle a
    /// confirmation mode rather than acting immediately.
    pub fn delete(&self, path: &Path) -> anyhow::Result<PathBuf> {
        self.trash.delete(path)
    }

    pub fn undelete(&self, basename: &str) -> anyhow::Result<PathBuf> {
        self.trash.undelete(basename)
    }

    pub fn toggle_mode(&mut self, id: ModeId) -> Result<Vec<vimiv_core::ModeSignal>, ModeError> {
        let visible = self.visibility.is_visible(id);
        self.modes.toggle(id, visible)
    }

    pub fn icon_provider(&self) -> &dyn IconProvider {
        self.icon_provider.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab::{AlwaysHiddenVisibility, DefaultFileClassifier, RgbaImage, StaticIconProvider};
    use keymap::tokenize;

    struct OnePixelReader;
    impl ImageReader for OnePixelReader {
        fn dimensions(&self, _path: &Path) -> anyhow::Result<(u32, u32)> {
            Ok((1, 1))
        }
        fn decode_scaled(&self, _path: &Path, _max_side: u32) -> anyhow::Result<RgbaImage> {
            Ok(RgbaImage { width: 1, height: 1, pixels: vec![0, 0, 0, 0] })
        }
    }

    fn test_app() -> (VimivApp, AppHandles, tempfile::TempDir, tempfile::TempDir) {
        let cache_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let (mut app, handles) = VimivApp::new(
            cache_dir.path(),
            data_dir.path(),
            false,
            Arc::new(DefaultFileClassifier),
            Arc::new(OnePixelReader),
            Box::new(StaticIconProvider(PathBuf::from("/usr/share/icons/fail.png"))),
            Box::new(AlwaysHiddenVisibility),
        )
        .unwrap();
        app.commands()
            .register(Command {
                name: "quit".to_string(),
                mode: commands::GLOBAL.to_string(),
                hidden: false,
                store: false,
                edit: false,
                short_description: String::new(),
                long_description: String::new(),
                params: vec![Parameter::count()],
            })
            .unwrap();
        (app, handles, cache_dir, data_dir)
    }

    use commands::Parameter;

    #[test]
    fn digit_tokens_accumulate_into_count_not_partial() {
        let (mut app, ..) = test_app();
        let sigs = app.handle_key_token(KeyToken::Char('3'), &WildcardContext { current_path: None, path_list: &[], marked_paths: &[] });
        assert!(sigs.is_empty());
        assert_eq!(app.count_buffer, "3");
        assert!(app.partial_buffer.is_empty());
    }

    #[test]
    fn full_match_dispatches_and_clears_buffers() {
        let (mut app, ..) = test_app();
        app.bind("image", &tokenize("q").unwrap(), "quit").unwrap();
        let wc = WildcardContext { current_path: None, path_list: &[], marked_paths: &[] };
        let sigs = app.handle_key_token(KeyToken::Char('q'), &wc);
        assert!(matches!(sigs.as_slice(), [Signal::StatusClear { .. }]));
        assert!(app.partial_buffer.is_empty());
    }

    #[test]
    fn partial_match_reports_candidate_count() {
        let (mut app, ..) = test_app();
        app.bind("image", &tokenize("dd").unwrap(), "delete").unwrap();
        let wc = WildcardContext { current_path: None, path_list: &[], marked_paths: &[] };
        let sigs = app.handle_key_token(KeyToken::Char('d'), &wc);
        assert!(matches!(sigs.as_slice(), [Signal::PartialMatches { candidate_count: 1, .. }]));
    }

    #[test]
    fn no_match_clears_buffers_silently_on_first_token() {
        let (mut app, ..) = test_app();
        let wc = WildcardContext { current_path: None, path_list: &[], marked_paths: &[] };
        let sigs = app.handle_key_token(KeyToken::Char('z'), &wc);
        assert!(sigs.is_empty());
        assert!(app.partial_buffer.is_empty());
    }

    #[test]
    fn tick_expires_stale_partial_buffer() {
        let (mut app, ..) = test_app();
        app.bind("image", &tokenize("dd").unwrap(), "delete").unwrap();
        let wc = WildcardContext { current_path: None, path_list: &[], marked_paths: &[] };
        app.handle_key_token(KeyToken::Char('d'), &wc);
        app.partial_deadline = Some(std::time::Instant::now() - std::time::Duration::from_secs(1));
        let sigs = app.on_tick();
        assert!(matches!(sigs.as_slice(), [Signal::PartialCleared]));
        assert!(app.partial_buffer.is_empty());
    }

    #[test]
    fn bang_prefixed_line_passes_through_without_parsing() {
        let (mut app, ..) = test_app();
        let wc = WildcardContext { current_path: None, path_list: &[], marked_paths: &[] };
        let sigs = app.dispatch_line("image", "!ls -la", None, &wc);
        assert!(matches!(sigs.as_slice(), [Signal::ShellCommand(cmd)] if cmd == "ls -la"));
    }

    #[test]
    fn chdir_and_delete_round_trip_through_the_facade() {
        let (mut app, _h, _cache_dir, _data_dir) = test_app();
        let source_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("a.png"), b"x").unwrap();
        app.chdir(source_dir.path(), false).unwrap();
        assert_eq!(app.images().len(), 1);

        let trashed = app.delete(&app.images()[0].clone()).unwrap();
        assert!(trashed.exists());
    }
}
