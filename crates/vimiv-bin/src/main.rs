//! Vimiv entrypoint: CLI parsing, logging/panic-hook setup, collaborator
//! wiring, and the single-threaded event loop driving `VimivApp`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use collab::{AlwaysHiddenVisibility, DefaultFileClassifier, DefaultImageReader, StaticIconProvider};
use commands::{Command, GLOBAL, Parameter, ParamType, WildcardContext};
use config::{BoolSetting, ConfigError, IntSetting, KeyAction, ThumbnailSize, ThumbnailSizeSetting};
use events::{Event, EventSourceRegistry, TickEventSource, EVENT_CHANNEL_CAP};
use keymap::tokenize;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use vimiv_app::VimivApp;

/// CLI surface: `vimiv [OPTIONS] [PATH...]`.
#[derive(Parser, Debug)]
#[command(name = "vimiv", about = "Keyboard-driven image viewer")]
struct Args {
    /// Images or directories to open at startup (globbed by the shell).
    paths: Vec<PathBuf>,

    #[arg(short = 'f', long)]
    fullscreen: bool,

    #[arg(short = 'v', long)]
    version: bool,

    /// WIDTHxHEIGHT, e.g. "800x600".
    #[arg(short = 'g', long)]
    geometry: Option<String>,

    #[arg(long = "temp-basedir")]
    temp_basedir: bool,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    keyfile: Option<PathBuf>,

    /// Repeatable `-s OPTION VALUE`.
    #[arg(short = 's', long = "set", num_args = 2, value_names = ["OPTION", "VALUE"])]
    set: Vec<String>,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Repeatable; each line is run once after startup wiring completes.
    #[arg(long = "command")]
    command: Vec<String>,

    #[arg(long = "debug", num_args = 1..)]
    debug: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Geometry {
    width: u32,
    height: u32,
}

fn parse_geometry(raw: &str) -> Result<Geometry, String> {
    let (w, h) = raw
        .split_once('x')
        .ok_or_else(|| format!("invalid --geometry '{raw}', expected WIDTHxHEIGHT"))?;
    let width: u32 = w.parse().map_err(|_| format!("invalid --geometry width '{w}'"))?;
    let height: u32 = h.parse().map_err(|_| format!("invalid --geometry height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("invalid --geometry '{raw}', dimensions must be positive"));
    }
    Ok(Geometry { width, height })
}

fn normalize_log_level(raw: &str) -> &'static str {
    match raw.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warning" => "warn",
        "error" => "error",
        "critical" => "error",
        _ => "info",
    }
}

/// Directories the binary writes to; `--temp-basedir` redirects all three
/// under one process-scoped scratch directory instead of the real XDG
/// locations, removed on drop.
struct RuntimeDirs {
    config_dir: PathBuf,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    _temp_guard: Option<TempBaseDir>,
}

struct TempBaseDir(PathBuf);

impl Drop for TempBaseDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn resolve_dirs(temp_basedir: bool) -> Result<RuntimeDirs> {
    if temp_basedir {
        let base = std::env::temp_dir().join(format!("vimiv-{}", std::process::id()));
        std::fs::create_dir_all(&base).context("creating --temp-basedir directory")?;
        Ok(RuntimeDirs {
            config_dir: base.join("config"),
            data_dir: base.join("data"),
            cache_dir: base.join("cache"),
            _temp_guard: Some(TempBaseDir(base)),
        })
    } else {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("vimiv");
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("vimiv");
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("thumbnails");
        Ok(RuntimeDirs { config_dir, data_dir, cache_dir, _temp_guard: None })
    }
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self, level: &str, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir).context("creating log directory")?;
        let file_appender = tracing_appender::rolling::never(data_dir, "vimiv.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        let filter = tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(()) => self.log_guard = Some(guard),
            Err(_) => {
                // A subscriber is already installed (e.g. running under a test
                // harness); drop the guard so the non-blocking writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Registers the default settings every build ships, regardless of what
/// `vimiv.conf`/`-s` later override.
fn register_default_settings(app: &mut VimivApp) {
    let settings = app.settings();
    settings.register(Box::new(BoolSetting::new("monitor.show_hidden", false)));
    settings.register(Box::new(IntSetting::new("keyhint.timeout", 5000)));
    settings.register(Box::new(ThumbnailSizeSetting::new("thumbnail.size", ThumbnailSize::Normal)));
}

/// Registers the small fixed global command table the binary exercises.
/// Command *bodies* (opening images, resizing, etc.) belong to a GUI
/// collaborator not built here; the registry only carries the metadata the
/// parser needs (§4.4).
fn register_default_commands(app: &mut VimivApp) -> Result<(), commands::RegistryError> {
    let registry = app.commands();
    registry.register(Command {
        name: "quit".to_string(),
        mode: GLOBAL.to_string(),
        hidden: false,
        store: false,
        edit: false,
        short_description: "Quit vimiv".to_string(),
        long_description: String::new(),
        params: vec![],
    })?;
    registry.register(Command {
        name: "set".to_string(),
        mode: GLOBAL.to_string(),
        hidden: false,
        store: false,
        edit: false,
        short_description: "Set an option".to_string(),
        long_description: String::new(),
        params: vec![
            Parameter::positional("option", ParamType::String),
            Parameter::positional("value", ParamType::String),
        ],
    })?;
    registry.register(Command {
        name: "escape".to_string(),
        mode: GLOBAL.to_string(),
        hidden: false,
        store: false,
        edit: false,
        short_description: "Leave the current mode".to_string(),
        long_description: String::new(),
        params: vec![],
    })?;
    registry.register(Command {
        name: "delete".to_string(),
        mode: "image".to_string(),
        hidden: false,
        store: true,
        edit: false,
        short_description: "Move the current path to the trash".to_string(),
        long_description: String::new(),
        params: vec![Parameter::count()],
    })?;
    Ok(())
}

/// Default keybindings shipped in code, applied before any `keys.conf`
/// override (§6 file formats: `key = unbind` in the user file removes one
/// of these).
fn register_default_bindings(app: &mut VimivApp) -> Result<(), anyhow::Error> {
    let defaults: &[(&str, &str, &str)] = &[
        ("image", "q", "quit"),
        ("image", "<Escape>", "escape"),
        ("image", "dd", "delete"),
    ];
    for &(mode, raw_keys, line) in defaults {
        let tokens = tokenize(raw_keys).map_err(|e| anyhow::anyhow!("default binding '{raw_keys}': {e}"))?;
        if let Err(e) = app.bind(mode, &tokens, line) {
            warn!(target: "runtime.keys", mode, raw_keys, error = %e, "default binding shadowed, skipped");
        }
    }
    Ok(())
}

/// Applies a parsed `keys.conf` on top of the defaults. Unknown modes are
/// accepted (future modes may be introduced by plugins this crate never
/// loads); shadowed bindings are logged and skipped rather than aborting.
fn apply_keyfile(app: &mut VimivApp, entries: Vec<config::KeybindingEntry>) {
    for entry in entries {
        let mode = entry.mode.to_ascii_lowercase();
        let tokens = match tokenize(&entry.key) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "runtime.keys", key = entry.key.as_str(), error = %e, "unparsable key sequence in keyfile");
                continue;
            }
        };
        match entry.action {
            KeyAction::Unbind => {
                app.unbind(&mode, &tokens);
            }
            KeyAction::Bind(line) => {
                if let Err(e) = app.bind(mode.clone(), &tokens, line) {
                    warn!(target: "runtime.keys", mode = mode.as_str(), key = entry.key.as_str(), error = %e, "keyfile binding shadowed, skipped");
                }
            }
        }
    }
}

fn apply_config_file(app: &mut VimivApp, path: &Path) -> Result<(), ConfigError> {
    match config::load_settings_file(path, app.settings()) {
        Ok(errors) => {
            for e in errors {
                error!(target: "config", error = %e, "config_setting_error");
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn apply_set_overrides(app: &mut VimivApp, pairs: &[String]) {
    for chunk in pairs.chunks(2) {
        let [name, value] = chunk else { continue };
        if let Err(e) = app.settings().set(name, value) {
            error!(target: "config", setting = name.as_str(), error = %e, "command_line_set_failed");
        }
    }
}

fn wildcard_context(path_list: &[String]) -> WildcardContext<'_> {
    WildcardContext {
        current_path: path_list.first().map(|s| s.as_str()),
        path_list,
        marked_paths: &[],
    }
}

fn emit_signal(sig: &events::Signal) {
    match sig {
        events::Signal::Loaded { images, directories } => {
            info!(target: "runtime.signal", images, directories, "loaded")
        }
        events::Signal::Changed { images, directories } => {
            info!(target: "runtime.signal", images, directories, "changed")
        }
        events::Signal::ImagesChanged { images, added, removed } => {
            info!(target: "runtime.signal", images, added, removed, "images_changed")
        }
        events::Signal::ImageChanged => info!(target: "runtime.signal", "image_changed"),
        events::Signal::PartialMatches { prefix, candidate_count } => {
            info!(target: "runtime.signal", prefix = prefix.as_str(), candidate_count, "partial_matches")
        }
        events::Signal::PartialCleared => info!(target: "runtime.signal", "partial_cleared"),
        events::Signal::StatusUpdate { reason } => info!(target: "runtime.signal", reason, "status_update"),
        events::Signal::StatusClear { reason } => info!(target: "runtime.signal", reason, "status_clear"),
        events::Signal::ModeEntered(name) => info!(target: "runtime.signal", mode = name.as_str(), "mode_entered"),
        events::Signal::ModeLeft(name) => info!(target: "runtime.signal", mode = name.as_str(), "mode_left"),
        events::Signal::ModeFirstEntered(name) => {
            info!(target: "runtime.signal", mode = name.as_str(), "mode_first_entered")
        }
        events::Signal::ThumbnailCreated { index, icon_path } => info!(
            target: "runtime.signal",
            index,
            icon_path = icon_path.as_ref().map(|p| p.display().to_string()),
            "thumbnail_created"
        ),
        events::Signal::ShellCommand(cmd) => {
            warn!(target: "runtime.signal", cmd = cmd.as_str(), "shell_command_not_executed")
        }
    }
}

/// Startup directory for the working-directory monitor: the first
/// positional path if it's a directory, its parent if it's a file, else the
/// process's current directory.
fn initial_directory(paths: &[PathBuf]) -> PathBuf {
    match paths.first() {
        Some(p) if p.is_dir() => p.clone(),
        Some(p) => p.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

async fn finalize_shutdown(handles: Vec<tokio::task::JoinHandle<()>>) {
    let timeout = Duration::from_secs(2);
    for h in handles {
        if tokio::time::timeout(timeout, h).await.is_err() {
            warn!(target: "runtime", "event source did not shut down within the grace period");
        }
    }
}

async fn run(args: Args, dirs: RuntimeDirs) -> Result<()> {
    if args.fullscreen {
        info!(target: "runtime", "fullscreen requested (no GUI backend in this build)");
    }
    if !args.debug.is_empty() {
        info!(target: "runtime", modules = ?args.debug, "debug_modules_requested");
    }

    let classifier: Arc<dyn collab::FileClassifier> = Arc::new(DefaultFileClassifier);
    let image_reader: Arc<dyn collab::ImageReader> = Arc::new(DefaultImageReader);
    let icon_provider = Box::new(StaticIconProvider(PathBuf::from(
        "/usr/share/icons/hicolor/128x128/status/image-missing.png",
    )));
    let visibility = Box::new(AlwaysHiddenVisibility);

    let (mut app, handles) = VimivApp::new(
        &dirs.cache_dir,
        &dirs.data_dir,
        false,
        classifier,
        image_reader,
        icon_provider,
        visibility,
    )
    .context("initializing application state")?;

    register_default_settings(&mut app);
    register_default_commands(&mut app).context("registering default commands")?;
    register_default_bindings(&mut app)?;

    let config_path = args.config.clone().unwrap_or_else(|| {
        if args.temp_basedir {
            dirs.config_dir.join("vimiv.conf")
        } else {
            config::discover_config_path()
        }
    });
    if let Err(e) = apply_config_file(&mut app, &config_path) {
        error!(target: "config", file = %config_path.display(), error = %e, "fatal_config_parse_error");
        std::process::exit(3);
    }

    let keyfile_path = args.keyfile.clone().unwrap_or_else(|| {
        if args.temp_basedir {
            dirs.config_dir.join("keys.conf")
        } else {
            config::discover_keyfile_path()
        }
    });
    match config::parse_keybindings_file(&keyfile_path) {
        Ok(entries) => apply_keyfile(&mut app, entries),
        Err(e) => {
            error!(target: "config", file = %keyfile_path.display(), error = %e, "fatal_config_parse_error");
            std::process::exit(3);
        }
    }

    apply_set_overrides(&mut app, &args.set);

    let start_dir = initial_directory(&args.paths);
    match app.chdir(&start_dir, true) {
        Ok(sig) => emit_signal(&sig),
        Err(e) => warn!(target: "fs_monitor", dir = %start_dir.display(), error = %e, "initial_chdir_failed"),
    }

    let show_hidden = app.settings().get("monitor.show_hidden").is_some_and(|s| s.value() == "true");
    if show_hidden {
        if let Ok(sig) = app.set_show_hidden(true) {
            emit_signal(&sig);
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let mut registry = EventSourceRegistry::new();
    registry.register(handles.fs_source);
    registry.register(TickEventSource::new(Duration::from_millis(200)));
    let source_handles = registry.spawn_all(&tx);
    drop(tx);

    for line in &args.command {
        let path_list: Vec<String> = app.images().iter().map(|p| p.to_string_lossy().to_string()).collect();
        let wildcards = wildcard_context(&path_list);
        let mode = app.modes().name(app.modes().active()).to_string();
        for sig in app.dispatch_line(&mode, line, None, &wildcards) {
            emit_signal(&sig);
        }
    }

    let mut thumbnail_rx = handles.thumbnail_completions;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: "runtime", "shutdown_requested");
                break;
            }
            completed = thumbnail_rx.recv() => {
                match completed {
                    Some(c) => emit_signal(&app.on_thumbnail_completed(c)),
                    None => {}
                }
            }
            event = rx.recv() => {
                match event {
                    Some(Event::Fs(change)) => match app.on_fs_change(change) {
                        Ok(sig) => emit_signal(&sig),
                        Err(e) => warn!(target: "fs_monitor", error = %e, "fs_change_failed"),
                    },
                    Some(Event::ThumbnailDone { index, outcome }) => {
                        tracing::debug!(target: "runtime", index, ?outcome, "thumbnail_done_on_event_channel");
                    }
                    Some(Event::Tick) => {
                        for sig in app.on_tick() {
                            emit_signal(&sig);
                        }
                    }
                    Some(Event::Shutdown) | None => break,
                }
            }
        }
    }

    finalize_shutdown(source_handles).await;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("vimiv {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if let Some(raw) = &args.geometry {
        if let Err(e) = parse_geometry(raw) {
            eprintln!("vimiv: {e}");
            std::process::exit(2);
        }
    }

    let dirs = resolve_dirs(args.temp_basedir)?;
    let mut startup = AppStartup::new();
    startup.configure_logging(normalize_log_level(&args.log_level), &dirs.data_dir)?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = runtime.block_on(run(args, dirs));
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(target: "runtime", error = %e, "uncaught_error");
            drop(startup);
            std::process::exit(1);
        }
    }
}
