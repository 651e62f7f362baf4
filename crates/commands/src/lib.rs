//! Command registry, parser, dispatcher, aliases, wildcards, and history
//! (§4.4). Registration records typed command metadata; the parser runs a
//! seven-step pipeline turning a raw `:cmdline` string into coerced
//! arguments.

mod alias;
mod history;
mod parser;
mod wildcard;

pub use alias::AliasTable;
pub use history::CommandHistory;
pub use parser::{CommandParser, ParseError};
pub use wildcard::{expand_wildcards, WildcardContext};

use std::collections::HashMap;
use thiserror::Error;
use vimiv_core::ModeId;

/// A virtual mode membership applicable in every member of the `GLOBALS`
/// set (§3 Command, §4.1). The registry never treats `GLOBAL` as active;
/// it is a lookup fallback category.
pub const GLOBAL: &str = "__global__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
    ListOfString,
    PathGlobList,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    Optional,
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: ParamType,
    pub kind: ParamKind,
    pub default: Option<String>,
}

impl Parameter {
    pub fn positional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            kind: ParamKind::Positional,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            kind: ParamKind::Optional,
            default: Some(default.into()),
        }
    }

    /// The special `count` parameter: never parsed from argv, filled from
    /// the accumulated dispatcher count (§4.4 step 2).
    pub fn count() -> Self {
        Self {
            name: "count".to_string(),
            ty: ParamType::Int,
            kind: ParamKind::Count,
            default: Some("1".to_string()),
        }
    }
}

/// A registered command's metadata (§3 Command).
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub mode: String,
    pub hidden: bool,
    pub store: bool,
    pub edit: bool,
    pub short_description: String,
    pub long_description: String,
    pub params: Vec<Parameter>,
}

/// Result of one resolved/coerced command invocation, ready for a handler.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub command: String,
    pub count: Option<u32>,
    pub positional: Vec<String>,
    pub options: HashMap<String, String>,
    pub flags: Vec<String>,
}

/// The tagged result a command body or the parser returns (§7, §9's
/// exception-to-tagged-result replacement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok(Option<String>),
    Info(String),
    Warn(String),
    Err(String),
}

impl CommandOutcome {
    /// Project onto a status-bar signal (§6's `StatusUpdate`/`StatusClear`
    /// pair), the replacement for Qt's `statusbar.message`/`.clear` slots.
    /// `Ok(None)` clears the status; everything else sets it.
    pub fn to_signal(&self) -> events::Signal {
        match self {
            CommandOutcome::Ok(None) => events::Signal::StatusClear { reason: "command" },
            CommandOutcome::Ok(Some(_)) | CommandOutcome::Info(_) | CommandOutcome::Warn(_)
            | CommandOutcome::Err(_) => events::Signal::StatusUpdate { reason: "command" },
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command already registered for mode: {0}")]
    DuplicateCommand(String),
    #[error("unknown command '{name}' in mode '{mode}'")]
    UnknownCommand { name: String, mode: String },
}

/// Per-mode (plus `GLOBAL`) command table. Global-mode commands are visible
/// in every mode looked up here; the registry itself doesn't know which
/// modes belong to the `GLOBALS` set — callers register under `GLOBAL`
/// for commands meant to be universally visible.
#[derive(Default)]
pub struct CommandRegistry {
    by_mode: HashMap<String, HashMap<String, Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, cmd: Command) -> Result<(), RegistryError> {
        let mode_table = self.by_mode.entry(cmd.mode.clone()).or_default();
        if mode_table.contains_key(&cmd.name) {
            return Err(RegistryError::DuplicateCommand(cmd.name));
        }
        mode_table.insert(cmd.name.clone(), cmd);
        Ok(())
    }

    /// Look up `name` in `mode`'s table first, then in `GLOBAL`.
    pub fn lookup(&self, mode: &str, name: &str) -> Result<&Command, RegistryError> {
        if let Some(cmd) = self.by_mode.get(mode).and_then(|t| t.get(name)) {
            return Ok(cmd);
        }
        if let Some(cmd) = self.by_mode.get(GLOBAL).and_then(|t| t.get(name)) {
            return Ok(cmd);
        }
        Err(RegistryError::UnknownCommand {
            name: name.to_string(),
            mode: mode.to_string(),
        })
    }

    /// All non-hidden commands visible in `mode` (mode-local then global),
    /// for completion listings.
    pub fn visible_in(&self, mode: &str) -> Vec<&Command> {
        let mut out: Vec<&Command> = self
            .by_mode
            .get(mode)
            .into_iter()
            .flat_map(|t| t.values())
            .filter(|c| !c.hidden)
            .collect();
        out.extend(
            self.by_mode
                .get(GLOBAL)
                .into_iter()
                .flat_map(|t| t.values())
                .filter(|c| !c.hidden),
        );
        out
    }
}

/// Repeat-last register (§4.4.1): a single slot populated by `store`-eligible
/// commands, consumed by a `.`-bound repeat command. This crate only
/// provides storage; the binding is out of scope.
#[derive(Default)]
pub struct RepeatLastRegister {
    last: Option<Invocation>,
}

impl RepeatLastRegister {
    pub fn set(&mut self, inv: Invocation) {
        self.last = Some(inv);
    }

    pub fn get(&self) -> Option<&Invocation> {
        self.last.as_ref()
    }
}

/// Marker type kept for call sites that want to talk about a `ModeId`
/// without depending on `vimiv_core` directly for this narrow re-export.
pub type RegistryModeId = ModeId;
