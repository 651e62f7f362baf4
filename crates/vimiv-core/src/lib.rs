//! Mode registry (named UI states with transition bookkeeping): one mode is
//! active at a time, each mode remembers the mode it should fall back to on
//! `leave`.

use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Stable identity for a registered mode. Indices into `ModeRegistry::modes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModeId(usize);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("unknown mode: {0}")]
    UnknownMode(String),
    #[error("mode name already registered: {0}")]
    DuplicateName(String),
}

struct ModeEntry {
    name: String,
    entered_once: bool,
    /// Whether other modes are allowed to record this mode as their `last`.
    /// COMMAND and MANIPULATE set this to `false` (§4.1 last-mode policy).
    records_as_last: bool,
    last: ModeId,
    fallback_last: ModeId,
}

/// Named-mode registry implementing §4.1: one mode is active at any time,
/// each mode tracks its own `last` (previous active mode) and a
/// `fallback_last` restored on `leave`.
pub struct ModeRegistry {
    modes: Vec<ModeEntry>,
    by_name: HashMap<String, ModeId>,
    active: ModeId,
}

impl ModeRegistry {
    /// Construct a registry with one initial mode (commonly the image/library
    /// default) which is its own fallback_last and active from the start.
    pub fn new(initial_name: impl Into<String>) -> Self {
        let name = initial_name.into();
        let entry = ModeEntry {
            name: name.clone(),
            entered_once: true,
            records_as_last: true,
            last: ModeId(0),
            fallback_last: ModeId(0),
        };
        let mut by_name = HashMap::new();
        by_name.insert(name, ModeId(0));
        Self {
            modes: vec![entry],
            by_name,
            active: ModeId(0),
        }
    }

    /// Register a new mode with the given name and fallback. `records_as_last
    /// = false` marks transient modes (COMMAND, MANIPULATE) whose id must
    /// never end up in another mode's `last` field.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        fallback_last: ModeId,
        records_as_last: bool,
    ) -> Result<ModeId, ModeError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(ModeError::DuplicateName(name));
        }
        let id = ModeId(self.modes.len());
        self.modes.push(ModeEntry {
            name: name.clone(),
            entered_once: false,
            records_as_last,
            last: fallback_last,
            fallback_last,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn get_by_name(&self, name: &str) -> Result<ModeId, ModeError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ModeError::UnknownMode(name.to_string()))
    }

    pub fn name(&self, id: ModeId) -> &str {
        &self.modes[id.0].name
    }

    pub fn active(&self) -> ModeId {
        self.active
    }

    pub fn last(&self, id: ModeId) -> ModeId {
        self.modes[id.0].last
    }

    fn check(&self, id: ModeId) -> Result<(), ModeError> {
        if id.0 < self.modes.len() {
            Ok(())
        } else {
            Err(ModeError::UnknownMode(format!("<id {}>", id.0)))
        }
    }

    /// Enter `id`. No-op if already active. On transition, records the
    /// previous active mode as `id`'s `last` (unless the previous mode opts
    /// out via `records_as_last = false`), emits `entered`/`first_entered`.
    pub fn enter(&mut self, id: ModeId) -> Result<Vec<ModeSignal>, ModeError> {
        self.check(id)?;
        if self.active == id {
            return Ok(Vec::new());
        }
        let prev = self.active;
        if self.modes[prev.0].records_as_last {
            self.modes[id.0].last = prev;
        }
        self.active = id;
        let mut out = vec![ModeSignal::Entered(id)];
        if !self.modes[id.0].entered_once {
            self.modes[id.0].entered_once = true;
            out.push(ModeSignal::FirstEntered(id));
        }
        debug!(target = "core.mode", to = %self.name(id), from = %self.name(prev), "enter");
        Ok(out)
    }

    /// Leave `id`: enter `last(id)`, emit `Left(id)`, then reset `last(id)`
    /// back to its fallback.
    pub fn leave(&mut self, id: ModeId) -> Result<Vec<ModeSignal>, ModeError> {
        self.check(id)?;
        let target = self.modes[id.0].last;
        let mut out = self.enter(target)?;
        out.push(ModeSignal::Left(id));
        self.modes[id.0].last = self.modes[id.0].fallback_last;
        Ok(out)
    }

    /// Toggle `id` based on externally-supplied widget visibility (the GUI
    /// collaborator owns that predicate; the registry never inspects it).
    pub fn toggle(
        &mut self,
        id: ModeId,
        widget_visible: bool,
    ) -> Result<Vec<ModeSignal>, ModeError> {
        if widget_visible {
            self.leave(id)
        } else {
            self.enter(id)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSignal {
    Entered(ModeId),
    FirstEntered(ModeId),
    Left(ModeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_current_mode_is_noop() {
        let mut reg = ModeRegistry::new("image");
        let image = reg.get_by_name("image").unwrap();
        assert!(reg.enter(image).unwrap().is_empty());
    }

    #[test]
    fn first_enter_emits_both_signals() {
        let mut reg = ModeRegistry::new("image");
        let image = reg.get_by_name("image").unwrap();
        let thumb = reg.register("thumbnail", image, true).unwrap();
        let sigs = reg.enter(thumb).unwrap();
        assert_eq!(sigs, vec![ModeSignal::Entered(thumb), ModeSignal::FirstEntered(thumb)]);
        // second entry: no first_entered
        reg.enter(image).unwrap();
        let sigs2 = reg.enter(thumb).unwrap();
        assert_eq!(sigs2, vec![ModeSignal::Entered(thumb)]);
    }

    #[test]
    fn leave_restores_last_then_resets_fallback() {
        let mut reg = ModeRegistry::new("image");
        let image = reg.get_by_name("image").unwrap();
        let thumb = reg.register("thumbnail", image, true).unwrap();
        reg.enter(thumb).unwrap();
        assert_eq!(reg.active(), thumb);
        let sigs = reg.leave(thumb).unwrap();
        assert_eq!(reg.active(), image);
        assert!(sigs.contains(&ModeSignal::Left(thumb)));
        assert_eq!(reg.last(thumb), image, "fallback_last restored after leave");
    }

    #[test]
    fn command_mode_never_recorded_as_last() {
        let mut reg = ModeRegistry::new("image");
        let image = reg.get_by_name("image").unwrap();
        let command = reg.register("command", image, false).unwrap();
        let thumb = reg.register("thumbnail", image, true).unwrap();
        reg.enter(thumb).unwrap();
        reg.enter(command).unwrap();
        // command does not record_as_last, so entering thumbnail's `last`
        // must remain `image`, not `command`.
        reg.enter(thumb).unwrap();
        assert_eq!(reg.last(thumb), image);
    }

    #[test]
    fn unknown_mode_name_errors() {
        let reg = ModeRegistry::new("image");
        assert_eq!(
            reg.get_by_name("nonexistent"),
            Err(ModeError::UnknownMode("nonexistent".to_string()))
        );
    }

    #[test]
    fn duplicate_register_errors() {
        let mut reg = ModeRegistry::new("image");
        let image = reg.get_by_name("image").unwrap();
        assert_eq!(
            reg.register("image", image, true),
            Err(ModeError::DuplicateName("image".to_string()))
        );
    }

    #[test]
    fn toggle_enters_when_not_visible_and_leaves_when_visible() {
        let mut reg = ModeRegistry::new("image");
        let image = reg.get_by_name("image").unwrap();
        let thumb = reg.register("thumbnail", image, true).unwrap();
        reg.toggle(thumb, false).unwrap();
        assert_eq!(reg.active(), thumb);
        reg.toggle(thumb, true).unwrap();
        assert_eq!(reg.active(), image);
    }
}
