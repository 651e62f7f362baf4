//! Configuration and keybinding file loading (`vimiv.conf`, `keys.conf`):
//! INI parsing, `${env:NAME}` interpolation, and the settings registry
//! backing `:set` (§3.1, §6 File formats). Generalizes the teacher's
//! fixed `ConfigFile`/`ScrollConfig` deserialize-and-default pattern into a
//! dynamic `Setting` trait object table, since this spec's settings are
//! registered by many independent collaborators rather than known as one
//! compile-time struct.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown setting: {0}")]
    UnknownSetting(String),
    #[error("invalid value for setting '{name}': {value}")]
    InvalidValue { name: String, value: String },
    #[error("unsupported interpolation prefix '{0}' (only 'env' is supported)")]
    UnsupportedInterpolationPrefix(String),
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),
    #[error("malformed INI: {0}")]
    Malformed(String),
}

/// Best-effort `$XDG_CONFIG_HOME/vimiv/vimiv.conf` (or platform equivalent).
pub fn discover_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vimiv")
        .join("vimiv.conf")
}

pub fn discover_keyfile_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vimiv")
        .join("keys.conf")
}

/// Resolve `${env:NAME}` tokens in `value`. Any other `${prefix:...}` form is
/// a config error; a bare `$` or unmatched `${` with no closing `}` passes
/// through unchanged the same way the underlying INI parser's interpolation
/// falls through on malformed markup.
pub fn interpolate(value: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if value[i..].starts_with("${") {
            if let Some(end_rel) = value[i + 2..].find('}') {
                let end = i + 2 + end_rel;
                let inner = &value[i + 2..end];
                let (prefix, name) = inner
                    .split_once(':')
                    .ok_or_else(|| ConfigError::Malformed(inner.to_string()))?;
                if prefix != "env" {
                    return Err(ConfigError::UnsupportedInterpolationPrefix(prefix.to_string()));
                }
                let resolved = std::env::var(name)
                    .map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
                out.push_str(&resolved);
                i = end + 1;
                continue;
            }
        }
        let ch = value[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

/// A typed, named, settable value backing `:set name value` and
/// `${status}`-style producers that read configuration.
pub trait Setting: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn value(&self) -> String;
    fn set_value(&mut self, raw: &str) -> Result<(), ConfigError>;
    fn default_value(&self) -> String;
}

macro_rules! scalar_setting {
    ($ty:ident, $inner:ty) => {
        #[derive(Debug, Clone)]
        pub struct $ty {
            name: String,
            default: $inner,
            current: $inner,
        }

        impl $ty {
            pub fn new(name: impl Into<String>, default: $inner) -> Self {
                let name = name.into();
                Self {
                    name,
                    default,
                    current: default,
                }
            }

            pub fn get(&self) -> $inner {
                self.current
            }
        }

        impl Setting for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn value(&self) -> String {
                self.current.to_string()
            }

            fn default_value(&self) -> String {
                self.default.to_string()
            }

            fn set_value(&mut self, raw: &str) -> Result<(), ConfigError> {
                self.current = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    name: self.name.clone(),
                    value: raw.to_string(),
                })?;
                Ok(())
            }
        }
    };
}

/// Bool settings accept the same truthy/falsy spellings the command parser
/// does, not just Rust's `"true"`/`"false"`.
#[derive(Debug, Clone)]
pub struct BoolSetting {
    name: String,
    default: bool,
    current: bool,
}

impl BoolSetting {
    pub fn new(name: impl Into<String>, default: bool) -> Self {
        let name = name.into();
        Self {
            name,
            default,
            current: default,
        }
    }

    pub fn get(&self) -> bool {
        self.current
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl Setting for BoolSetting {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> String {
        self.current.to_string()
    }

    fn default_value(&self) -> String {
        self.default.to_string()
    }

    fn set_value(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.current = parse_bool(raw).ok_or_else(|| ConfigError::InvalidValue {
            name: self.name.clone(),
            value: raw.to_string(),
        })?;
        Ok(())
    }
}

scalar_setting!(IntSetting, i64);
scalar_setting!(FloatSetting, f64);

#[derive(Debug, Clone)]
pub struct StrSetting {
    name: String,
    default: String,
    current: String,
}

impl StrSetting {
    pub fn new(name: impl Into<String>, default: impl Into<String>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            current: default.clone(),
            default,
        }
    }

    pub fn get(&self) -> &str {
        &self.current
    }
}

impl Setting for StrSetting {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> String {
        self.current.clone()
    }

    fn default_value(&self) -> String {
        self.default.clone()
    }

    fn set_value(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.current = raw.to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSize {
    Normal,
    Large,
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThumbnailSize::Normal => "normal",
            ThumbnailSize::Large => "large",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailSizeSetting {
    name: String,
    default: ThumbnailSize,
    current: ThumbnailSize,
}

impl ThumbnailSizeSetting {
    pub fn new(name: impl Into<String>, default: ThumbnailSize) -> Self {
        Self {
            name: name.into(),
            default,
            current: default,
        }
    }

    pub fn get(&self) -> ThumbnailSize {
        self.current
    }
}

impl Setting for ThumbnailSizeSetting {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> String {
        self.current.to_string()
    }

    fn default_value(&self) -> String {
        self.default.to_string()
    }

    fn set_value(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.current = match raw {
            "normal" => ThumbnailSize::Normal,
            "large" => ThumbnailSize::Large,
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: self.name.clone(),
                    value: raw.to_string(),
                })
            }
        };
        Ok(())
    }
}

/// Process-wide table of typed settings backing `:set` (§3.1). Unknown
/// names or unparsable values are reported but never panic; the caller
/// decides whether to surface them (§7's "log an error and leave the
/// setting at its previous value").
#[derive(Default)]
pub struct SettingsRegistry {
    settings: HashMap<String, Box<dyn Setting>>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, setting: Box<dyn Setting>) {
        self.settings.insert(setting.name().to_string(), setting);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Setting> {
        self.settings.get(name).map(|s| s.as_ref())
    }

    pub fn set(&mut self, name: &str, raw_value: &str) -> Result<(), ConfigError> {
        let setting = self
            .settings
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownSetting(name.to_string()))?;
        setting.set_value(raw_value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.settings.keys().map(|s| s.as_str())
    }
}

/// Load `vimiv.conf` and apply every `section.key = value` pair (after
/// `${env:NAME}` interpolation) to `registry`. Missing file is not an
/// error (falls back to registered defaults); a section name becomes the
/// setting's namespace prefix, e.g. `[monitor]\nshow_hidden = false` sets
/// `monitor.show_hidden`. Per-setting failures are collected and returned
/// rather than aborting the whole load, so one bad line doesn't blank the
/// rest of the file.
pub fn load_settings_file(path: &Path, registry: &mut SettingsRegistry) -> Result<Vec<ConfigError>, ConfigError> {
    let mut errors = Vec::new();
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Ok(errors),
    };
    let ini = ini::Ini::load_from_str(&content).map_err(|e| ConfigError::Malformed(e.to_string()))?;
    for (section, props) in ini.iter() {
        for (key, raw) in props.iter() {
            let full_name = match section {
                Some(s) => format!("{s}.{key}"),
                None => key.to_string(),
            };
            match interpolate(raw).and_then(|v| registry.set(&full_name, &v)) {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(setting = %full_name, error = %e, "failed to apply config setting");
                    errors.push(e);
                }
            }
        }
    }
    Ok(errors)
}

/// One parsed `keys.conf` entry; `Unbind` removes a default binding rather
/// than adding a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Bind(String),
    Unbind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeybindingEntry {
    pub mode: String,
    pub key: String,
    pub action: KeyAction,
}

/// Parse `keys.conf`: each INI section is an upper-case mode name, each
/// `key = command` pair a binding. `command == "unbind"` removes a default
/// binding instead of adding one; `%%` unescapes to a literal `%` (the
/// wildcard-collision escape §6 calls out for default commands).
pub fn parse_keybindings_file(path: &Path) -> Result<Vec<KeybindingEntry>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Ok(Vec::new()),
    };
    parse_keybindings_str(&content)
}

pub fn parse_keybindings_str(content: &str) -> Result<Vec<KeybindingEntry>, ConfigError> {
    let ini = ini::Ini::load_from_str(content).map_err(|e| ConfigError::Malformed(e.to_string()))?;
    let mut entries = Vec::new();
    for (section, props) in ini.iter() {
        let mode = match section {
            Some(s) => s.to_string(),
            None => continue,
        };
        for (key, raw) in props.iter() {
            let command = raw.replace("%%", "%");
            let action = if command == "unbind" {
                KeyAction::Unbind
            } else {
                KeyAction::Bind(command)
            };
            entries.push(KeybindingEntry {
                mode: mode.clone(),
                key: key.to_string(),
                action,
            });
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_env_var() {
        unsafe { std::env::set_var("VIMIV_TEST_TOKEN", "hello") };
        assert_eq!(interpolate("${env:VIMIV_TEST_TOKEN}/x").unwrap(), "hello/x");
        unsafe { std::env::remove_var("VIMIV_TEST_TOKEN") };
    }

    #[test]
    fn missing_env_var_errors() {
        unsafe { std::env::remove_var("VIMIV_TEST_DOES_NOT_EXIST") };
        assert_eq!(
            interpolate("${env:VIMIV_TEST_DOES_NOT_EXIST}"),
            Err(ConfigError::MissingEnvVar("VIMIV_TEST_DOES_NOT_EXIST".to_string()))
        );
    }

    #[test]
    fn unsupported_prefix_errors() {
        assert_eq!(
            interpolate("${file:/etc/passwd}"),
            Err(ConfigError::UnsupportedInterpolationPrefix("file".to_string()))
        );
    }

    #[test]
    fn bool_setting_accepts_yes_no() {
        let mut s = BoolSetting::new("monitor.show_hidden", false);
        s.set_value("yes").unwrap();
        assert!(s.get());
        assert!(s.set_value("bogus").is_err());
    }

    #[test]
    fn thumbnail_size_setting_round_trips() {
        let mut s = ThumbnailSizeSetting::new("thumbnail.size", ThumbnailSize::Normal);
        s.set_value("large").unwrap();
        assert_eq!(s.get(), ThumbnailSize::Large);
        assert_eq!(s.value(), "large");
    }

    #[test]
    fn registry_set_unknown_setting_errors() {
        let mut reg = SettingsRegistry::new();
        assert_eq!(
            reg.set("nope", "1"),
            Err(ConfigError::UnknownSetting("nope".to_string()))
        );
    }

    #[test]
    fn registry_get_and_set_roundtrip() {
        let mut reg = SettingsRegistry::new();
        reg.register(Box::new(IntSetting::new("keyhint.timeout", 1000)));
        reg.set("keyhint.timeout", "500").unwrap();
        assert_eq!(reg.get("keyhint.timeout").unwrap().value(), "500");
    }

    #[test]
    fn load_settings_file_applies_sectioned_values() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[monitor]\nshow_hidden = true\n[keyhint]\ntimeout = 250\n").unwrap();
        let mut reg = SettingsRegistry::new();
        reg.register(Box::new(BoolSetting::new("monitor.show_hidden", false)));
        reg.register(Box::new(IntSetting::new("keyhint.timeout", 1000)));
        let errors = load_settings_file(tmp.path(), &mut reg).unwrap();
        assert!(errors.is_empty());
        assert_eq!(reg.get("monitor.show_hidden").unwrap().value(), "true");
        assert_eq!(reg.get("keyhint.timeout").unwrap().value(), "250");
    }

    #[test]
    fn load_settings_file_collects_errors_without_aborting() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[monitor]\nshow_hidden = notabool\nunknown_key = 1\n").unwrap();
        let mut reg = SettingsRegistry::new();
        reg.register(Box::new(BoolSetting::new("monitor.show_hidden", false)));
        let errors = load_settings_file(tmp.path(), &mut reg).unwrap();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let mut reg = SettingsRegistry::new();
        let errors = load_settings_file(Path::new("__does_not_exist__.conf"), &mut reg).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn missing_keyfile_is_not_an_error() {
        let entries = parse_keybindings_file(Path::new("__does_not_exist__.conf")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn parses_keybindings_with_unbind_and_escaped_percent() {
        let content = "[IMAGE]\ngg = goto 1\nx = unbind\nd = delete %%f\n";
        let entries = parse_keybindings_str(content).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].mode, "IMAGE");
        assert_eq!(entries[1].action, KeyAction::Unbind);
        assert_eq!(entries[2].action, KeyAction::Bind("delete %f".to_string()));
    }
}
