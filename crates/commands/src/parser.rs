//! Command-line parsing pipeline (§4.4): strip prefix, extract count, expand
//! aliases, expand wildcards, shell-split, map to parameters, coerce types.
//! Generalizes the teacher's `ParsedCommand`/`split_head` shape (a fixed
//! enum of four commands) into a dynamic per-mode registry lookup.

use std::collections::HashMap;
use thiserror::Error;

use crate::{
    alias::AliasTable, wildcard::{expand_wildcards, WildcardContext}, Command, CommandRegistry,
    Invocation, ParamKind, ParamType, RegistryError,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("empty command line")]
    Empty,
    #[error("{0}")]
    Argument(String),
    #[error("unclosed quote in command line")]
    UnclosedQuote,
}

pub struct CommandParser<'a> {
    pub registry: &'a CommandRegistry,
    pub aliases: &'a AliasTable,
}

impl<'a> CommandParser<'a> {
    pub fn new(registry: &'a CommandRegistry, aliases: &'a AliasTable) -> Self {
        Self { registry, aliases }
    }

    /// Runs steps 2-7 of the pipeline. `raw` is the command-line buffer as
    /// typed after the `:`/search prefix; the caller is responsible for
    /// step 1 (a leading `!` marks an external shell command and must never
    /// reach `parse`) before calling this. `dispatcher_count` is the count
    /// accumulated by the keybinding dispatcher (§4.3) before the user
    /// typed `:`.
    pub fn parse(
        &self,
        mode: &str,
        raw: &str,
        dispatcher_count: Option<u32>,
        wildcards: &WildcardContext<'_>,
    ) -> Result<Invocation, ParseError> {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }

        // Step 2: leading decimal count prefix, combined with the
        // dispatcher's accumulated count.
        let digits_end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
        let (count_str, rest) = trimmed.split_at(digits_end);
        let line_count: Option<u32> = if count_str.is_empty() {
            None
        } else {
            count_str.parse().ok()
        };
        let combined_count = match (dispatcher_count, line_count) {
            (Some(a), Some(b)) => Some(a.saturating_mul(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };

        // Step 3: alias expansion (mode-local then global, first token).
        let expanded = self.aliases.expand(mode, rest.trim_start());

        // Step 4: wildcard expansion on the remaining text.
        let wildcard_expanded = expand_wildcards(&expanded, wildcards);

        // Step 5: POSIX shell split.
        let tokens = shell_split(&wildcard_expanded)?;
        let (name, args) = tokens.split_first().ok_or(ParseError::Empty)?;

        // Registry lookup.
        let cmd = self.registry.lookup(mode, name)?;

        // Step 6 + 7: map tokens to parameters and coerce types.
        let inv = map_and_coerce(cmd, args, combined_count)?;
        Ok(inv)
    }
}

/// POSIX-ish shell split: single quotes suppress all escaping, double
/// quotes allow `\` escapes, outside quotes `\` escapes the next character
/// and unquoted whitespace separates tokens.
pub fn shell_split(input: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut chars = input.chars().peekable();
    let mut in_token = false;

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    cur.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' if matches!(chars.peek(), Some('"') | Some('\\') | Some('$')) => {
                    cur.push(chars.next().unwrap());
                }
                _ => cur.push(c),
            },
            Quote::None => match c {
                ' ' | '\t' => {
                    if in_token {
                        tokens.push(std::mem::take(&mut cur));
                        in_token = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                        in_token = true;
                    }
                }
                _ => {
                    cur.push(c);
                    in_token = true;
                }
            },
        }
    }
    if quote != Quote::None {
        return Err(ParseError::UnclosedQuote);
    }
    if in_token {
        tokens.push(cur);
    }
    Ok(tokens)
}

fn coerce_bool(s: &str) -> Result<bool, ParseError> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ParseError::Argument(format!("invalid boolean: {s}"))),
    }
}

fn check_type(name: &str, ty: ParamType, value: &str) -> Result<(), ParseError> {
    match ty {
        ParamType::Int => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| ParseError::Argument(format!("{name}: expected int, got '{value}'"))),
        ParamType::Float => value
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| ParseError::Argument(format!("{name}: expected float, got '{value}'"))),
        ParamType::Bool => coerce_bool(value).map(|_| ()),
        ParamType::String
        | ParamType::ListOfString
        | ParamType::PathGlobList
        | ParamType::Enum => Ok(()),
    }
}

/// Step 6: glob-expand a single token. Tokens with no glob metacharacter
/// pass through unchanged so a not-yet-existing filename still works; a
/// pattern that matches nothing also falls back to the literal token rather
/// than vanishing.
fn expand_path_glob(token: &str) -> Vec<String> {
    if !token.contains(['*', '?', '[']) {
        return vec![token.to_string()];
    }
    let matches: Vec<String> = match glob::glob(token) {
        Ok(paths) => paths.filter_map(Result::ok).map(|p| p.to_string_lossy().into_owned()).collect(),
        Err(_) => Vec::new(),
    };
    if matches.is_empty() {
        vec![token.to_string()]
    } else {
        matches
    }
}

fn map_and_coerce(
    cmd: &Command,
    args: &[String],
    count: Option<u32>,
) -> Result<Invocation, ParseError> {
    let mut positional = Vec::new();
    let mut options: HashMap<String, String> = HashMap::new();
    let mut flags = Vec::new();

    for arg in args {
        if let Some(rest) = arg.strip_prefix("--") {
            if let Some((k, v)) = rest.split_once('=') {
                options.insert(k.to_string(), v.to_string());
            } else {
                flags.push(rest.to_string());
            }
        } else {
            positional.push(arg.clone());
        }
    }

    let declared_positional: Vec<&crate::Parameter> = cmd
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::Positional)
        .collect();

    // Step 6: a `PathGlobList`-typed positional parameter is always the last
    // one declared and consumes every remaining raw token, glob-expanding
    // and flattening each into the final positional list.
    if let Some(glob_idx) = declared_positional.iter().position(|p| p.ty == ParamType::PathGlobList) {
        let split_at = glob_idx.min(positional.len());
        let (fixed, rest) = positional.split_at(split_at);
        let mut expanded: Vec<String> = fixed.to_vec();
        for token in rest {
            expanded.extend(expand_path_glob(token));
        }
        positional = expanded;
    }

    if positional.len() < declared_positional.len() {
        let missing = &declared_positional[positional.len()];
        return Err(ParseError::Argument(format!(
            "missing required parameter: {}",
            missing.name
        )));
    }

    for (param, value) in declared_positional.iter().zip(positional.iter()) {
        check_type(&param.name, param.ty, value)?;
    }

    for param in cmd.params.iter().filter(|p| p.kind == ParamKind::Optional) {
        if let Some(value) = options.get(&param.name) {
            check_type(&param.name, param.ty, value)?;
        } else if matches!(param.ty, ParamType::Bool) && flags.contains(&param.name) {
            // boolean `--flag` shorthand
        }
    }

    for flag in &flags {
        let known = cmd
            .params
            .iter()
            .any(|p| p.kind == ParamKind::Optional && p.ty == ParamType::Bool && &p.name == flag);
        if !known && !cmd.params.iter().any(|p| p.name == *flag) {
            return Err(ParseError::Argument(format!("unknown option: --{flag}")));
        }
    }

    Ok(Invocation {
        command: cmd.name.clone(),
        count,
        positional,
        options,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, CommandRegistry, Parameter, GLOBAL};

    fn setup() -> (CommandRegistry, AliasTable) {
        let mut reg = CommandRegistry::new();
        reg.register(Command {
            name: "delete".to_string(),
            mode: GLOBAL.to_string(),
            hidden: false,
            store: true,
            edit: true,
            short_description: String::new(),
            long_description: String::new(),
            params: vec![Parameter::count(), Parameter::optional("force", ParamType::Bool, "false")],
        })
        .unwrap();
        reg.register(Command {
            name: "open".to_string(),
            mode: "image".to_string(),
            hidden: false,
            store: false,
            edit: false,
            short_description: String::new(),
            long_description: String::new(),
            params: vec![Parameter::positional("path", ParamType::String)],
        })
        .unwrap();
        (reg, AliasTable::new())
    }

    fn noctx() -> WildcardContext<'static> {
        WildcardContext {
            current_path: None,
            path_list: &[],
            marked_paths: &[],
        }
    }

    #[test]
    fn parses_count_and_flag() {
        let (reg, aliases) = setup();
        let parser = CommandParser::new(&reg, &aliases);
        let inv = parser.parse("image", "delete --force=true", Some(3), &noctx()).unwrap();
        assert_eq!(inv.command, "delete");
        assert_eq!(inv.count, Some(3));
        assert_eq!(inv.options.get("force"), Some(&"true".to_string()));
    }

    #[test]
    fn line_count_multiplies_dispatcher_count() {
        let (reg, aliases) = setup();
        let parser = CommandParser::new(&reg, &aliases);
        let inv = parser.parse("image", "2delete", Some(3), &noctx()).unwrap();
        assert_eq!(inv.count, Some(6));
    }

    #[test]
    fn missing_positional_errors() {
        let (reg, aliases) = setup();
        let parser = CommandParser::new(&reg, &aliases);
        let err = parser.parse("image", "open", None, &noctx()).unwrap_err();
        assert!(matches!(err, ParseError::Argument(_)));
    }

    #[test]
    fn quoted_path_preserves_spaces() {
        let (reg, aliases) = setup();
        let parser = CommandParser::new(&reg, &aliases);
        let inv = parser
            .parse("image", "open 'my photo.png'", None, &noctx())
            .unwrap();
        assert_eq!(inv.positional, vec!["my photo.png".to_string()]);
    }

    #[test]
    fn unknown_command_is_registry_error() {
        let (reg, aliases) = setup();
        let parser = CommandParser::new(&reg, &aliases);
        assert!(matches!(
            parser.parse("image", "bogus", None, &noctx()),
            Err(ParseError::Registry(RegistryError::UnknownCommand { .. }))
        ));
    }

    #[test]
    fn alias_then_wildcard_order() {
        let (reg, mut aliases) = setup();
        aliases.register("image", "d", "delete");
        let parser = CommandParser::new(&reg, &aliases);
        let wc = WildcardContext {
            current_path: Some("/tmp/a.png"),
            path_list: &[],
            marked_paths: &[],
        };
        // %  should resolve to current_path *after* alias expansion, proving
        // alias-first ordering (the spec's fixed resolution of an
        // undocumented ambiguity).
        let inv = parser.parse("image", "d --force=%", None, &wc);
        // `--force` expects a bool; `%` coerces to "/tmp/a.png" which is
        // not a valid bool, so this must fail type coercion rather than
        // unknown-command, proving the alias resolved to `delete` first.
        assert!(matches!(inv, Err(ParseError::Argument(_))));
    }

    #[test]
    fn unclosed_quote_errors() {
        assert_eq!(shell_split("'abc"), Err(ParseError::UnclosedQuote));
    }

    #[test]
    fn bang_line_is_the_callers_responsibility_not_parsers() {
        // `parse` has no step-1 bang check of its own; the caller (the
        // facade's `dispatch_line`) must never hand it a `!`-prefixed line.
        // A bare `!` with nothing registered under that name simply fails
        // registry lookup here, proving this function never special-cases it.
        let (reg, aliases) = setup();
        let parser = CommandParser::new(&reg, &aliases);
        assert!(matches!(
            parser.parse("image", "!ls", None, &noctx()),
            Err(ParseError::Registry(RegistryError::UnknownCommand { .. }))
        ));
    }

    #[test]
    fn path_glob_list_expands_and_flattens_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"x").unwrap();

        let mut reg = CommandRegistry::new();
        reg.register(Command {
            name: "open".to_string(),
            mode: GLOBAL.to_string(),
            hidden: false,
            store: false,
            edit: false,
            short_description: String::new(),
            long_description: String::new(),
            params: vec![Parameter::positional("paths", ParamType::PathGlobList)],
        })
        .unwrap();
        let aliases = AliasTable::new();
        let parser = CommandParser::new(&reg, &aliases);

        let pattern = dir.path().join("*.png").to_string_lossy().into_owned();
        let inv = parser.parse("image", &format!("open {pattern}"), None, &noctx()).unwrap();
        assert_eq!(inv.positional.len(), 2);
        assert!(inv.positional.iter().all(|p| p.ends_with(".png")));
    }

    #[test]
    fn path_glob_list_falls_back_to_literal_when_nothing_matches() {
        let mut reg = CommandRegistry::new();
        reg.register(Command {
            name: "open".to_string(),
            mode: GLOBAL.to_string(),
            hidden: false,
            store: false,
            edit: false,
            short_description: String::new(),
            long_description: String::new(),
            params: vec![Parameter::positional("paths", ParamType::PathGlobList)],
        })
        .unwrap();
        let aliases = AliasTable::new();
        let parser = CommandParser::new(&reg, &aliases);

        let inv = parser.parse("image", "open new_file.png", None, &noctx()).unwrap();
        assert_eq!(inv.positional, vec!["new_file.png".to_string()]);
    }
}
