//! Alias table: `name`, `mode`, `expansion` resolved by case-sensitive exact
//! match on the first whitespace-delimited token, mode-local table first
//! then the global table (§3 Alias, §4.4 step 3).

use std::collections::HashMap;

use crate::GLOBAL;

#[derive(Default)]
pub struct AliasTable {
    by_mode: HashMap<String, HashMap<String, String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mode: impl Into<String>, name: impl Into<String>, expansion: impl Into<String>) {
        self.by_mode
            .entry(mode.into())
            .or_default()
            .insert(name.into(), expansion.into());
    }

    /// Expand the first token of `body` if it names an alias in `mode` or
    /// `GLOBAL`, returning the substituted string with the rest of `body`
    /// appended unchanged. Returns `body` unmodified if no alias matches.
    pub fn expand<'a>(&self, mode: &str, body: &'a str) -> String {
        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r),
            None => (body, ""),
        };
        let expansion = self
            .by_mode
            .get(mode)
            .and_then(|t| t.get(head))
            .or_else(|| self.by_mode.get(GLOBAL).and_then(|t| t.get(head)));
        match expansion {
            Some(exp) if rest.is_empty() => exp.clone(),
            Some(exp) => format!("{exp} {rest}"),
            None => body.to_string(),
        }
    }
}
