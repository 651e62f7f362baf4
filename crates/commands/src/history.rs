//! Bounded command-line history per mode (§4.4.1), grounded on the
//! original's flat persisted history list (`commands/history.py`'s
//! `read`/`write`), generalized into an in-memory bounded ring with
//! up/down cursor navigation for an out-of-scope commandline widget.

use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

pub struct CommandHistory {
    capacity: usize,
    entries: VecDeque<String>,
    /// Cursor into `entries` from the back (`None` = not currently
    /// recalling). `previous()`/`next()` walk it; `push` resets it.
    cursor: Option<usize>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
            cursor: None,
        }
    }

    /// Record a newly executed command line, evicting the oldest entry if
    /// at capacity. Resets the recall cursor.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if self.entries.back().map(|s| s.as_str()) == Some(line.as_str()) {
            self.cursor = None;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
        self.cursor = None;
    }

    /// Step to the previous (older) entry, returning it if any remain.
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let next_cursor = match self.cursor {
            None => self.entries.len() - 1,
            Some(0) => 0,
            Some(c) => c - 1,
        };
        self.cursor = Some(next_cursor);
        self.entries.get(next_cursor).map(|s| s.as_str())
    }

    /// Step to the next (newer) entry, clearing the cursor (back to the
    /// empty line) once the newest entry is passed.
    pub fn next(&mut self) -> Option<&str> {
        match self.cursor {
            None => None,
            Some(c) if c + 1 < self.entries.len() => {
                self.cursor = Some(c + 1);
                self.entries.get(c + 1).map(|s| s.as_str())
            }
            Some(_) => {
                self.cursor = None;
                None
            }
        }
    }

    pub fn search_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .rev()
            .map(|s| s.as_str())
            .filter(move |s| s.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_at_capacity() {
        let mut h = CommandHistory::new(2);
        h.push("a");
        h.push("b");
        h.push("c");
        assert_eq!(h.len(), 2);
        assert_eq!(h.search_prefix("a").count(), 0);
    }

    #[test]
    fn consecutive_duplicate_not_recorded() {
        let mut h = CommandHistory::new(10);
        h.push("quit");
        h.push("quit");
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn previous_next_cursor_walks_in_order() {
        let mut h = CommandHistory::new(10);
        h.push("a");
        h.push("b");
        h.push("c");
        assert_eq!(h.previous(), Some("c"));
        assert_eq!(h.previous(), Some("b"));
        assert_eq!(h.previous(), Some("a"));
        assert_eq!(h.previous(), Some("a"), "stops at oldest");
        assert_eq!(h.next(), Some("b"));
        assert_eq!(h.next(), Some("c"));
        assert_eq!(h.next(), None, "past newest clears cursor");
    }

    #[test]
    fn search_prefix_returns_newest_first() {
        let mut h = CommandHistory::new(10);
        h.push("delete 1");
        h.push("write");
        h.push("delete 2");
        let matches: Vec<&str> = h.search_prefix("delete").collect();
        assert_eq!(matches, vec!["delete 2", "delete 1"]);
    }
}
