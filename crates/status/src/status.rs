//! Token-registration status-module evaluator (§4.5), generalized from the
//! teacher's fixed `StatusSegment` enum (mode/file/position/command) into a
//! dynamic `{token}` -> producer map, since this spec's modules are
//! registered at runtime by GUI collaborators rather than known at compile
//! time.

use std::collections::HashMap;

use ahash::AHashSet;

/// A token must look like `{name}` with no nested braces.
fn is_valid_token(token: &str) -> bool {
    token.len() > 2
        && token.starts_with('{')
        && token.ends_with('}')
        && !token[1..token.len() - 1].contains(['{', '}'])
}

pub type Producer = Box<dyn Fn() -> String + Send + Sync>;

#[derive(Default)]
pub struct StatusEvaluator {
    producers: HashMap<String, Producer>,
    /// Unknown tokens already logged once, so repeated `evaluate()` calls on
    /// the same broken template don't spam the log (§4.5 "logged once").
    logged_unknown: AHashSet<String>,
}

impl StatusEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer for `token` (must match `{name}`). Re-registering
    /// an existing token replaces its producer.
    pub fn register(&mut self, token: impl Into<String>, producer: Producer) {
        let token = token.into();
        debug_assert!(is_valid_token(&token), "status token must look like {{name}}: {token}");
        self.producers.insert(token, producer);
    }

    pub fn unregister(&mut self, token: &str) {
        self.producers.remove(token);
    }

    /// Scan `template` for `{...}` spans and substitute each with its
    /// producer's output. Unknown tokens become the empty string and are
    /// logged once per evaluator lifetime.
    pub fn evaluate(&mut self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let bytes = template.as_bytes();
        let mut i = 0usize;
        while i < bytes.len() {
            if bytes[i] == b'{' {
                if let Some(end_rel) = template[i + 1..].find('}') {
                    let end = i + 1 + end_rel;
                    let token = &template[i..=end];
                    if let Some(producer) = self.producers.get(token) {
                        out.push_str(&producer());
                    } else if !self.logged_unknown.contains(token) {
                        tracing::warn!(token, "unknown status module token");
                        self.logged_unknown.insert(token.to_string());
                    }
                    i = end + 1;
                    continue;
                }
            }
            let ch = template[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }
}
