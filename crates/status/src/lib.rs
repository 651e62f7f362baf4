//! Status-module evaluator (§4.5): runtime `{token}` registration plus an
//! `update`/`clear` coalescing model that re-runs subscribed templates at
//! most once per call, then emits the result as a signal for a GUI
//! collaborator to display.

mod status;

pub use status::{Producer, StatusEvaluator};

use events::Signal;

/// One GUI-subscribed template (e.g. a status bar segment), identified by a
/// caller-chosen id so later re-registration or removal is unambiguous.
struct Subscription {
    id: String,
    template: String,
}

/// Drives one or more `StatusEvaluator` templates from `update`/`clear`
/// calls, coalescing re-evaluation so a burst of callers triggering the same
/// reason within one call only evaluates each subscribed template once.
pub struct StatusModuleHost {
    evaluator: StatusEvaluator,
    subscriptions: Vec<Subscription>,
}

impl StatusModuleHost {
    pub fn new(evaluator: StatusEvaluator) -> Self {
        Self {
            evaluator,
            subscriptions: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, id: impl Into<String>, template: impl Into<String>) {
        let id = id.into();
        let template = template.into();
        if let Some(existing) = self.subscriptions.iter_mut().find(|s| s.id == id) {
            existing.template = template;
        } else {
            self.subscriptions.push(Subscription { id, template });
        }
    }

    pub fn unsubscribe(&mut self, id: &str) {
        self.subscriptions.retain(|s| s.id != id);
    }

    /// Re-evaluate every subscribed template exactly once and return the
    /// rendered results paired with their subscription id, tagged with a
    /// `StatusUpdate` signal for the caller to forward.
    pub fn update(&mut self, reason: &'static str) -> (Vec<(String, String)>, Signal) {
        let rendered = self
            .subscriptions
            .iter()
            .map(|s| (s.id.clone(), self.evaluator.evaluate(&s.template)))
            .collect();
        (rendered, Signal::StatusUpdate { reason })
    }

    /// Signal subscribers to clear without re-evaluating (§4.5's `clear`
    /// path never runs producers).
    pub fn clear(&self, reason: &'static str) -> Signal {
        Signal::StatusClear { reason }
    }
}
