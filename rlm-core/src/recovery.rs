//! Error-recovery state machine.
//!
//! Wraps [`ErrorKind`] classification in a retry/degrade/give-up decision,
//! with a ring-buffered error history and tailored retry prompts per
//! category. The state only depends on the retry count for the current
//! action and the classified kind of the latest error — no other state is
//! carried between calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, ErrorKind};

const HISTORY_CAPACITY: usize = 1000;

/// What the orchestrator should do in response to an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry the action; bump the retry counter and prepend `prompt_hint`
    /// to the next attempt's prompt.
    Retry { prompt_hint: String, delay: Duration },
    /// Fall back to a cheaper/simpler mode (e.g. direct-mode degradation).
    Degrade,
    /// Stop trying; propagate the error.
    GiveUp,
}

/// One entry in the ring-buffered error history.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub action: RecoveryActionKind,
    pub recovered: bool,
    pub at: DateTime<Utc>,
}

/// The action taken, without the retry-specific payload (for stats grouping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryActionKind {
    Retry,
    Degrade,
    GiveUp,
}

impl From<&RecoveryAction> for RecoveryActionKind {
    fn from(action: &RecoveryAction) -> Self {
        match action {
            RecoveryAction::Retry { .. } => RecoveryActionKind::Retry,
            RecoveryAction::Degrade => RecoveryActionKind::Degrade,
            RecoveryAction::GiveUp => RecoveryActionKind::GiveUp,
        }
    }
}

/// Aggregate recovery statistics.
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    pub total: u64,
    pub recovered: u64,
    pub by_kind: std::collections::HashMap<String, u64>,
}

impl RecoveryStats {
    pub fn recovery_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.recovered as f64 / self.total as f64
        }
    }
}

/// Table-driven retry/degrade/give-up decision maker.
pub struct RecoveryManager {
    max_retries: u32,
    degrade_enabled: bool,
    base_delay: Duration,
    history: Mutex<VecDeque<ErrorRecord>>,
}

impl RecoveryManager {
    pub fn new(max_retries: u32, degrade_enabled: bool, base_delay: Duration) -> Self {
        Self {
            max_retries,
            degrade_enabled,
            base_delay,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Decide what to do about `error`, given the current retry count for
    /// the action that produced it.
    pub fn handle(&self, error: &Error, retries: u32) -> RecoveryAction {
        let kind = ErrorKind::classify(error);
        let action = self.decide(kind, retries);
        self.record(kind, error.to_string(), &action, false);
        action
    }

    /// Same as [`handle`](Self::handle), classifying a raw message instead
    /// of a typed `Error` (e.g. interpreter stderr).
    pub fn handle_message(&self, message: &str, retries: u32) -> RecoveryAction {
        let kind = ErrorKind::classify_str(message);
        let action = self.decide(kind, retries);
        self.record(kind, message.to_string(), &action, false);
        action
    }

    /// Mark the most recent history entry as having led to a successful
    /// retry, for recovery-rate accounting.
    pub fn mark_recovered(&self) {
        if let Some(last) = self.history.lock().unwrap().back_mut() {
            last.recovered = true;
        }
    }

    fn decide(&self, kind: ErrorKind, retries: u32) -> RecoveryAction {
        let below_max = retries < self.max_retries;

        match (kind, below_max) {
            (ErrorKind::Terminal, _) => RecoveryAction::GiveUp,
            (ErrorKind::Retryable, true) => RecoveryAction::Retry {
                prompt_hint: retry_prompt(kind, ""),
                delay: self.base_delay,
            },
            (ErrorKind::Timeout, true) => RecoveryAction::Retry {
                prompt_hint: retry_prompt(kind, ""),
                delay: self.base_delay,
            },
            (ErrorKind::Resource, _) => RecoveryAction::Degrade,
            (ErrorKind::Degradable, _) => RecoveryAction::Degrade,
            (ErrorKind::Unverifiable, _) => RecoveryAction::Degrade,
            (ErrorKind::Retryable, false) | (ErrorKind::Timeout, false) => {
                if self.degrade_enabled {
                    RecoveryAction::Degrade
                } else {
                    RecoveryAction::GiveUp
                }
            }
        }
    }

    fn record(&self, kind: ErrorKind, message: String, action: &RecoveryAction, recovered: bool) {
        let mut history = self.history.lock().unwrap();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(ErrorRecord {
            kind,
            message,
            action: RecoveryActionKind::from(action),
            recovered,
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<ErrorRecord> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn stats(&self) -> RecoveryStats {
        let history = self.history.lock().unwrap();
        let mut stats = RecoveryStats {
            total: history.len() as u64,
            ..Default::default()
        };
        for record in history.iter() {
            if record.recovered {
                stats.recovered += 1;
            }
            *stats.by_kind.entry(format!("{:?}", record.kind)).or_insert(0) += 1;
        }
        stats
    }
}

/// A short, category-tailored hint prepended to the retry prompt.
fn retry_prompt(kind: ErrorKind, detail: &str) -> String {
    let base = match kind {
        ErrorKind::Timeout => "try smaller chunks",
        ErrorKind::Retryable => "fix the syntax and define any missing variables before retrying",
        _ => "retry with a simplified approach",
    };
    if detail.is_empty() {
        base.to_string()
    } else {
        format!("{base}: {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RecoveryManager {
        RecoveryManager::new(2, true, Duration::from_millis(10))
    }

    #[test]
    fn test_retry_below_max_for_retryable() {
        let m = manager();
        let action = m.handle_message("NameError: x is not defined", 0);
        assert!(matches!(action, RecoveryAction::Retry { .. }));
    }

    #[test]
    fn test_degrade_at_max_retries_when_enabled() {
        let m = manager();
        let action = m.handle_message("NameError: x is not defined", 2);
        assert_eq!(action, RecoveryAction::Degrade);
    }

    #[test]
    fn test_give_up_at_max_retries_when_degrade_disabled() {
        let m = RecoveryManager::new(2, false, Duration::from_millis(10));
        let action = m.handle_message("connection refused", 2);
        assert_eq!(action, RecoveryAction::GiveUp);
    }

    #[test]
    fn test_terminal_always_gives_up() {
        let m = manager();
        assert_eq!(m.handle_message("permission denied", 0), RecoveryAction::GiveUp);
    }

    #[test]
    fn test_resource_always_degrades() {
        let m = manager();
        assert_eq!(m.handle_message("out of memory", 0), RecoveryAction::Degrade);
    }

    #[test]
    fn test_history_is_ring_buffered() {
        let m = RecoveryManager::new(2, true, Duration::from_millis(1));
        for _ in 0..1100 {
            m.handle_message("decomposition failed", 0);
        }
        assert_eq!(m.history().len(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_recovery_rate() {
        let m = manager();
        m.handle_message("timeout", 0);
        m.mark_recovered();
        m.handle_message("permission denied", 0);
        let stats = m.stats();
        assert_eq!(stats.total, 2);
        assert!((stats.recovery_rate() - 0.5).abs() < 1e-9);
    }
}
