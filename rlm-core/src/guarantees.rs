//! Execution-guarantees ledger.
//!
//! A thread-safe accumulator of cost, tokens, calls, elapsed time, and
//! recursion depth, checked against a fixed budget before every step the
//! orchestrator takes. Each axis has a one-shot violation latch: the first
//! time an axis crosses its limit it records exactly one [`Violation`],
//! regardless of how many times `CanProceed`/`RecordCost` are called after.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Fixed resource ceilings for one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComputeBudget {
    pub max_cost: f64,
    pub max_tokens: u64,
    pub max_calls: u32,
    pub max_duration: Duration,
    pub max_depth: u32,
}

impl Default for ComputeBudget {
    fn default() -> Self {
        Self {
            max_cost: 5.0,
            max_tokens: 500_000,
            max_calls: 200,
            max_duration: Duration::from_secs(300),
            max_depth: 5,
        }
    }
}

/// A point-in-time snapshot of ledger usage, internally consistent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub cost: f64,
    pub tokens: u64,
    pub calls: u32,
    pub elapsed: Duration,
    pub depth: u32,
    pub peak_depth: u32,
}

/// Remaining budget per axis (never negative).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RemainingBudget {
    pub cost: f64,
    pub tokens: u64,
    pub calls: u32,
    pub duration: Duration,
}

/// A resource axis that has been breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Cost,
    Tokens,
    Calls,
    Duration,
}

/// Severity of a budget violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Soft,
    Hard,
}

/// A single recorded breach. One per axis, ever, per ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Violation {
    pub axis: Axis,
    pub severity: Severity,
}

/// Suggested fallback budget when the current one is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationPlan {
    pub suggested_budget: ComputeBudget,
    pub recommendation: String,
}

#[derive(Debug)]
struct Latches {
    cost: bool,
    tokens: bool,
    calls: bool,
    duration: bool,
}

impl Default for Latches {
    fn default() -> Self {
        Self {
            cost: false,
            tokens: false,
            calls: false,
            duration: false,
        }
    }
}

struct Inner {
    budget: ComputeBudget,
    cost: f64,
    tokens: u64,
    calls: u32,
    depth: u32,
    peak_depth: u32,
    start: Instant,
    latches: Latches,
    violations: Vec<Violation>,
    last_checkpoint: Option<String>,
}

/// Thread-safe execution-guarantees ledger.
#[derive(Clone)]
pub struct GuaranteesLedger {
    inner: Arc<Mutex<Inner>>,
}

impl GuaranteesLedger {
    pub fn new(budget: ComputeBudget) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                budget,
                cost: 0.0,
                tokens: 0,
                calls: 0,
                depth: 0,
                peak_depth: 0,
                start: Instant::now(),
                latches: Latches::default(),
                violations: Vec::new(),
                last_checkpoint: None,
            })),
        }
    }

    pub fn record_cost(&self, delta: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.cost += delta;
        Self::latch_if_breached(&mut inner, Axis::Cost);
    }

    pub fn record_tokens(&self, delta: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens += delta;
        Self::latch_if_breached(&mut inner, Axis::Tokens);
    }

    pub fn record_call(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;
        Self::latch_if_breached(&mut inner, Axis::Calls);
    }

    pub fn enter_recursion(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.depth += 1;
        inner.peak_depth = inner.peak_depth.max(inner.depth);
    }

    pub fn exit_recursion(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.depth = inner.depth.saturating_sub(1);
    }

    /// False iff `cost+δ >= max_cost`, `calls+1 > max_calls`,
    /// `tokens >= max_tokens`, or `elapsed >= max_duration`.
    pub fn can_proceed(&self, predicted_cost: f64) -> bool {
        let inner = self.inner.lock().unwrap();
        let budget = &inner.budget;

        if inner.cost + predicted_cost >= budget.max_cost {
            return false;
        }
        if inner.calls + 1 > budget.max_calls {
            return false;
        }
        if inner.tokens >= budget.max_tokens {
            return false;
        }
        if inner.start.elapsed() >= budget.max_duration {
            return false;
        }
        true
    }

    pub fn must_stop(&self) -> bool {
        !self.can_proceed(0.0)
    }

    pub fn checkpoint(&self, partial_result: impl Into<String>) {
        self.inner.lock().unwrap().last_checkpoint = Some(partial_result.into());
    }

    pub fn last_checkpoint(&self) -> Option<String> {
        self.inner.lock().unwrap().last_checkpoint.clone()
    }

    pub fn usage(&self) -> Usage {
        let inner = self.inner.lock().unwrap();
        Usage {
            cost: inner.cost,
            tokens: inner.tokens,
            calls: inner.calls,
            elapsed: inner.start.elapsed(),
            depth: inner.depth,
            peak_depth: inner.peak_depth,
        }
    }

    pub fn remaining_budget(&self) -> RemainingBudget {
        let inner = self.inner.lock().unwrap();
        let budget = &inner.budget;
        RemainingBudget {
            cost: (budget.max_cost - inner.cost).max(0.0),
            tokens: budget.max_tokens.saturating_sub(inner.tokens),
            calls: budget.max_calls.saturating_sub(inner.calls),
            duration: budget.max_duration.saturating_sub(inner.start.elapsed()),
        }
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.inner.lock().unwrap().violations.clone()
    }

    /// Suggested budget at 2x each axis. Never mutates the ledger.
    pub fn on_budget_exhausted(&self) -> DegradationPlan {
        let inner = self.inner.lock().unwrap();
        let budget = inner.budget;
        DegradationPlan {
            suggested_budget: ComputeBudget {
                max_cost: budget.max_cost * 2.0,
                max_tokens: budget.max_tokens * 2,
                max_calls: budget.max_calls * 2,
                max_duration: budget.max_duration * 2,
                max_depth: budget.max_depth,
            },
            recommendation: "retry with doubled cost/token/call/duration budget".to_string(),
        }
    }

    /// Derive a child ledger scoped to the parent's remaining budget, plus a
    /// cancellation token shared with the parent.
    pub fn context(&self, parent: &GuaranteesLedger) -> (GuaranteesLedger, tokio_util::sync::CancellationToken) {
        let remaining = parent.remaining_budget();
        let inner = parent.inner.lock().unwrap();
        let child_budget = ComputeBudget {
            max_cost: remaining.cost,
            max_tokens: remaining.tokens,
            max_calls: remaining.calls,
            max_duration: remaining.duration,
            max_depth: inner.budget.max_depth,
        };
        drop(inner);
        (GuaranteesLedger::new(child_budget), tokio_util::sync::CancellationToken::new())
    }

    fn latch_if_breached(inner: &mut Inner, axis: Axis) {
        let breached = match axis {
            Axis::Cost => inner.cost >= inner.budget.max_cost,
            Axis::Tokens => inner.tokens >= inner.budget.max_tokens,
            Axis::Calls => inner.calls > inner.budget.max_calls,
            Axis::Duration => inner.start.elapsed() >= inner.budget.max_duration,
        };
        if !breached {
            return;
        }
        let latch = match axis {
            Axis::Cost => &mut inner.latches.cost,
            Axis::Tokens => &mut inner.latches.tokens,
            Axis::Calls => &mut inner.latches.calls,
            Axis::Duration => &mut inner.latches.duration,
        };
        if *latch {
            return;
        }
        *latch = true;
        inner.violations.push(Violation { axis, severity: Severity::Hard });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_budget() -> ComputeBudget {
        ComputeBudget {
            max_cost: 1.0,
            max_tokens: 100,
            max_calls: 3,
            max_duration: Duration::from_secs(60),
            max_depth: 5,
        }
    }

    #[test]
    fn test_can_proceed_false_once_cost_limit_met() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        assert!(ledger.can_proceed(0.001));
        ledger.record_cost(0.999);
        assert!(!ledger.can_proceed(0.001));
    }

    #[test]
    fn test_usage_tokens_equals_sum_of_record_tokens() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        ledger.record_tokens(10);
        ledger.record_tokens(20);
        ledger.record_tokens(5);
        assert_eq!(ledger.usage().tokens, 35);
    }

    #[test]
    fn test_remaining_plus_used_equals_max_for_cost() {
        let budget = tiny_budget();
        let ledger = GuaranteesLedger::new(budget);
        ledger.record_cost(0.4);
        let usage = ledger.usage();
        let remaining = ledger.remaining_budget();
        assert!((usage.cost + remaining.cost - budget.max_cost).abs() < 1e-9);
    }

    #[test]
    fn test_one_hard_violation_per_axis_regardless_of_overshoot_count() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        for _ in 0..10 {
            ledger.record_cost(1.0);
        }
        let violations: Vec<_> = ledger.violations().into_iter().filter(|v| v.axis == Axis::Cost).collect();
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_calls_limit() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        ledger.record_call();
        ledger.record_call();
        ledger.record_call();
        assert!(ledger.must_stop());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        assert!(ledger.last_checkpoint().is_none());
        ledger.checkpoint("partial");
        assert_eq!(ledger.last_checkpoint(), Some("partial".to_string()));
    }

    #[test]
    fn test_on_budget_exhausted_does_not_mutate() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        ledger.record_cost(0.5);
        let before = ledger.usage().cost;
        let plan = ledger.on_budget_exhausted();
        assert_eq!(ledger.usage().cost, before);
        assert!((plan.suggested_budget.max_cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_recursion_depth_tracks_peak() {
        let ledger = GuaranteesLedger::new(tiny_budget());
        ledger.enter_recursion();
        ledger.enter_recursion();
        ledger.exit_recursion();
        let usage = ledger.usage();
        assert_eq!(usage.depth, 1);
        assert_eq!(usage.peak_depth, 2);
    }
}
