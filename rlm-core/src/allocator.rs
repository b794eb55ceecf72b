//! Adaptive compute allocator.
//!
//! Maps `(query text, context token count)` to a difficulty level, then to
//! an allocation of depth/tier/parallelism/timeout/cost, clamped by a
//! supplied [`ComputeBudget`].

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::guarantees::ComputeBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

struct DifficultyPattern {
    regex: &'static Regex,
    difficulty: Difficulty,
}

static SIMPLE_LOOKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^what\s+is|^who\s+is|define\b").unwrap());
static MULTI_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)and\s+then|after\s+that|first.*then|multiple\s+steps").unwrap());
static EXHAUSTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)all\b|every\b|each\b|exhaustive|entire").unwrap());
static CROSS_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)compare|relationship|across|correlate").unwrap());
static AGGREGATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)count|sum|average|total|calculate").unwrap());

static PATTERNS: LazyLock<Vec<DifficultyPattern>> = LazyLock::new(|| {
    vec![
        DifficultyPattern { regex: &SIMPLE_LOOKUP, difficulty: Difficulty::Easy },
        DifficultyPattern { regex: &AGGREGATION, difficulty: Difficulty::Medium },
        DifficultyPattern { regex: &MULTI_STEP, difficulty: Difficulty::Medium },
        DifficultyPattern { regex: &CROSS_REFERENCE, difficulty: Difficulty::Hard },
        DifficultyPattern { regex: &EXHAUSTIVE, difficulty: Difficulty::Hard },
    ]
});

/// The resolved allocation for one task, clamped by the active budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub difficulty: Difficulty,
    pub depth_budget: u32,
    pub model_tier: String,
    pub parallel_calls: u32,
    pub timeout: Duration,
    pub est_cost: f64,
    pub confidence: f64,
}

/// Allocates compute for a task given its query text and context size.
pub struct ComputeAllocator;

impl ComputeAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Decide an [`Allocation`] for `query` over `context_tokens` of
    /// externalized context, clamped by `budget`.
    pub fn allocate(&self, query: &str, context_tokens: u64, budget: &ComputeBudget) -> Allocation {
        let lower = query.to_lowercase();

        let mut pattern_level = Difficulty::Easy;
        let mut matches = 0u32;
        for pattern in PATTERNS.iter() {
            if pattern.regex.is_match(&lower) {
                matches += 1;
                pattern_level = pattern_level.max(pattern.difficulty);
            }
        }

        let word_count = query.split_whitespace().count();
        let length_bump = if word_count > 60 {
            Difficulty::Hard
        } else if word_count > 20 {
            Difficulty::Medium
        } else {
            Difficulty::Easy
        };

        let size_bump = if context_tokens >= 20_000 {
            Difficulty::Hard
        } else if context_tokens >= 4_000 {
            Difficulty::Medium
        } else {
            Difficulty::Easy
        };

        let level = pattern_level.max(length_bump).max(size_bump);
        let confidence = (0.5 + 0.15 * matches as f64).min(0.95);

        let (depth, tier, parallel, timeout, cost_fraction) = match level {
            Difficulty::Easy => (
                2u32.min(budget.max_depth),
                "fast",
                1u32,
                Duration::from_secs(10).min(budget.max_duration),
                0.1,
            ),
            Difficulty::Medium => (
                5u32.min(budget.max_depth),
                "balanced",
                2u32,
                Duration::from_secs(30).min(budget.max_duration),
                0.4,
            ),
            Difficulty::Hard => (budget.max_depth, "quality", 4u32, budget.max_duration, 0.8),
        };

        Allocation {
            difficulty: level,
            depth_budget: depth,
            model_tier: tier.to_string(),
            parallel_calls: parallel,
            timeout,
            est_cost: budget.max_cost * cost_fraction,
            confidence,
        }
    }
}

impl Default for ComputeAllocator {
    fn default() -> Self {
        Self::new()
    }
}
