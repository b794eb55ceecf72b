//! Mode selection: Direct completion vs RLM (externalized-context) execution.

use serde::{Deserialize, Serialize};

use crate::classifier::{Classification, TaskType};
use crate::context::ContextSource;

/// How context is handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Direct,
    Rlm,
}

/// Caller-supplied override of the automatic decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Override {
    None,
    ForceDirect,
    ForceRlm,
}

/// The resolved mode plus a human-readable justification for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeDecision {
    pub mode: Mode,
    pub reason: String,
}

impl ModeDecision {
    fn new(mode: Mode, reason: impl Into<String>) -> Self {
        Self { mode, reason: reason.into() }
    }
}

/// Thresholds governing the size-based and classifier-based branches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeSelectorConfig {
    pub accept_threshold: f64,
    pub min_computational: u64,
    pub min_analytical: u64,
    pub min_rlm: u64,
    pub min_llm_fallback: f64,
}

impl Default for ModeSelectorConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.7,
            min_computational: 500,
            min_analytical: 8_000,
            min_rlm: 4_000,
            min_llm_fallback: 0.4,
        }
    }
}

/// Chooses Direct vs RLM mode for a task.
pub struct ModeSelector {
    config: ModeSelectorConfig,
}

impl ModeSelector {
    pub fn new(config: ModeSelectorConfig) -> Self {
        Self { config }
    }

    /// `has_interpreter` stands in for whether an interpreter/externalizer
    /// is actually wired up for this call; `classification` and
    /// `retry_classification` are the stage-1 and (if run) stage-2 results.
    pub fn select(
        &self,
        total_tokens: u64,
        contexts: &[ContextSource],
        classification: Option<&Classification>,
        retry_classification: Option<&Classification>,
        has_interpreter: bool,
        override_mode: Override,
    ) -> ModeDecision {
        match override_mode {
            Override::ForceRlm => {
                return if has_interpreter {
                    ModeDecision::new(Mode::Rlm, "override=RLM")
                } else {
                    ModeDecision::new(Mode::Direct, "override=RLM but no interpreter available, falling back")
                };
            }
            Override::ForceDirect => return ModeDecision::new(Mode::Direct, "override=Direct"),
            Override::None => {}
        }

        if contexts.is_empty() && !has_interpreter {
            return ModeDecision::new(Mode::Direct, "no contexts and no interpreter");
        }

        if let Some(c) = classification {
            if c.confidence >= self.config.accept_threshold {
                return self.decide_from_classification(c.task_type, total_tokens);
            }

            if c.confidence >= self.config.min_llm_fallback {
                if let Some(retry) = retry_classification {
                    if retry.confidence >= self.config.accept_threshold {
                        return self.decide_from_classification(retry.task_type, total_tokens);
                    }
                }
            }
        }

        if total_tokens >= self.config.min_rlm {
            ModeDecision::new(Mode::Rlm, format!("size-based: tokens {total_tokens} >= min_rlm {}", self.config.min_rlm))
        } else {
            ModeDecision::new(Mode::Direct, format!("size-based: tokens {total_tokens} < min_rlm {}", self.config.min_rlm))
        }
    }

    fn decide_from_classification(&self, task_type: TaskType, total_tokens: u64) -> ModeDecision {
        match task_type {
            TaskType::Computational if total_tokens >= self.config.min_computational => {
                ModeDecision::new(Mode::Rlm, format!("Computational with {total_tokens} tokens >= min_computational"))
            }
            TaskType::Computational => {
                ModeDecision::new(Mode::Direct, format!("Computational but only {total_tokens} tokens"))
            }
            TaskType::Retrieval => ModeDecision::new(Mode::Direct, "Retrieval always resolves Direct"),
            TaskType::Analytical if total_tokens >= self.config.min_analytical => {
                ModeDecision::new(Mode::Rlm, format!("Analytical with {total_tokens} tokens >= min_analytical"))
            }
            TaskType::Analytical => {
                ModeDecision::new(Mode::Direct, format!("Analytical but only {total_tokens} tokens"))
            }
            TaskType::Transformational => {
                ModeDecision::new(Mode::Direct, "Transformational classification, defaulting Direct")
            }
            TaskType::Unknown => ModeDecision::new(Mode::Direct, "Unknown classification, defaulting Direct"),
        }
    }
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self::new(ModeSelectorConfig::default())
    }
}
