//! Core types for hallucination detection.
//!
//! Implements information-theoretic grounding checks based on the
//! Strawberry/Pythea methodology: a claim is only believed if the evidence
//! behind it carries at least as many bits as the claim's specificity
//! demands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An atomic, independently-verifiable assertion extracted from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub content: String,
    pub source_span: Option<(usize, usize)>,
    pub category: ClaimCategory,
    /// How specific/confident the claim reads, in `[0, 1]`. Drives
    /// `required_bits` — a more specific claim needs more evidence.
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Claim {
    pub fn new(content: impl Into<String>, category: ClaimCategory) -> Self {
        Self {
            id: ClaimId::new(),
            content: content.into(),
            source_span: None,
            category,
            confidence: 0.5,
            extracted_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.source_span = Some((start, end));
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Evidence bits required to justify this claim, `-log2(1 - confidence)`.
    pub fn required_bits(&self) -> f64 {
        let c = self.confidence.clamp(0.01, 0.999);
        -(1.0 - c).log2()
    }
}

/// Category of a claim, used only to route claim-extraction heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimCategory {
    Factual,
    CodeBehavior,
    Relational,
    Numerical,
    Temporal,
    UserIntent,
    MetaReasoning,
    Unknown,
}

impl std::fmt::Display for ClaimCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Factual => write!(f, "factual"),
            Self::CodeBehavior => write!(f, "code_behavior"),
            Self::Relational => write!(f, "relational"),
            Self::Numerical => write!(f, "numerical"),
            Self::Temporal => write!(f, "temporal"),
            Self::UserIntent => write!(f, "user_intent"),
            Self::MetaReasoning => write!(f, "meta_reasoning"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Grounding verdict for a single claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingStatus {
    /// Well-supported: `gap <= 0`, or `p1 >= 0.75` with `gap <= 1`.
    Grounded,
    /// Evidence is insufficient for the claim's specificity.
    Unsupported,
    /// Evidence actively contradicts the claim.
    Contradicted,
    /// Backend call errored or timed out; no verdict could be reached.
    Unverifiable,
}

impl std::fmt::Display for GroundingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grounded => write!(f, "grounded"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Contradicted => write!(f, "contradicted"),
            Self::Unverifiable => write!(f, "unverifiable"),
        }
    }
}

/// Result of computing the epistemic budget for one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetResult {
    pub claim_id: ClaimId,
    /// `Pr(claim | scrubbed evidence)`.
    pub p0: f64,
    /// `Pr(claim | real evidence)`.
    pub p1: f64,
    pub observed_bits: f64,
    pub required_bits: f64,
    /// `required_bits - observed_bits`; positive means under-supported.
    pub budget_gap: f64,
    pub status: GroundingStatus,
    /// Present only when `status == Unverifiable`.
    pub error: Option<String>,
}

impl BudgetResult {
    pub fn is_grounded(&self) -> bool {
        self.status == GroundingStatus::Grounded
    }
}

/// One step of a verified reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub claim: Claim,
    pub budget: BudgetResult,
}

/// Verdict for an entire trace: valid unless some step was contradicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceAudit {
    pub steps: Vec<TraceStep>,
    pub valid: bool,
}

impl TraceAudit {
    pub fn from_steps(steps: Vec<TraceStep>) -> Self {
        let valid = !steps
            .iter()
            .any(|s| s.budget.status == GroundingStatus::Contradicted);
        Self { steps, valid }
    }
}

/// Overall verdict for a multi-claim verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationVerdict {
    Verified,
    PartiallyVerified,
    Unverified,
    Error,
}

impl std::fmt::Display for VerificationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::PartiallyVerified => write!(f, "partially_verified"),
            Self::Unverified => write!(f, "unverified"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Aggregate statistics over a batch of claim verifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total_claims: u32,
    pub grounded_claims: u32,
    pub unsupported_claims: u32,
    pub contradicted_claims: u32,
    pub unverifiable_claims: u32,
    pub avg_budget_gap: f64,
    pub max_budget_gap: f64,
}

impl VerificationStats {
    pub fn hallucination_rate(&self) -> f64 {
        if self.total_claims == 0 {
            0.0
        } else {
            (self.unsupported_claims + self.contradicted_claims) as f64 / self.total_claims as f64
        }
    }

    pub fn from_results(results: &[BudgetResult]) -> Self {
        let mut stats = Self {
            total_claims: results.len() as u32,
            ..Default::default()
        };

        let mut total_gap = 0.0;
        let mut max_gap = f64::NEG_INFINITY;

        for result in results {
            match result.status {
                GroundingStatus::Grounded => stats.grounded_claims += 1,
                GroundingStatus::Unsupported => stats.unsupported_claims += 1,
                GroundingStatus::Contradicted => stats.contradicted_claims += 1,
                GroundingStatus::Unverifiable => stats.unverifiable_claims += 1,
            }
            total_gap += result.budget_gap;
            max_gap = max_gap.max(result.budget_gap);
        }

        if !results.is_empty() {
            stats.avg_budget_gap = total_gap / results.len() as f64;
            stats.max_budget_gap = max_gap;
        }

        stats
    }
}

/// Full result of verifying every claim in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub session_id: String,
    pub claims: Vec<Claim>,
    pub budget_results: Vec<BudgetResult>,
    pub verdict: VerificationVerdict,
    pub stats: VerificationStats,
    pub completed_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Tunables for claim verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Budget gap above which a claim is flagged `Unsupported` (absent a
    /// contradiction). Spec default: 2.0 bits.
    pub flag_threshold: f64,
    pub max_latency_ms: u64,
    pub verify_all_claims: bool,
    pub max_claims: Option<u32>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            flag_threshold: 2.0,
            max_latency_ms: 2000,
            verify_all_claims: false,
            max_claims: Some(10),
        }
    }
}

impl VerificationConfig {
    pub fn fast() -> Self {
        Self {
            flag_threshold: 3.0,
            max_latency_ms: 500,
            verify_all_claims: false,
            max_claims: Some(5),
        }
    }

    pub fn thorough() -> Self {
        Self {
            flag_threshold: 1.0,
            max_latency_ms: 5000,
            verify_all_claims: true,
            max_claims: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_required_bits_increases_with_confidence() {
        let low = Claim::new("x", ClaimCategory::Factual).with_confidence(0.5);
        let high = Claim::new("x", ClaimCategory::Factual).with_confidence(0.95);
        assert!(high.required_bits() > low.required_bits());
    }

    #[test]
    fn test_verification_stats_hallucination_rate() {
        let results = vec![
            BudgetResult {
                claim_id: ClaimId::new(),
                p0: 0.5,
                p1: 0.9,
                observed_bits: 1.0,
                required_bits: 0.5,
                budget_gap: -0.5,
                status: GroundingStatus::Grounded,
                error: None,
            },
            BudgetResult {
                claim_id: ClaimId::new(),
                p0: 0.5,
                p1: 0.2,
                observed_bits: 0.1,
                required_bits: 3.0,
                budget_gap: 2.9,
                status: GroundingStatus::Unsupported,
                error: None,
            },
        ];
        let stats = VerificationStats::from_results(&results);
        assert_eq!(stats.total_claims, 2);
        assert!((stats.hallucination_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_trace_audit_invalid_on_contradiction() {
        let good = TraceStep {
            index: 0,
            claim: Claim::new("a", ClaimCategory::Factual),
            budget: BudgetResult {
                claim_id: ClaimId::new(),
                p0: 0.5,
                p1: 0.9,
                observed_bits: 1.0,
                required_bits: 0.5,
                budget_gap: -0.5,
                status: GroundingStatus::Grounded,
                error: None,
            },
        };
        let bad = TraceStep {
            index: 1,
            claim: Claim::new("b", ClaimCategory::Factual),
            budget: BudgetResult {
                claim_id: ClaimId::new(),
                p0: 0.5,
                p1: 0.1,
                observed_bits: 0.0,
                required_bits: 1.0,
                budget_gap: 1.0,
                status: GroundingStatus::Contradicted,
                error: None,
            },
        };
        let audit = TraceAudit::from_steps(vec![good, bad]);
        assert!(!audit.valid);
    }
}
