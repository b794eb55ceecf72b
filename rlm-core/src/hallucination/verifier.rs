//! Claim verification against a backend model.
//!
//! Per claim, two backend calls pin down the epistemic budget:
//!
//! 1. `p1 = Pr(claim | evidence)` — ask with the real evidence in context.
//! 2. `p0 = Pr(claim | scrubbed)` — ask again with evidence masked.
//!
//! `ComputeBudget(p0, p1, claim.confidence)` then turns the two estimates
//! into a budget gap, and the gap (plus `p1` itself) into a [`GroundingStatus`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use regex::Regex;

use crate::budget_math::{budget_gap, observed_bits, required_bits};
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

use super::claims::ClaimExtractor;
use super::scrubber::{create_p0_prompt, EvidenceScrubber, ScrubConfig};
use super::types::{
    BudgetResult, Claim, GroundingStatus, VerificationConfig, VerificationResult,
    VerificationStats, VerificationVerdict,
};

/// Verifies claims against a real backend using the p0/p1 protocol.
pub struct ClaimVerifier {
    client: Arc<dyn LLMClient>,
    config: VerificationConfig,
    claim_extractor: ClaimExtractor,
    scrubber: EvidenceScrubber,
}

impl ClaimVerifier {
    pub fn new(client: Arc<dyn LLMClient>, config: VerificationConfig) -> Self {
        Self {
            client,
            config,
            claim_extractor: ClaimExtractor::new(),
            scrubber: EvidenceScrubber::new(ScrubConfig::default()),
        }
    }

    /// Compute the epistemic budget for one claim, given real and scrubbed
    /// evidence strings. Never propagates backend errors — they surface as
    /// `GroundingStatus::Unverifiable` on the result instead.
    pub async fn verify_claim(&self, claim: &Claim, evidence: &str) -> Result<BudgetResult> {
        let p0_prompt = create_p0_prompt(evidence, &claim.content, &self.scrubber);

        let p1 = match self.ask_probability(evidence, &claim.content).await {
            Ok(p) => p,
            Err(e) => return Ok(self.unverifiable(claim, e.to_string())),
        };
        let p0 = match self
            .ask_probability(&p0_prompt.scrub_result.scrubbed_text, &claim.content)
            .await
        {
            Ok(p) => p,
            Err(e) => return Ok(self.unverifiable(claim, e.to_string())),
        };

        Ok(self.compute_budget(claim, p0, p1))
    }

    fn compute_budget(&self, claim: &Claim, p0: f64, p1: f64) -> BudgetResult {
        let req = required_bits(p0, claim.confidence);
        let obs = observed_bits(p0, p1);
        let gap = budget_gap(req, obs);

        let status = if p1 < 0.3 || p1 < p0 / 2.0 {
            GroundingStatus::Contradicted
        } else if gap > self.config.flag_threshold {
            GroundingStatus::Unsupported
        } else if gap <= 0.0 || (p1 >= 0.75 && gap <= 1.0) {
            GroundingStatus::Grounded
        } else {
            GroundingStatus::Unsupported
        };

        BudgetResult {
            claim_id: claim.id.clone(),
            p0,
            p1,
            observed_bits: obs,
            required_bits: req,
            budget_gap: gap,
            status,
            error: None,
        }
    }

    fn unverifiable(&self, claim: &Claim, error: String) -> BudgetResult {
        BudgetResult {
            claim_id: claim.id.clone(),
            p0: 0.5,
            p1: 0.5,
            observed_bits: 0.0,
            required_bits: claim.required_bits(),
            budget_gap: 0.0,
            status: GroundingStatus::Unverifiable,
            error: Some(error),
        }
    }

    /// Ask the backend for `Pr(claim | context)` as a single scalar.
    async fn ask_probability(&self, context: &str, claim_text: &str) -> Result<f64> {
        let prompt = format!(
            "Given this context:\n\n{context}\n\n\
             Would the following claim be true? Answer with a single probability \
             estimate in [0.0, 1.0] and nothing else.\n\nClaim: \"{claim_text}\""
        );

        let request = CompletionRequest::new()
            .with_message(ChatMessage::user(&prompt))
            .with_temperature(0.0)
            .with_max_tokens(20);

        let response = self.client.complete(request).await?;
        Ok(parse_probability(&response.content).unwrap_or(0.5))
    }

    /// Verify every claim extracted from a response, in isolation (no
    /// cross-claim context).
    pub async fn verify_response(&self, response: &str, evidence: &str) -> Result<VerificationResult> {
        let start = Instant::now();
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut claims = self.claim_extractor.extract(response);
        if !self.config.verify_all_claims {
            if let Some(max) = self.config.max_claims {
                claims.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
                claims.truncate(max as usize);
            }
        }

        let mut budget_results = Vec::with_capacity(claims.len());
        for claim in &claims {
            budget_results.push(self.verify_claim(claim, evidence).await?);
        }

        let stats = VerificationStats::from_results(&budget_results);
        let verdict = if stats.contradicted_claims > 0 {
            VerificationVerdict::Unverified
        } else if stats.unsupported_claims > 0 {
            VerificationVerdict::PartiallyVerified
        } else if stats.total_claims > 0 {
            VerificationVerdict::Verified
        } else {
            VerificationVerdict::Error
        };

        Ok(VerificationResult {
            session_id,
            claims,
            budget_results,
            verdict,
            stats,
            completed_at: Utc::now(),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Verify a numbered sequence of reasoning steps. Step `i` is verified
    /// with all prior step text folded into its evidence, matching the
    /// audit's "verified with prior steps as context" rule. Valid iff no
    /// step is contradicted.
    pub async fn audit_trace(&self, steps: &[String], evidence: &str) -> Result<super::types::TraceAudit> {
        let mut trace_steps = Vec::with_capacity(steps.len());
        let mut running_context = evidence.to_string();

        for (index, step_text) in steps.iter().enumerate() {
            let claim = Claim::new(step_text.clone(), super::types::ClaimCategory::Unknown);
            let budget = self.verify_claim(&claim, &running_context).await?;
            running_context.push('\n');
            running_context.push_str(step_text);
            trace_steps.push(super::types::TraceStep { index, claim, budget });
        }

        Ok(super::types::TraceAudit::from_steps(trace_steps))
    }
}

/// Parse a bare probability (`"0.7"`, `"70%"`) from model output.
fn parse_probability(text: &str) -> Option<f64> {
    let text = text.trim().to_lowercase();

    if let Some(first_line) = text.lines().next() {
        let cleaned = first_line.trim().trim_matches(|c| c == '"' || c == '\'');
        if let Ok(p) = cleaned.parse::<f64>() {
            if (0.0..=1.0).contains(&p) {
                return Some(p);
            }
        }
        if let Some(stripped) = cleaned.strip_suffix('%') {
            if let Ok(p) = stripped.trim().parse::<f64>() {
                return Some((p / 100.0).clamp(0.0, 1.0));
            }
        }
    }

    let re = Regex::new(r"(\d+\.?\d*)\s*%?").ok()?;
    let cap = re.captures(&text)?;
    let raw: f64 = cap[1].parse().ok()?;
    let p = if raw > 1.0 { raw / 100.0 } else { raw };
    (0.0..=1.0).contains(&p).then_some(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probability() {
        assert_eq!(parse_probability("0.7"), Some(0.7));
        assert_eq!(parse_probability("70%"), Some(0.7));
        assert_eq!(parse_probability("\"0.6\""), Some(0.6));
        assert_eq!(parse_probability("0.9\n\nExplanation..."), Some(0.9));
    }

    fn verifier() -> ClaimVerifier {
        struct Dummy;
        #[async_trait::async_trait]
        impl LLMClient for Dummy {
            async fn complete(&self, _req: CompletionRequest) -> Result<crate::llm::CompletionResponse> {
                unreachable!()
            }
            async fn embed(&self, _req: crate::llm::EmbeddingRequest) -> Result<crate::llm::EmbeddingResponse> {
                unreachable!()
            }
            fn provider(&self) -> crate::llm::Provider {
                crate::llm::Provider::Anthropic
            }
            fn available_models(&self) -> Vec<crate::llm::ModelSpec> {
                vec![]
            }
        }
        ClaimVerifier::new(Arc::new(Dummy), VerificationConfig::default())
    }

    #[test]
    fn test_contradicted_when_p1_low() {
        let v = verifier();
        let claim = Claim::new("claim", super::super::types::ClaimCategory::Factual).with_confidence(0.8);
        let result = v.compute_budget(&claim, 0.5, 0.1);
        assert_eq!(result.status, GroundingStatus::Contradicted);
    }

    #[test]
    fn test_grounded_when_gap_nonpositive() {
        let v = verifier();
        let claim = Claim::new("claim", super::super::types::ClaimCategory::Factual).with_confidence(0.5);
        let result = v.compute_budget(&claim, 0.3, 0.9);
        assert_eq!(result.status, GroundingStatus::Grounded);
    }

    #[test]
    fn test_grounded_when_p1_high_and_gap_small() {
        let v = verifier();
        // Force a configuration where target keeps the gap within 1 bit while p1 >= 0.75.
        let claim = Claim::new("claim", super::super::types::ClaimCategory::Factual).with_confidence(0.75);
        let result = v.compute_budget(&claim, 0.6, 0.8);
        assert!(result.p1 >= 0.75);
        assert_eq!(result.status, GroundingStatus::Grounded);
    }

    #[test]
    fn test_unsupported_when_gap_exceeds_threshold() {
        let v = verifier();
        // A confident claim (0.99) starting from a near-zero prior (0.01)
        // needs ~6.5 bits of evidence; a modest swing to p1=0.4 supplies
        // under 2 of them, leaving a gap well past the 2.0 flag threshold.
        let claim = Claim::new("claim", super::super::types::ClaimCategory::Factual).with_confidence(0.99);
        let result = v.compute_budget(&claim, 0.01, 0.4);
        assert_eq!(result.status, GroundingStatus::Unsupported);
        assert!(result.budget_gap > 2.0);
    }
}
