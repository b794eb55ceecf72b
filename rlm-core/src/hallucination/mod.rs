//! Hallucination detection via information-theoretic grounding checks.
//!
//! For each claim `C` backed by evidence `E`:
//!
//! 1. Ask the backend for `p1 = Pr(C | E)`.
//! 2. Ask again for `p0 = Pr(C | scrubbed E)` — evidence masked.
//! 3. `ComputeBudget` turns `(p0, p1, C.confidence)` into a budget gap via
//!    [`crate::budget_math`].
//! 4. The gap (and `p1` itself) decide [`GroundingStatus`]: `Contradicted`
//!    if `p1` is low or collapsed relative to `p0`; `Grounded` if the gap is
//!    covered (or `p1` is high and the gap is small); `Unsupported`
//!    otherwise; `Unverifiable` if the backend call failed.
//!
//! A reasoning trace is a numbered sequence of steps, each verified with
//! prior steps folded into its evidence; the trace is valid iff no step is
//! `Contradicted`.

pub mod claims;
pub mod scrubber;
pub mod types;
pub mod verifier;

pub use claims::ClaimExtractor;
pub use scrubber::{create_p0_prompt, EvidenceScrubber, P0Prompt, ScrubConfig, ScrubResult, ScrubTarget, ScrubbedItem};
pub use types::{
    BudgetResult, Claim, ClaimCategory, ClaimId, GroundingStatus, TraceAudit, TraceStep,
    VerificationConfig, VerificationResult, VerificationStats, VerificationVerdict,
};
pub use verifier::ClaimVerifier;

/// Heuristic, backend-free risk screen, useful before paying for a real
/// verification pass.
pub fn quick_hallucination_check(response: &str) -> f64 {
    let mut risk: f64 = 0.0;
    let lower = response.to_lowercase();

    let extractor = ClaimExtractor::new();
    let claims = extractor.extract(response);

    let high_confidence_count = claims.iter().filter(|c| c.confidence > 0.7).count();
    if high_confidence_count > 0 {
        risk += 0.3;
    }

    const UNIVERSAL: &[&str] = &["always", "never", "all", "none", "every", "guaranteed"];
    const HEDGE: &[&str] = &["might", "could", "possibly", "perhaps", "likely", "probably"];
    let has_universal = UNIVERSAL.iter().any(|w| lower.contains(w));
    let has_hedge = HEDGE.iter().any(|w| lower.contains(w));
    if has_universal && !has_hedge {
        risk += 0.2;
    }

    let number_re = regex::Regex::new(r"\b\d{3,}\b").unwrap();
    if number_re.find_iter(&lower).count() > 2 {
        risk += 0.15;
    }

    if response.split('.').filter(|s| s.len() > 200).count() > 1 {
        risk += 0.1;
    }

    risk.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_hallucination_check() {
        let safe = "The function might return null in some cases.";
        assert!(quick_hallucination_check(safe) < 0.3);

        let risky = "This function always returns exactly 42. It never fails under any circumstances.";
        assert!(quick_hallucination_check(risky) > 0.1);
    }
}
