//! Pure information-theoretic budget math.
//!
//! Every probability is clamped to `[ε, 1−ε]` with `ε = 10⁻¹⁰` before any
//! log is taken, so these functions never produce infinities or NaNs for
//! inputs in `[0, 1]`. Nothing here touches I/O or shared state.

const EPSILON: f64 = 1e-10;

fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// Bernoulli KL divergence `D_KL(P || Q)` in nats.
pub fn kl_divergence_nats(p: f64, q: f64) -> f64 {
    let p = clamp_prob(p);
    let q = clamp_prob(q);
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

/// Bernoulli KL divergence `D_KL(P || Q)` in bits.
pub fn kl_divergence_bits(p: f64, q: f64) -> f64 {
    kl_divergence_nats(p, q) / std::f64::consts::LN_2
}

/// Binary entropy `H(p)` in nats.
pub fn binary_entropy_nats(p: f64) -> f64 {
    let p = clamp_prob(p);
    -p * p.ln() - (1.0 - p) * (1.0 - p).ln()
}

/// Binary entropy `H(p)` in bits.
pub fn binary_entropy_bits(p: f64) -> f64 {
    binary_entropy_nats(p) / std::f64::consts::LN_2
}

/// The evidence budget required to lift belief from `p0` to `target`.
///
/// `required_bits(p0, target) = KL(target ‖ p0)`.
pub fn required_bits(p0: f64, target: f64) -> f64 {
    kl_divergence_bits(target, p0).max(0.0)
}

/// The evidence actually provided by moving belief from `p0` to `p1`.
///
/// `observed_bits(p0, p1) = KL(p1 ‖ p0)`.
pub fn observed_bits(p0: f64, p1: f64) -> f64 {
    kl_divergence_bits(p1, p0).max(0.0)
}

/// `budget_gap = required_bits − observed_bits`.
///
/// Positive means the claim is under-supported by the evidence seen so far.
pub fn budget_gap(required: f64, observed: f64) -> f64 {
    required - observed
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Maps a budget gap to a trust score in `(0, 1)` via `sigmoid(-gap)`.
///
/// A gap of zero (budget exactly met) maps to a trust of 0.5.
pub fn bits_to_trust(gap: f64) -> f64 {
    sigmoid(-gap)
}

/// Inverse of [`bits_to_trust`]: recovers the gap implied by a trust score.
pub fn trust_to_bits(trust: f64) -> f64 {
    let t = clamp_prob(trust);
    -(t / (1.0 - t)).ln()
}

/// A budget gap known only up to an interval, from uncertain `p0`/`p1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapInterval {
    pub gap_min: f64,
    pub gap_max: f64,
}

impl GapInterval {
    /// Conservative: only flag as under-supported if the *whole* interval
    /// says so — i.e. even the most generous corner still leaves a gap.
    pub fn should_flag(&self) -> bool {
        self.gap_min > 0.0
    }
}

/// Interval-arithmetic budget gap over `[p0_min, p0_max] × [p1_min, p1_max]`.
///
/// Evaluates `budget_gap` at all four corners of the box and returns the
/// min/max; flagging on the result is conservative (only if `gap_min > 0`).
pub fn budget_gap_interval(
    p0_min: f64,
    p0_max: f64,
    p1_min: f64,
    p1_max: f64,
    target: f64,
) -> GapInterval {
    let corners = [
        (p0_min, p1_min),
        (p0_min, p1_max),
        (p0_max, p1_min),
        (p0_max, p1_max),
    ];

    let mut gap_min = f64::INFINITY;
    let mut gap_max = f64::NEG_INFINITY;

    for (p0, p1) in corners {
        let gap = budget_gap(required_bits(p0, target), observed_bits(p0, p1));
        gap_min = gap_min.min(gap);
        gap_max = gap_max.max(gap);
    }

    GapInterval { gap_min, gap_max }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_kl_same_distribution_is_zero() {
        assert!(kl_divergence_bits(0.5, 0.5).abs() < EPS);
        assert!(kl_divergence_bits(0.8, 0.8).abs() < EPS);
    }

    #[test]
    fn test_kl_nonnegative() {
        assert!(kl_divergence_bits(0.3, 0.7) >= 0.0);
        assert!(kl_divergence_bits(0.9, 0.1) >= 0.0);
    }

    #[test]
    fn test_entropy_nonnegative_and_max_at_half() {
        assert!(binary_entropy_bits(0.1) >= 0.0);
        assert!((binary_entropy_bits(0.5) - 1.0).abs() < 0.01);
        assert!((binary_entropy_nats(0.5) - std::f64::consts::LN_2).abs() < 0.01);
    }

    #[test]
    fn test_bits_to_trust_zero_gap() {
        assert!((bits_to_trust(0.0) - 0.5).abs() < EPS);
    }

    #[test]
    fn test_trust_bits_roundtrip() {
        for gap in [-3.0, -1.0, 0.0, 0.5, 2.0, 5.0] {
            let trust = bits_to_trust(gap);
            let recovered = trust_to_bits(trust);
            assert!((recovered - gap).abs() < 1e-6, "gap={gap} recovered={recovered}");
        }
    }

    #[test]
    fn test_grounded_scenario() {
        // p0=0.3, p1=0.9, target=0.8 -> gap < 0, status would be Grounded.
        let req = required_bits(0.3, 0.8);
        let obs = observed_bits(0.3, 0.9);
        let gap = budget_gap(req, obs);
        assert!(gap < 0.0);
    }

    #[test]
    fn test_gap_interval_conservative_flag() {
        let interval = budget_gap_interval(0.1, 0.5, 0.6, 0.95, 0.8);
        assert!(interval.gap_min <= interval.gap_max);
        // Flag only when even the best corner still has a positive gap.
        assert_eq!(interval.should_flag(), interval.gap_min > 0.0);
    }
}
