//! Trust scoring: a deterministic, bounded function of an agent's
//! interaction history, plus time decay for inactivity.

/// Computes the trust score for an agent with the given lifetime counters.
///
/// Returns 0.50 when the agent has no completed interactions at all —
/// the same prior a freshly registered agent starts with.
pub fn score(successful: u64, failed: u64, disputes: u64) -> f64 {
    let total = successful + failed + disputes;
    if total == 0 {
        return 0.50;
    }
    let total_f = total as f64;
    let raw = successful as f64 / total_f;
    let adjusted = successful as f64 / (successful as f64 + failed as f64 + 3.0 * disputes as f64);
    let activity = (1.0f64).min((total_f + 1.0).log10() / 3.0);
    let raw_score = 0.7 * adjusted + 0.2 * raw + 0.1 * activity;
    (raw_score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Applies inactivity decay to `last_score`. Within the 7-day grace period
/// the score is unchanged; beyond it, decays toward an asymptote of 0.5.
pub fn apply_decay(last_score: f64, days_inactive: f64) -> f64 {
    if days_inactive <= 7.0 {
        return last_score;
    }
    let factor = 0.5 + 0.5 * 0.5f64.powf((days_inactive - 7.0) / 60.0);
    last_score * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interactions_is_neutral() {
        assert_eq!(score(0, 0, 0), 0.50);
    }

    #[test]
    fn score_is_bounded() {
        for successful in 0..20u64 {
            for failed in 0..20u64 {
                for disputes in 0..5u64 {
                    let s = score(successful, failed, disputes);
                    assert!((0.0..=1.0).contains(&s), "{s} out of bounds");
                }
            }
        }
    }

    #[test]
    fn all_successful_scores_higher_than_all_failed() {
        let good = score(10, 0, 0);
        let bad = score(0, 10, 0);
        assert!(good > bad);
    }

    #[test]
    fn disputes_penalize_more_than_failures() {
        let with_failures = score(7, 3, 0);
        let with_disputes = score(7, 0, 3);
        assert!(with_disputes < with_failures);
    }

    #[test]
    fn decay_is_noop_within_grace_period() {
        assert_eq!(apply_decay(0.8, 7.0), 0.8);
        assert_eq!(apply_decay(0.8, 0.0), 0.8);
    }

    #[test]
    fn decay_is_monotone_non_increasing_past_grace() {
        let mut prev = apply_decay(0.9, 7.0);
        for days in [7.0, 10.0, 30.0, 60.0, 120.0, 1000.0] {
            let next = apply_decay(0.9, days);
            assert!(next <= prev + 1e-9);
            prev = next;
        }
    }

    #[test]
    fn decay_asymptotes_toward_half_last_score() {
        let decayed = apply_decay(0.9, 100_000.0);
        assert!((decayed - 0.45).abs() < 1e-6);
    }
}
