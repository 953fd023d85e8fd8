//! Deterministic safety assessment over the hypothesis signal.
//!
//! This is the single boundary where a probabilistic signal becomes a
//! finite control-flow decision.  It decides nothing about episode identity
//! and asks no questions — it only gates whether extracted fields may be
//! committed.

use serde::Serialize;

use crate::signal::EpisodeHypothesisSignal;

/// Finite safety decision gating extraction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeSafetyStatus {
    /// Single hypothesis, no pivot: safe to commit to the current episode.
    SafeToExtract,
    /// Multiple hypotheses detected: not safe to commit.
    AmbiguousMultiple,
    /// Single hypothesis but the patient appears to have switched problems.
    AmbiguousPivot,
}

impl EpisodeSafetyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafeToExtract => "safe_to_extract",
            Self::AmbiguousMultiple => "ambiguous_multiple",
            Self::AmbiguousPivot => "ambiguous_pivot",
        }
    }

    pub fn is_safe(self) -> bool {
        self == Self::SafeToExtract
    }
}

/// Assessment policy.  `zero_hypothesis_safe` preserves the current rule
/// that an utterance referencing no problem at all (off-topic input) is
/// treated as safe rather than soft-blocked; operators can flip it once the
/// triage model is trusted to distinguish the two.
#[derive(Debug, Clone, Copy)]
pub struct SafetyPolicy {
    pub zero_hypothesis_safe: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self { zero_hypothesis_safe: true }
    }
}

/// Collapse a hypothesis signal into a safety status.
///
/// Pure and total.  Fixed precedence: multiple hypotheses, then pivot, then
/// safe.  Confidence bands are intentionally ignored — the assessment is
/// conservative, preferring an unnecessary narrowing prompt over committing
/// data to the wrong episode.
pub fn assess_episode_safety(
    signal: &EpisodeHypothesisSignal,
    policy: SafetyPolicy,
) -> EpisodeSafetyStatus {
    if signal.hypothesis_count > 1 {
        return EpisodeSafetyStatus::AmbiguousMultiple;
    }
    if signal.pivot_detected {
        return EpisodeSafetyStatus::AmbiguousPivot;
    }
    if signal.hypothesis_count == 0 && !policy.zero_hypothesis_safe {
        return EpisodeSafetyStatus::AmbiguousPivot;
    }
    EpisodeSafetyStatus::SafeToExtract
}

#[cfg(test)]
mod tests {
    use crate::signal::{ConfidenceBand, EpisodeHypothesisSignal};

    use super::{assess_episode_safety, EpisodeSafetyStatus, SafetyPolicy};

    fn signal(count: u8, pivot: bool) -> EpisodeHypothesisSignal {
        EpisodeHypothesisSignal {
            hypothesis_count: count,
            confidence_band: ConfidenceBand::Low,
            pivot_detected: pivot,
            pivot_confidence_band: ConfidenceBand::Low,
        }
    }

    #[test]
    fn single_hypothesis_without_pivot_is_safe() {
        assert_eq!(
            assess_episode_safety(&signal(1, false), SafetyPolicy::default()),
            EpisodeSafetyStatus::SafeToExtract
        );
    }

    #[test]
    fn multiple_hypotheses_win_over_pivot() {
        // Safety monotonicity: count > 1 is MULTIPLE regardless of pivot.
        assert_eq!(
            assess_episode_safety(&signal(2, true), SafetyPolicy::default()),
            EpisodeSafetyStatus::AmbiguousMultiple
        );
        assert_eq!(
            assess_episode_safety(&signal(2, false), SafetyPolicy::default()),
            EpisodeSafetyStatus::AmbiguousMultiple
        );
    }

    #[test]
    fn pivot_with_single_hypothesis_is_ambiguous() {
        assert_eq!(
            assess_episode_safety(&signal(1, true), SafetyPolicy::default()),
            EpisodeSafetyStatus::AmbiguousPivot
        );
    }

    #[test]
    fn zero_hypotheses_follow_the_policy_knob() {
        assert_eq!(
            assess_episode_safety(&signal(0, false), SafetyPolicy::default()),
            EpisodeSafetyStatus::SafeToExtract
        );
        let strict = SafetyPolicy { zero_hypothesis_safe: false };
        assert_eq!(
            assess_episode_safety(&signal(0, false), strict),
            EpisodeSafetyStatus::AmbiguousPivot
        );
    }

    #[test]
    fn confidence_bands_are_ignored() {
        let mut low = signal(1, false);
        low.confidence_band = ConfidenceBand::Low;
        let mut high = signal(1, false);
        high.confidence_band = ConfidenceBand::High;
        assert_eq!(
            assess_episode_safety(&low, SafetyPolicy::default()),
            assess_episode_safety(&high, SafetyPolicy::default())
        );
    }
}
