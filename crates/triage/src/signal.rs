use serde::{Deserialize, Serialize};

/// Confidence band for the generator's probabilistic outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Structured signal from the episode hypothesis generator.
///
/// `hypothesis_count` semantics: 0 = no episode referenced (off-topic or
/// unclear input), 1 = exactly one, 2 = more than one (counts above two are
/// capped — ">1" is the decision-relevant fact).  `pivot_detected` is only
/// meaningful alongside a single hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpisodeHypothesisSignal {
    pub hypothesis_count: u8,
    pub confidence_band: ConfidenceBand,
    pub pivot_detected: bool,
    pub pivot_confidence_band: ConfidenceBand,
}

impl EpisodeHypothesisSignal {
    /// Single hypothesis, no pivot, high confidence throughout.
    ///
    /// This is both the "nothing suspicious" reading and the deliberate
    /// fail-open default when the model emits garbage: malformed triage
    /// output must never stall a live consultation.
    pub fn no_ambiguity() -> Self {
        Self {
            hypothesis_count: 1,
            confidence_band: ConfidenceBand::High,
            pivot_detected: false,
            pivot_confidence_band: ConfidenceBand::High,
        }
    }

    /// Signal for empty input: nothing was said, so nothing was referenced.
    pub fn empty_input() -> Self {
        Self {
            hypothesis_count: 0,
            confidence_band: ConfidenceBand::High,
            pivot_detected: false,
            pivot_confidence_band: ConfidenceBand::High,
        }
    }
}
