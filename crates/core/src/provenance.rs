use serde::{Deserialize, Serialize};

use crate::ConversationMode;

/// Qualitative confidence band attached to stored clinical fields.
///
/// These are bands, not calibrated probabilities.  The derived `Ord` gives
/// `Low < Medium < High`, which is what the weakest-link rule for collection
/// fields relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Collapse an extractor's numeric confidence into a band.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Field-level provenance record.
///
/// Every stored clinical value carries exactly one of these; writing value
/// and provenance is a single atomic operation in the state manager.
/// Last-writer-wins — there is no provenance history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Identity of the writer (e.g. `response_parser`, `default`, `system`).
    pub source: String,
    pub confidence: ConfidenceLevel,
    /// Conversation mode active at write time.
    pub mode: ConversationMode,
}

impl Provenance {
    pub fn new(source: impl Into<String>, confidence: ConfidenceLevel, mode: ConversationMode) -> Self {
        Self { source: source.into(), confidence, mode }
    }
}

#[cfg(test)]
mod tests {
    use super::ConfidenceLevel;

    #[test]
    fn bands_order_weakest_first() {
        assert!(ConfidenceLevel::Low < ConfidenceLevel::Medium);
        assert!(ConfidenceLevel::Medium < ConfidenceLevel::High);
    }

    #[test]
    fn scores_collapse_into_bands() {
        assert_eq!(ConfidenceLevel::from_score(1.0), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.6), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::Low);
    }
}
