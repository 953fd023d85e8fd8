use serde::{Deserialize, Serialize};

/// Conversation mode for the multi-episode intake flow.
///
/// Exactly one mode is active per turn.  Transitions are explicit and
/// authored only by the dialogue manager; `Clarification` in particular is
/// sticky and can never be exited by timeout or heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Open-ended questioning, no confirmed episode focus yet.
    Discovery,
    /// Active episode disambiguation; sticky until explicit resolution.
    Clarification,
    /// Deterministic clinical questioning within a confirmed episode.
    Extraction,
}

impl ConversationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Clarification => "clarification",
            Self::Extraction => "extraction",
        }
    }

    /// Parse the serialized form.  Returns `None` for anything outside the
    /// closed set so callers can fail fast on corrupted snapshots.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "discovery" => Some(Self::Discovery),
            "clarification" => Some(Self::Clarification),
            "extraction" => Some(Self::Extraction),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConversationMode;

    #[test]
    fn round_trips_through_strings() {
        for mode in [
            ConversationMode::Discovery,
            ConversationMode::Clarification,
            ConversationMode::Extraction,
        ] {
            assert_eq!(ConversationMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ConversationMode::parse("Extraction"), None);
    }
}
