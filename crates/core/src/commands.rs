use serde::{Deserialize, Serialize};

/// Opaque value object wrapping a canonical state snapshot.
///
/// This is a sealed envelope, not a model: no code outside the dialogue
/// manager and state manager inspects the inner JSON.  The transport layer
/// round-trips it verbatim between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsultationState {
    data: serde_json::Value,
}

impl ConsultationState {
    pub fn from_json(data: serde_json::Value) -> Self {
        Self { data }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.data.clone()
    }

    /// The ONLY permitted accessor beyond serialization: operational
    /// metadata for turn validation.  Additions require an interface review.
    pub fn turn_count(&self) -> u64 {
        self.data.get("turn_count").and_then(serde_json::Value::as_u64).unwrap_or(0)
    }
}

/// Commands are the only public interface to the dialogue manager.
/// No direct method calls, no state inspection — commands only.
#[derive(Debug, Clone)]
pub enum Command {
    /// Initialize a new consultation; the manager creates the initial state.
    Start,
    /// Process user input for the current turn against an existing state.
    UserTurn { user_input: String, state: ConsultationState },
    /// Generate final outputs; only legal once the consultation is complete.
    Finalize { state: ConsultationState },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::UserTurn { .. } => "UserTurn",
            Self::Finalize { .. } => "Finalize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConsultationState;

    #[test]
    fn envelope_serializes_transparently() {
        let state = ConsultationState::from_json(serde_json::json!({"turn_count": 4}));
        let wire = serde_json::to_value(&state).unwrap();
        assert_eq!(wire, serde_json::json!({"turn_count": 4}));

        let back: ConsultationState = serde_json::from_value(wire).unwrap();
        assert_eq!(back.turn_count(), 4);
    }

    #[test]
    fn missing_turn_count_reads_as_zero() {
        let state = ConsultationState::from_json(serde_json::json!({}));
        assert_eq!(state.turn_count(), 0);
    }
}
