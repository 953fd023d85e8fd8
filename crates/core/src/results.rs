use serde::Serialize;

use crate::{Command, ConsultationState, ConversationMode};

/// Turn-level metadata surfaced alongside every successful turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnMetadata {
    pub turn_count: u64,
    pub current_episode_id: u32,
    pub consultation_id: String,
    pub conversation_mode: ConversationMode,
    /// True when this turn changed the conversation mode — transports may
    /// want to surface that to the operator.
    pub mode_changed: bool,
}

/// Successful turn processing result for `Start` and `UserTurn`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// Text to present to the patient (question or message).
    pub system_output: String,
    /// Opaque state envelope; the transport must not inspect it.
    pub state: ConsultationState,
    /// Diagnostic payload: routing decisions, parser outcome, state view.
    pub debug: serde_json::Value,
    pub turn_metadata: TurnMetadata,
    pub consultation_complete: bool,
}

/// Final outputs after consultation completion.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub json_path: String,
    pub summary_path: String,
    pub json_filename: String,
    pub summary_filename: String,
    pub consultation_id: String,
    pub total_episodes: usize,
}

/// Command rejected by the dialogue manager (invalid lifecycle transition or
/// corrupt state envelope).  No state was changed.
#[derive(Debug, Clone, Serialize)]
pub struct IllegalCommand {
    pub reason: String,
    pub command_type: &'static str,
}

impl IllegalCommand {
    pub fn rejecting(command: &Command, reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), command_type: command.name() }
    }
}

/// Tagged result of `handle(command)` — the only return surface of the
/// dialogue manager.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    Turn(TurnResult),
    Final(FinalReport),
    Illegal(IllegalCommand),
}

impl CommandResult {
    pub fn as_turn(&self) -> Option<&TurnResult> {
        match self {
            Self::Turn(turn) => Some(turn),
            _ => None,
        }
    }

    pub fn as_final(&self) -> Option<&FinalReport> {
        match self {
            Self::Final(report) => Some(report),
            _ => None,
        }
    }

    pub fn as_illegal(&self) -> Option<&IllegalCommand> {
        match self {
            Self::Illegal(illegal) => Some(illegal),
            _ => None,
        }
    }
}
