use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a clarification exchange.  Settable exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClarificationResolution {
    Confirmed,
    Negated,
    Forced,
    Unresolvable,
}

/// One clarification exchange, snapshotted at the time of asking.
///
/// `rendered_text` carries the exact question text shown to the patient —
/// it is what a later extraction replay reconstructs the transcript from.
/// Templates may change; the rendered text never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationTurn {
    pub template_id: String,
    /// Raw patient response, verbatim.
    pub user_text: String,
    /// Whether this turn is eligible for extraction replay.
    pub replayable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_text: Option<String>,
}

/// Auditable buffer of clarification turns.
///
/// Exists only while the conversation is in clarification mode and is
/// cleared atomically on exit, whatever the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClarificationContext {
    pub transcript: Vec<ClarificationTurn>,
    pub entry_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_status: Option<ClarificationResolution>,
}

impl ClarificationContext {
    pub fn append(&mut self, turn: ClarificationTurn) {
        self.transcript.push(turn);
        self.entry_count = self.transcript.len();
    }

    /// Record the outcome.  Write-once: a second call is a caller bug.
    pub fn set_resolution(&mut self, resolution: ClarificationResolution) -> Result<()> {
        if let Some(existing) = self.resolution_status {
            bail!("clarification resolution already set to {existing:?}");
        }
        self.resolution_status = Some(resolution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_count_tracks_transcript_length() {
        let mut context = ClarificationContext::default();
        context.append(ClarificationTurn {
            template_id: "clarify_location".into(),
            user_text: "the right side".into(),
            replayable: true,
            rendered_text: Some("Where exactly was the pain?".into()),
        });
        assert_eq!(context.entry_count, 1);
    }

    #[test]
    fn resolution_is_write_once() {
        let mut context = ClarificationContext::default();
        context.set_resolution(ClarificationResolution::Confirmed).unwrap();
        assert!(context.set_resolution(ClarificationResolution::Negated).is_err());
        assert_eq!(context.resolution_status, Some(ClarificationResolution::Confirmed));
    }

    #[test]
    fn turns_without_rendered_text_deserialize() {
        let turn: ClarificationTurn = serde_json::from_value(serde_json::json!({
            "template_id": "clarify_onset",
            "user_text": "last week",
            "replayable": false
        }))
        .unwrap();
        assert!(turn.rendered_text.is_none());
    }
}
