use std::collections::BTreeSet;

/// Read-only projection of one episode, consumed by the question selector
/// and the rule DSL.
///
/// The state manager produces these; the selector never sees the state
/// manager itself.  `fields` holds the flat clinical key-value pairs the DSL
/// evaluates against.
#[derive(Debug, Clone, Default)]
pub struct EpisodeView {
    pub questions_answered: BTreeSet<String>,
    pub questions_satisfied: BTreeSet<String>,
    pub blocks_activated: BTreeSet<String>,
    pub blocks_completed: BTreeSet<String>,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl EpisodeView {
    /// Blocks that are activated but not yet completed, in ascending order.
    pub fn pending_blocks(&self) -> impl Iterator<Item = &String> {
        self.blocks_activated.iter().filter(|id| !self.blocks_completed.contains(*id))
    }
}
