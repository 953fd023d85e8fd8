use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use iris_core::{
    ConfidenceLevel, ConversationMode, EpisodeView, Provenance, ValueEnvelope,
};

use crate::clarification::{ClarificationContext, ClarificationResolution, ClarificationTurn};
use crate::model::ClinicalDataModel;

/// Closed set of shared collection fields.  Collections are stored as atomic
/// arrays and their confidence only ever degrades on update (weakest-link).
pub const COLLECTION_FIELDS: &[&str] =
    &["medications", "allergies", "past_medical_history", "family_history"];

/// One presenting problem within the consultation.
///
/// Episode ids are 1-indexed, user-facing, assigned monotonically, and never
/// reused.  They are NOT list indexes — always resolve through the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: u32,
    pub timestamp_started: DateTime<Utc>,
    pub timestamp_last_updated: DateTime<Utc>,
    #[serde(default)]
    pub questions_answered: BTreeSet<String>,
    #[serde(default)]
    pub questions_satisfied: BTreeSet<String>,
    #[serde(default)]
    pub follow_up_blocks_activated: BTreeSet<String>,
    #[serde(default)]
    pub follow_up_blocks_completed: BTreeSet<String>,
    /// Flat clinical key-value pairs, serialized inline with the episode.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Episode {
    fn new(episode_id: u32) -> Self {
        let now = Utc::now();
        Self {
            episode_id,
            timestamp_started: now,
            timestamp_last_updated: now,
            questions_answered: BTreeSet::new(),
            questions_satisfied: BTreeSet::new(),
            follow_up_blocks_activated: BTreeSet::new(),
            follow_up_blocks_completed: BTreeSet::new(),
            fields: Map::new(),
        }
    }

    /// An episode with no clinical fields is "empty" — retained in the
    /// canonical snapshot, filtered from clinical exports.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One recorded dialogue exchange within an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueRecord {
    pub question_id: String,
    pub question_text: String,
    pub patient_response: String,
    pub extracted_fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Multi-episode consultation state container.
///
/// Instances are ephemeral: rehydrated from the previous canonical snapshot
/// at turn start, mutated during the turn, and serialized back at turn end.
/// Turn-level envelope fields (turn counter, pending question, flags) are
/// owned by the dialogue manager and never stored here.
#[derive(Debug, Clone)]
pub struct StateManager {
    episodes: Vec<Episode>,
    shared_data: Map<String, Value>,
    episode_provenance: BTreeMap<u32, BTreeMap<String, Provenance>>,
    shared_provenance: BTreeMap<String, Provenance>,
    dialogue_history: BTreeMap<u32, Vec<DialogueRecord>>,
    conversation_mode: ConversationMode,
    clarification_context: Option<ClarificationContext>,
    next_episode_id: u32,
}

impl StateManager {
    pub fn new(model: &ClinicalDataModel) -> Self {
        Self {
            episodes: Vec::new(),
            shared_data: model.shared_data.clone(),
            episode_provenance: BTreeMap::new(),
            shared_provenance: BTreeMap::new(),
            dialogue_history: BTreeMap::new(),
            conversation_mode: ConversationMode::Discovery,
            clarification_context: None,
            next_episode_id: 1,
        }
    }

    // ─── episodes ────────────────────────────────────────────────────────

    pub fn create_episode(&mut self) -> u32 {
        let episode_id = self.next_episode_id;
        self.next_episode_id += 1;
        self.episodes.push(Episode::new(episode_id));
        self.episode_provenance.insert(episode_id, BTreeMap::new());
        self.dialogue_history.insert(episode_id, Vec::new());
        debug!(episode_id, "episode created");
        episode_id
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn episode_ids(&self) -> Vec<u32> {
        self.episodes.iter().map(|episode| episode.episode_id).collect()
    }

    fn episode_mut(&mut self, episode_id: u32) -> Result<&mut Episode> {
        self.episodes
            .iter_mut()
            .find(|episode| episode.episode_id == episode_id)
            .with_context(|| format!("unknown episode id {episode_id}"))
    }

    fn episode(&self, episode_id: u32) -> Result<&Episode> {
        self.episodes
            .iter()
            .find(|episode| episode.episode_id == episode_id)
            .with_context(|| format!("unknown episode id {episode_id}"))
    }

    /// Projection consumed by the question selector and the rule DSL.
    pub fn episode_view(&self, episode_id: u32) -> Result<EpisodeView> {
        let episode = self.episode(episode_id)?;
        Ok(EpisodeView {
            questions_answered: episode.questions_answered.clone(),
            questions_satisfied: episode.questions_satisfied.clone(),
            blocks_activated: episode.follow_up_blocks_activated.clone(),
            blocks_completed: episode.follow_up_blocks_completed.clone(),
            fields: episode.fields.clone(),
        })
    }

    // ─── field writes ────────────────────────────────────────────────────

    /// Atomic value + provenance write into an episode.  Missing provenance
    /// defaults to `{source: "default", confidence: low, mode: current}`.
    pub fn set_episode_field(
        &mut self,
        episode_id: u32,
        field: &str,
        value: Value,
        provenance: Option<Provenance>,
    ) -> Result<()> {
        if field.trim().is_empty() {
            bail!("episode field name must be non-empty");
        }
        let provenance = provenance.unwrap_or_else(|| self.default_provenance());
        let episode = self.episode_mut(episode_id)?;
        episode.fields.insert(field.to_string(), value);
        episode.timestamp_last_updated = Utc::now();
        self.episode_provenance
            .entry(episode_id)
            .or_default()
            .insert(field.to_string(), provenance);
        Ok(())
    }

    /// The envelope-collapse boundary for episode fields: the only place an
    /// extractor's [`ValueEnvelope`] becomes stored provenance.
    pub fn commit_envelope(
        &mut self,
        episode_id: u32,
        field: &str,
        envelope: ValueEnvelope,
    ) -> Result<()> {
        let provenance = self.provenance_from_envelope(&envelope);
        self.set_episode_field(episode_id, field, envelope.value, Some(provenance))
    }

    /// Atomic shared-data write.  Collection fields apply weakest-link
    /// confidence: the stored band is the minimum of old and new and never
    /// improves across updates.
    pub fn set_shared_field(
        &mut self,
        field: &str,
        value: Value,
        provenance: Option<Provenance>,
    ) -> Result<()> {
        if field.trim().is_empty() {
            bail!("shared field name must be non-empty");
        }
        let mut provenance = provenance.unwrap_or_else(|| self.default_provenance());
        if COLLECTION_FIELDS.contains(&field) {
            if let Some(existing) = self.shared_provenance.get(field) {
                provenance.confidence = provenance.confidence.min(existing.confidence);
            }
        }
        self.shared_data.insert(field.to_string(), value);
        self.shared_provenance.insert(field.to_string(), provenance);
        Ok(())
    }

    pub fn commit_shared_envelope(&mut self, field: &str, envelope: ValueEnvelope) -> Result<()> {
        let provenance = self.provenance_from_envelope(&envelope);
        self.set_shared_field(field, envelope.value, Some(provenance))
    }

    pub fn shared_data(&self) -> &Map<String, Value> {
        &self.shared_data
    }

    fn default_provenance(&self) -> Provenance {
        Provenance::new("default", ConfidenceLevel::Low, self.conversation_mode)
    }

    fn provenance_from_envelope(&self, envelope: &ValueEnvelope) -> Provenance {
        Provenance::new(
            envelope.source.clone(),
            ConfidenceLevel::from_score(envelope.confidence),
            self.conversation_mode,
        )
    }

    // ─── question tracking ───────────────────────────────────────────────

    /// Mark a question explicitly asked.  Also marks it satisfied so that
    /// `questions_answered ⊆ questions_satisfied` holds at the chokepoint.
    pub fn mark_question_answered(&mut self, episode_id: u32, question_id: &str) -> Result<()> {
        let episode = self.episode_mut(episode_id)?;
        episode.questions_answered.insert(question_id.to_string());
        episode.questions_satisfied.insert(question_id.to_string());
        Ok(())
    }

    /// Mark a question's intent satisfied — its field was obtained, whether
    /// asked or volunteered.
    pub fn mark_question_satisfied(&mut self, episode_id: u32, question_id: &str) -> Result<()> {
        let episode = self.episode_mut(episode_id)?;
        episode.questions_satisfied.insert(question_id.to_string());
        Ok(())
    }

    // ─── follow-up blocks ────────────────────────────────────────────────

    pub fn activate_follow_up_block(&mut self, episode_id: u32, block_id: &str) -> Result<()> {
        let episode = self.episode_mut(episode_id)?;
        episode.follow_up_blocks_activated.insert(block_id.to_string());
        Ok(())
    }

    /// Completing a block that was never activated is a caller bug — the
    /// completed set must stay a subset of the activated set.
    pub fn complete_follow_up_block(&mut self, episode_id: u32, block_id: &str) -> Result<()> {
        let episode = self.episode_mut(episode_id)?;
        if !episode.follow_up_blocks_activated.contains(block_id) {
            bail!("cannot complete block '{block_id}': never activated");
        }
        episode.follow_up_blocks_completed.insert(block_id.to_string());
        Ok(())
    }

    // ─── dialogue history ────────────────────────────────────────────────

    pub fn add_dialogue_turn(
        &mut self,
        episode_id: u32,
        question_id: &str,
        question_text: &str,
        patient_response: &str,
        extracted_fields: Map<String, Value>,
    ) -> Result<()> {
        self.episode(episode_id)?;
        self.dialogue_history.entry(episode_id).or_default().push(DialogueRecord {
            question_id: question_id.to_string(),
            question_text: question_text.to_string(),
            patient_response: patient_response.to_string(),
            extracted_fields,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    // ─── conversation mode ───────────────────────────────────────────────

    pub fn conversation_mode(&self) -> ConversationMode {
        self.conversation_mode
    }

    /// Mode writes come only from the dialogue manager; this is data
    /// integrity, not transition logic.
    pub fn set_conversation_mode(&mut self, mode: ConversationMode) {
        self.conversation_mode = mode;
    }

    // ─── clarification buffer ────────────────────────────────────────────

    pub fn init_clarification_context(&mut self) -> Result<()> {
        if self.clarification_context.is_some() {
            bail!("clarification context already initialized");
        }
        self.clarification_context = Some(ClarificationContext::default());
        Ok(())
    }

    pub fn append_clarification_turn(&mut self, turn: ClarificationTurn) -> Result<()> {
        match self.clarification_context.as_mut() {
            Some(context) => {
                context.append(turn);
                Ok(())
            }
            None => bail!("clarification context not initialized"),
        }
    }

    pub fn set_clarification_resolution(
        &mut self,
        resolution: ClarificationResolution,
    ) -> Result<()> {
        match self.clarification_context.as_mut() {
            Some(context) => context.set_resolution(resolution),
            None => bail!("clarification context not initialized"),
        }
    }

    pub fn clarification_context(&self) -> Option<&ClarificationContext> {
        self.clarification_context.as_ref()
    }

    /// Atomic buffer clear on mode exit.  Always safe, whatever the outcome.
    pub fn clear_clarification_context(&mut self) {
        self.clarification_context = None;
    }

    // ─── exports ─────────────────────────────────────────────────────────

    /// Canonical snapshot: lossless, round-trippable through
    /// [`StateManager::from_snapshot`].  Used for per-turn persistence.
    pub fn snapshot_state(&self) -> Value {
        let mut snapshot = Map::new();
        snapshot.insert(
            "episodes".into(),
            serde_json::to_value(&self.episodes).expect("episodes serialize"),
        );
        snapshot.insert("shared_data".into(), Value::Object(self.shared_data.clone()));
        snapshot.insert(
            "_provenance".into(),
            serde_json::json!({
                "episodes": self.episode_provenance,
                "shared": self.shared_provenance,
            }),
        );
        snapshot.insert(
            "dialogue_history".into(),
            serde_json::to_value(&self.dialogue_history).expect("dialogue serializes"),
        );
        snapshot.insert(
            "conversation_mode".into(),
            Value::String(self.conversation_mode.as_str().to_string()),
        );
        if let Some(context) = &self.clarification_context {
            snapshot.insert(
                "clarification_context".into(),
                serde_json::to_value(context).expect("clarification serializes"),
            );
        }
        Value::Object(snapshot)
    }

    /// Rehydrate from a canonical snapshot.
    ///
    /// Backward compatibility: snapshots without `questions_satisfied` seed
    /// it from `questions_answered`; snapshots without a mode default to
    /// extraction.  Turn-level envelope keys at the same level are ignored.
    pub fn from_snapshot(snapshot: &Value, model: &ClinicalDataModel) -> Result<Self> {
        let root = snapshot
            .as_object()
            .context("state snapshot must be a JSON object")?;

        let mut episodes: Vec<Episode> = match root.get("episodes") {
            Some(value) => serde_json::from_value(value.clone())
                .context("snapshot 'episodes' is malformed")?,
            None => Vec::new(),
        };
        for episode in &mut episodes {
            // Legacy snapshots lack the satisfied set; the union also
            // re-establishes the subset invariant for any input.
            let answered: Vec<String> = episode.questions_answered.iter().cloned().collect();
            episode.questions_satisfied.extend(answered);
        }

        let shared_data = match root.get("shared_data") {
            Some(value) => value
                .as_object()
                .context("snapshot 'shared_data' must be an object")?
                .clone(),
            None => model.shared_data.clone(),
        };

        let (episode_provenance, shared_provenance) = match root.get("_provenance") {
            Some(value) => (
                match value.get("episodes") {
                    Some(map) => serde_json::from_value(map.clone())
                        .context("snapshot episode provenance is malformed")?,
                    None => BTreeMap::new(),
                },
                match value.get("shared") {
                    Some(map) => serde_json::from_value(map.clone())
                        .context("snapshot shared provenance is malformed")?,
                    None => BTreeMap::new(),
                },
            ),
            None => (BTreeMap::new(), BTreeMap::new()),
        };

        let dialogue_history = match root.get("dialogue_history") {
            Some(value) => serde_json::from_value(value.clone())
                .context("snapshot 'dialogue_history' is malformed")?,
            None => BTreeMap::new(),
        };

        let conversation_mode = match root.get("conversation_mode") {
            // Pre-mode snapshots default to extraction.
            None => ConversationMode::Extraction,
            Some(value) => {
                let text = value
                    .as_str()
                    .context("snapshot 'conversation_mode' must be a string")?;
                ConversationMode::parse(text)
                    .with_context(|| format!("invalid conversation mode '{text}'"))?
            }
        };

        let clarification_context = match root.get("clarification_context") {
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .context("snapshot 'clarification_context' is malformed")?,
            ),
            None => None,
        };

        let next_episode_id = episodes
            .iter()
            .map(|episode| episode.episode_id)
            .max()
            .map_or(1, |max| max + 1);

        Ok(Self {
            episodes,
            shared_data,
            episode_provenance,
            shared_provenance,
            dialogue_history,
            conversation_mode,
            clarification_context,
            next_episode_id,
        })
    }

    /// Clinical view for downstream JSON: non-empty episodes, clinical
    /// fields only.  Operational sets, dialogue, provenance, and mode are
    /// all stripped.
    pub fn export_clinical_view(&self) -> Value {
        let episodes: Vec<Value> = self
            .episodes
            .iter()
            .filter(|episode| !episode.is_empty())
            .map(|episode| {
                let mut entry = Map::new();
                entry.insert("episode_id".into(), episode.episode_id.into());
                entry.insert(
                    "timestamp_started".into(),
                    serde_json::to_value(episode.timestamp_started).expect("timestamp"),
                );
                entry.insert(
                    "timestamp_last_updated".into(),
                    serde_json::to_value(episode.timestamp_last_updated).expect("timestamp"),
                );
                for (field, value) in &episode.fields {
                    entry.insert(field.clone(), value.clone());
                }
                Value::Object(entry)
            })
            .collect();

        serde_json::json!({
            "episodes": episodes,
            "shared_data": self.shared_data,
        })
    }

    /// Summary view for the narrative generator: everything the canonical
    /// snapshot has except the clarification buffer, with provenance
    /// filtered down to `{source, confidence}` (mode is orchestration
    /// internal).  Operates on copies; live state is never touched.
    pub fn export_for_summary(&self) -> Value {
        let filter = |provenance: &BTreeMap<String, Provenance>| -> Value {
            let map: Map<String, Value> = provenance
                .iter()
                .map(|(field, record)| {
                    (
                        field.clone(),
                        serde_json::json!({
                            "source": record.source,
                            "confidence": record.confidence,
                        }),
                    )
                })
                .collect();
            Value::Object(map)
        };

        let episode_provenance: BTreeMap<u32, Value> = self
            .episode_provenance
            .iter()
            .map(|(episode_id, provenance)| (*episode_id, filter(provenance)))
            .collect();

        serde_json::json!({
            "episodes": self.episodes,
            "shared_data": self.shared_data,
            "dialogue_history": self.dialogue_history,
            "_provenance": {
                "episodes": episode_provenance,
                "shared": filter(&self.shared_provenance),
            },
        })
    }

    #[cfg(test)]
    fn provenance_for(&self, episode_id: u32, field: &str) -> Option<&Provenance> {
        self.episode_provenance.get(&episode_id)?.get(field)
    }
}
