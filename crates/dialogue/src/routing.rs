//! Prefix-based routing of extracted fields.
//!
//! Single source of truth for whether a field belongs to the current
//! episode, to shared consultation data, or to nobody we know.  Rules are
//! evaluated in a fixed order and the configuration is validated at
//! construction so an ambiguous registration can never reach a live turn.

use std::collections::BTreeSet;

use anyhow::{bail, Result};

use iris_state::COLLECTION_FIELDS;

/// Prefixes marking episode-scoped fields: symptom sections plus the
/// follow-up blocks.
const EPISODE_PREFIXES: &[&str] = &[
    "vl_", // vision loss
    "cp_", // colour perception
    "vp_", // visual phenomena
    "dp_", // diplopia
    "h_",  // headache
    "ep_", // eye pain
    "ac_", // appearance changes
    "hc_", // healthcare contacts
    "b1_", "b2_", "b3_", "b4_", "b5_", "b6_",
];

/// Prefixes marking shared consultation data.
const SHARED_PREFIXES: &[&str] = &[
    "sh_", // social history
    "sr_", // systems review
];

/// Shared scalar fields without a prefix convention.
const SHARED_FIELDS: &[&str] = &[
    "additional_episodes_present",
    "smoking_status",
    "alcohol_use",
    "occupation",
    "living_situation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRoute {
    Episode,
    Shared,
    Unknown,
}

impl FieldRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Shared => "shared",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRouting {
    episode_prefixes: BTreeSet<String>,
    shared_prefixes: BTreeSet<String>,
    shared_fields: BTreeSet<String>,
    collection_fields: BTreeSet<String>,
}

impl FieldRouting {
    /// The production routing table.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            EPISODE_PREFIXES.iter().map(ToString::to_string),
            SHARED_PREFIXES.iter().map(ToString::to_string),
            SHARED_FIELDS.iter().map(ToString::to_string),
            COLLECTION_FIELDS.iter().map(ToString::to_string),
        )
    }

    /// Validates the configuration exhaustively: prefix sets must be
    /// disjoint and non-shadowing, and no registered field name may match
    /// more than one rule.  Any ambiguity is fatal here, not at runtime.
    pub fn new(
        episode_prefixes: impl IntoIterator<Item = String>,
        shared_prefixes: impl IntoIterator<Item = String>,
        shared_fields: impl IntoIterator<Item = String>,
        collection_fields: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let routing = Self {
            episode_prefixes: episode_prefixes.into_iter().collect(),
            shared_prefixes: shared_prefixes.into_iter().collect(),
            shared_fields: shared_fields.into_iter().collect(),
            collection_fields: collection_fields.into_iter().collect(),
        };

        for episode in &routing.episode_prefixes {
            for shared in &routing.shared_prefixes {
                if episode.starts_with(shared.as_str()) || shared.starts_with(episode.as_str()) {
                    bail!("prefix '{episode}' and '{shared}' shadow each other");
                }
            }
        }
        for field in routing.shared_fields.iter().chain(&routing.collection_fields) {
            if let Some(prefix) = routing.matching_prefix(field, &routing.episode_prefixes) {
                bail!("registered shared field '{field}' matches episode prefix '{prefix}'");
            }
            if let Some(prefix) = routing.matching_prefix(field, &routing.shared_prefixes) {
                bail!("registered shared field '{field}' matches shared prefix '{prefix}'");
            }
        }

        Ok(routing)
    }

    /// Classify one extracted field.  Pure; the outcome for a set of fields
    /// does not depend on classification order.
    pub fn classify(&self, field: &str) -> FieldRoute {
        if self.matching_prefix(field, &self.episode_prefixes).is_some() {
            return FieldRoute::Episode;
        }
        if self.matching_prefix(field, &self.shared_prefixes).is_some()
            || self.shared_fields.contains(field)
            || self.collection_fields.contains(field)
        {
            return FieldRoute::Shared;
        }
        FieldRoute::Unknown
    }

    pub fn is_collection(&self, field: &str) -> bool {
        self.collection_fields.contains(field)
    }

    /// Human-readable rule name for the debug panel.
    pub fn matched_rule(&self, field: &str) -> String {
        if let Some(prefix) = self.matching_prefix(field, &self.episode_prefixes) {
            return format!("prefix:{prefix}");
        }
        if let Some(prefix) = self.matching_prefix(field, &self.shared_prefixes) {
            return format!("prefix:{prefix}");
        }
        if self.collection_fields.contains(field) {
            return "collection".to_string();
        }
        if self.shared_fields.contains(field) {
            return "shared_field".to_string();
        }
        "unknown".to_string()
    }

    fn matching_prefix<'a>(&self, field: &str, prefixes: &'a BTreeSet<String>) -> Option<&'a str> {
        prefixes
            .iter()
            .find(|prefix| field.starts_with(prefix.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldRoute, FieldRouting};

    #[test]
    fn default_table_routes_the_conventions() {
        let routing = FieldRouting::with_defaults().unwrap();
        assert_eq!(routing.classify("vl_laterality"), FieldRoute::Episode);
        assert_eq!(routing.classify("b1_eye_movement_pain"), FieldRoute::Episode);
        assert_eq!(routing.classify("sh_smoking_history"), FieldRoute::Shared);
        assert_eq!(routing.classify("medications"), FieldRoute::Shared);
        assert_eq!(routing.classify("additional_episodes_present"), FieldRoute::Shared);
        assert_eq!(routing.classify("totally_new_field"), FieldRoute::Unknown);
    }

    #[test]
    fn classification_is_order_independent() {
        let routing = FieldRouting::with_defaults().unwrap();
        let fields = ["vl_degree", "medications", "mystery", "sr_weight_loss"];

        let forward: Vec<_> = fields.iter().map(|f| routing.classify(f)).collect();
        let mut reverse: Vec<_> = fields.iter().rev().map(|f| routing.classify(f)).collect();
        reverse.reverse();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn shadowing_prefixes_are_rejected() {
        let result = FieldRouting::new(
            ["vl_".to_string()],
            ["vl_extra_".to_string()],
            [],
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn collection_field_matching_a_prefix_is_rejected() {
        let result = FieldRouting::new(
            ["vl_".to_string()],
            ["sh_".to_string()],
            [],
            ["vl_medications".to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn matched_rule_names_the_winning_rule() {
        let routing = FieldRouting::with_defaults().unwrap();
        assert_eq!(routing.matched_rule("vl_degree"), "prefix:vl_");
        assert_eq!(routing.matched_rule("medications"), "collection");
        assert_eq!(routing.matched_rule("occupation"), "shared_field");
        assert_eq!(routing.matched_rule("mystery"), "unknown");
    }
}
