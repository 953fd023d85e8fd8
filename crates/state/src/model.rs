use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Initialization template for consultation state.
///
/// The state manager uses only the shared-data template: new consultations
/// start from a copy of it (collection fields seeded as empty arrays, flat
/// scalars absent until collected).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClinicalDataModel {
    #[serde(default)]
    pub shared_data: Map<String, Value>,
}

impl ClinicalDataModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("clinical data model not found: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("clinical data model is not valid JSON: {}", path.display()))
    }
}
