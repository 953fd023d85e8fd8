use serde::{Deserialize, Serialize};

/// Ingress-time wrapper around an extracted value.
///
/// Produced by extractors, carried through the orchestrator unchanged, and
/// collapsed into a stored [`crate::Provenance`] record at the state-manager
/// write boundary.  No other component may turn an envelope into provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEnvelope {
    pub value: serde_json::Value,
    /// Identity of the producing extractor.
    pub source: String,
    /// Numeric confidence; currently always 1.0, reserved for calibration.
    pub confidence: f32,
}

impl ValueEnvelope {
    pub fn new(value: serde_json::Value, source: impl Into<String>) -> Self {
        Self { value, source: source.into(), confidence: 1.0 }
    }
}
