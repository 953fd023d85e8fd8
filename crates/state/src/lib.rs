//! Multi-episode consultation state.
//!
//! This crate is a data container with hard invariants, not a home for
//! business logic: episodes as an ordered array, flat shared data, per-field
//! provenance, dialogue history, and the clarification buffer.  The dialogue
//! manager decides *what* to write; this crate guarantees the writes are
//! atomic and the exports are consistent.

mod clarification;
mod manager;
mod model;

pub use clarification::{ClarificationContext, ClarificationResolution, ClarificationTurn};
pub use manager::{DialogueRecord, Episode, StateManager, COLLECTION_FIELDS};
pub use model::ClinicalDataModel;
