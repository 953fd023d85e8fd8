//! Turn orchestration for the consultation engine.
//!
//! The dialogue manager is the command handler that wires the selector,
//! triage gate, extraction pipeline, and state container into single atomic
//! turns.  Alongside it live the pieces only the orchestrator needs: field
//! routing, per-turn persistence, report writers, and the operator-facing
//! state view.

mod display;
mod manager;
mod persistence;
mod reports;
mod routing;

pub use display::format_state_for_display;
pub use manager::DialogueManager;
pub use persistence::TurnStore;
pub use routing::{FieldRoute, FieldRouting};
