//! Shared contracts for the iris consultation engine.
//!
//! Everything in this crate is a frozen interface: command/result envelopes,
//! the opaque consultation state, provenance records, value envelopes, and
//! question descriptors.  Behaviour lives in the component crates; this crate
//! only defines the shapes they exchange.

mod commands;
mod envelope;
mod episode_view;
mod mode;
mod provenance;
mod question;
mod results;

pub use commands::{Command, ConsultationState};
pub use envelope::ValueEnvelope;
pub use episode_view::EpisodeView;
pub use mode::ConversationMode;
pub use provenance::{ConfidenceLevel, Provenance};
pub use question::{FieldType, QuestionDescriptor, QuestionKind};
pub use results::{CommandResult, FinalReport, IllegalCommand, TurnMetadata, TurnResult};
