//! Episode triage: the probabilistic ambiguity gate in front of extraction.
//!
//! The generator produces a probabilistic signal over each utterance; the
//! safety assessor collapses it into a finite decision; the narrowing
//! prompt coerces the conversation back to the current problem when the
//! decision is not safe.  This is the sole boundary between probabilistic
//! inference and deterministic control flow.

mod generator;
mod narrowing;
mod safety;
mod signal;

pub use generator::{EpisodeContext, EpisodeHypothesisGenerator};
pub use narrowing::narrowing_prompt;
pub use safety::{assess_episode_safety, EpisodeSafetyStatus, SafetyPolicy};
pub use signal::{ConfidenceBand, EpisodeHypothesisSignal};
