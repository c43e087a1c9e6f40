//! Post-turn analysis: salient fact extraction and context length
//! monitoring.
//!
//! Runs after the user-visible response is delivered, so nothing here may
//! block or fail a conversation turn. Both analyses talk to the model
//! under system roles that identify this code as an internal component,
//! never as the companion persona.

pub mod extractor;

pub use extractor::{AnalysisOutcome, LengthVerdict, SalientFactExtractor};
