//! # Keepsake Core
//!
//! Domain types, traits, and error definitions for the Keepsake companion
//! context engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model provider, persistence, profile data)
//! is defined as a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping collaborators via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod memory;
pub mod profile;
pub mod provider;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use error::{CacheError, DispatchError, Error, MemoryError, ProviderError, Result};
pub use memory::{clamp_importance, MemoryRecord, MemoryStore, MemoryTopic};
pub use profile::{Activity, ActivityProvider, Interest, InterestProvider, Profile, ProfileProvider};
pub use provider::{
    CachedContentInfo, FunctionCall, FunctionDeclaration, GenerateRequest, ModelProvider,
    ModelResponse,
};
pub use turn::{ConversationTurn, Message, Role, TurnStore};
