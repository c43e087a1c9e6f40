//! Memory store backends and collaborator data providers.
//!
//! The engine depends only on the traits in `keepsake-core`; this crate
//! supplies concrete implementations. The in-memory backends are the
//! default for tests and single-process deployments — durable backends
//! plug in behind the same traits.

pub mod collaborators;
pub mod in_memory;
pub mod turn_log;

pub use collaborators::{StaticActivityProvider, StaticInterestProvider, StaticProfileProvider};
pub use in_memory::InMemoryMemoryStore;
pub use turn_log::InMemoryTurnLog;
