//! Token budgeting, fingerprinting, and context caching.
//!
//! This crate owns the numeric heart of the engine: how big a payload is
//! in tokens, how much window a model tier affords, whether an assembled
//! context is cache-equivalent to a previous one, and the two caches
//! (in-process volatile, provider-side remote) that keep rebuild cost down.

pub mod budget;
pub mod fingerprint;
pub mod remote;
pub mod token;
pub mod volatile;

pub use budget::{BudgetReport, BudgetVerdict, RESPONSE_RESERVE_TOKENS};
pub use fingerprint::{fingerprint_static_context, ContextFingerprint};
pub use remote::{RemoteCacheStats, RemoteContentCache};
pub use token::{estimate_tokens, ModelTier, TierCache, TokenEstimator};
pub use volatile::{CacheStats, VolatileContextCache};
