//! Error types for the Keepsake domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Nothing in this subsystem is fatal to the process: every failure mode
//! degrades to a deterministic, lower-quality response at the engine
//! boundary rather than an error propagating to the caller.

use thiserror::Error;

/// The top-level error type for all Keepsake operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Retrieval dispatch errors ---
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure or provider outage. Retried once with backoff,
    /// then the turn falls back to a templated response.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Rate limited. The turn falls back immediately — no retry budget
    /// is spent on a provider that told us to back off.
    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory record not found: {0}")]
    NotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// The assembled context cannot fit the window even after
    /// spawn-compaction. Forces the spawn path unconditionally and is
    /// logged as a warning, never surfaced to the user.
    #[error("Context budget exceeded: {estimated_tokens} tokens against a {window_limit} window")]
    BudgetExceeded {
        estimated_tokens: usize,
        window_limit: usize,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Returned to the model as a structured error; the conversation
    /// continues.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },
}
