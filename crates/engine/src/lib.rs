//! The turn-processing engine.
//!
//! Ties the context, memory, and analysis crates together: the optimizer
//! assembles and budgets per-turn context, the dispatcher resolves
//! model-issued retrieval calls, and the service runs the whole turn —
//! timeout, retry, fallback, and asynchronous learning included.

pub mod dispatcher;
pub mod fallback;
pub mod optimizer;
pub mod service;

pub use dispatcher::{DispatchOutcome, RetrievalCall, RetrievalDispatcher};
pub use fallback::fallback_response;
pub use optimizer::{AssembledContext, ContextOptimizer};
pub use service::{CompanionEngine, EngineStats, OptimizeReport, TurnMetrics, TurnOutcome};
