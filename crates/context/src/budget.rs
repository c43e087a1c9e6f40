//! Per-turn budget report and verdict thresholds.
//!
//! The report is an ephemeral value object, recomputed each turn and never
//! persisted. Thresholds are fixed constants applied identically across
//! tiers; the response reserve is subtracted from every budget
//! calculation, never negotiated per-request.

use serde::{Deserialize, Serialize};

/// Tokens reserved for the model's response in every budget calculation.
pub const RESPONSE_RESERVE_TOKENS: usize = 4000;

/// Above this utilization the context should be optimized.
pub const OPTIMIZE_THRESHOLD_PCT: f32 = 75.0;

/// Above this utilization a compacted replacement context is spawned.
pub const SPAWN_THRESHOLD_PCT: f32 = 85.0;

/// What to do about the current context size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetVerdict {
    Ok,
    Optimize,
    Spawn,
}

/// Snapshot of the current turn's token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReport {
    /// Input tokens plus the response reserve.
    pub estimated_tokens: usize,

    /// The tier's budgetable window.
    pub window_limit: usize,

    /// `estimated_tokens` as a percentage of `window_limit`.
    pub utilization_pct: f32,

    pub verdict: BudgetVerdict,
}

impl BudgetReport {
    /// Build a report from estimated *input* tokens; the response reserve
    /// is added here.
    pub fn new(input_tokens: usize, window_limit: usize) -> Self {
        let estimated_tokens = input_tokens + RESPONSE_RESERVE_TOKENS;
        let utilization_pct = if window_limit == 0 {
            100.0
        } else {
            (estimated_tokens as f32 / window_limit as f32) * 100.0
        };

        let verdict = if utilization_pct > SPAWN_THRESHOLD_PCT {
            BudgetVerdict::Spawn
        } else if utilization_pct > OPTIMIZE_THRESHOLD_PCT {
            BudgetVerdict::Optimize
        } else {
            BudgetVerdict::Ok
        };

        Self {
            estimated_tokens,
            window_limit,
            utilization_pct,
            verdict,
        }
    }

    /// Whether the estimate exceeds the window entirely (worse than any
    /// threshold — forces the spawn path unconditionally).
    pub fn exceeds_window(&self) -> bool {
        self.estimated_tokens > self.window_limit
    }
}
