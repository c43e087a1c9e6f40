//! Token estimation and model-tier window limits.
//!
//! Uses a character-based heuristic tuned for the target provider:
//! ~3.5 characters per token for prose, with a +20% adjustment for
//! structured payloads, which tokenize less efficiently. Window limits are
//! per-tier hard ceilings minus a 10% safety margin so a request is never
//! assembled flush against the true limit.

use keepsake_core::provider::ModelProvider;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Characters per token for prose. Multiplied out as 2/7 to stay in
/// integer arithmetic: ceil(chars / 3.5) == ceil(chars * 2 / 7).
const CHARS_PER_TOKEN_NUM: usize = 2;
const CHARS_PER_TOKEN_DEN: usize = 7;

/// Punctuation characters typical of structured payloads (JSON and
/// friends).
const STRUCTURED_PUNCTUATION: [char; 7] = ['{', '}', '[', ']', '"', ':', ','];

/// Hard window ceilings per tier, in tokens, before the safety margin.
const HIGH_TIER_WINDOW: usize = 2_000_000;
const LOW_TIER_WINDOW: usize = 1_000_000;

/// Fraction of the window actually budgeted (10% held back).
const SAFETY_MARGIN_NUM: usize = 9;
const SAFETY_MARGIN_DEN: usize = 10;

/// Provider capability tier, detected once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Access to the provider's largest context window.
    High,
    /// The conservative default.
    Low,
}

/// Estimate the token count for a string.
///
/// ceil(chars / 3.5), with a +20% adjustment when structured-data
/// punctuation exceeds 10% of characters. Empty text is zero.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count();
    let base = (chars * CHARS_PER_TOKEN_NUM).div_ceil(CHARS_PER_TOKEN_DEN);

    let punctuation = text
        .chars()
        .filter(|c| STRUCTURED_PUNCTUATION.contains(c))
        .count();
    if punctuation * 10 > chars {
        // +20%, rounded up
        (base * 6).div_ceil(5)
    } else {
        base
    }
}

/// Process-lifetime cache for the probed tier.
///
/// Owned explicitly by the estimator rather than hidden in a global, so
/// call sites (and tests) control its lifetime. The probe runs once; both
/// success and failure verdicts are cached so a flapping provider cannot
/// trigger repeated probe traffic.
#[derive(Debug, Default)]
pub struct TierCache {
    detected: RwLock<Option<ModelTier>>,
}

impl TierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded cache, for tests and for deployments that pin a tier.
    pub fn pinned(tier: ModelTier) -> Self {
        Self {
            detected: RwLock::new(Some(tier)),
        }
    }

    async fn get(&self) -> Option<ModelTier> {
        *self.detected.read().await
    }

    async fn set(&self, tier: ModelTier) {
        *self.detected.write().await = Some(tier);
    }
}

/// Token estimator with tier detection.
pub struct TokenEstimator {
    tiers: TierCache,
}

impl TokenEstimator {
    pub fn new(tiers: TierCache) -> Self {
        Self { tiers }
    }

    /// Approximate token count for `text`. See [`estimate_tokens`].
    pub fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// The budgetable window for a tier: the hard ceiling minus the 10%
    /// safety margin.
    pub fn window_limit_for(&self, tier: ModelTier) -> usize {
        let ceiling = match tier {
            ModelTier::High => HIGH_TIER_WINDOW,
            ModelTier::Low => LOW_TIER_WINDOW,
        };
        ceiling * SAFETY_MARGIN_NUM / SAFETY_MARGIN_DEN
    }

    /// Detect the provider tier, probing at most once per process.
    ///
    /// A failed or errored probe defaults to the conservative tier and is
    /// cached like a successful one — it must never crash the caller.
    pub async fn tier_for(&self, provider: &dyn ModelProvider) -> ModelTier {
        if let Some(tier) = self.tiers.get().await {
            return tier;
        }

        let tier = match provider.probe_large_window().await {
            Ok(true) => {
                debug!(provider = provider.name(), "Large-window probe succeeded");
                ModelTier::High
            }
            Ok(false) => {
                debug!(provider = provider.name(), "Large-window probe denied");
                ModelTier::Low
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    error = %e,
                    "Tier probe failed, defaulting to low tier"
                );
                ModelTier::Low
            }
        };

        self.tiers.set(tier).await;
        tier
    }
}
