//! The companion engine: the full turn lifecycle behind one facade.
//!
//! `process_turn` never returns an error to the caller. Provider outages,
//! rate limits, and timeouts all degrade to a deterministic templated
//! response; learning runs detached after the response is delivered so a
//! slow analysis can never hold a turn hostage.

use keepsake_analysis::SalientFactExtractor;
use keepsake_config::EngineConfig;
use keepsake_context::{
    BudgetReport, BudgetVerdict, CacheStats, RemoteCacheStats, RemoteContentCache, TierCache,
    TokenEstimator, VolatileContextCache,
};
use keepsake_core::error::{Error, ProviderError};
use keepsake_core::memory::{MemoryRecord, MemoryStore, IMPORTANCE_MIN};
use keepsake_core::profile::{ActivityProvider, InterestProvider, Profile, ProfileProvider};
use keepsake_core::provider::{GenerateRequest, ModelProvider, ModelResponse};
use keepsake_core::turn::{ConversationTurn, Message, Role, TurnStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatcher::RetrievalDispatcher;
use crate::fallback::fallback_response;
use crate::optimizer::{AssembledContext, ContextOptimizer};

/// Memories listed when asking the model for an optimization
/// recommendation.
const OPTIMIZE_MEMORY_LIMIT: usize = 100;

/// What one processed turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub response: String,
    /// Ids of memory records the response referenced.
    pub memory_references: Vec<String>,
    pub metrics: TurnMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnMetrics {
    pub cache_hit: bool,
    pub estimated_tokens: usize,
    pub utilization_pct: f32,
    pub verdict: BudgetVerdict,
    pub function_call_resolved: bool,
    pub remote_cache_used: bool,
    pub fallback_used: bool,
    /// Tokens not re-sent thanks to the volatile cache hit.
    pub tokens_saved: usize,
    pub context_build_ms: u64,
    pub provider_ms: u64,
    pub total_ms: u64,
}

impl TurnMetrics {
    fn fallback(total_ms: u64) -> Self {
        Self {
            cache_hit: false,
            estimated_tokens: 0,
            utilization_pct: 0.0,
            verdict: BudgetVerdict::Ok,
            function_call_resolved: false,
            remote_cache_used: false,
            fallback_used: true,
            tokens_saved: 0,
            context_build_ms: 0,
            provider_ms: 0,
            total_ms,
        }
    }
}

/// Result of an on-demand context optimization pass.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub memory_count: usize,
    pub recommendation: String,
}

/// Combined cache health for the ops surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub volatile: CacheStats,
    pub remote: RemoteCacheStats,
}

/// What inline generation produced for one turn.
struct InlineGeneration {
    text: String,
    function_call_resolved: bool,
    /// Memory records surfaced by the resolved retrieval call, if any.
    dispatched_memory_ids: Vec<String>,
}

/// The context and memory engine.
pub struct CompanionEngine {
    config: EngineConfig,
    provider: Arc<dyn ModelProvider>,
    memory: Arc<dyn MemoryStore>,
    turns: Arc<dyn TurnStore>,
    profiles: Arc<dyn ProfileProvider>,
    optimizer: ContextOptimizer,
    dispatcher: RetrievalDispatcher,
    extractor: Arc<SalientFactExtractor>,
    estimator: Arc<TokenEstimator>,
    volatile: Arc<VolatileContextCache>,
    remote: Arc<RemoteContentCache>,
}

impl CompanionEngine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ModelProvider>,
        memory: Arc<dyn MemoryStore>,
        turns: Arc<dyn TurnStore>,
        profiles: Arc<dyn ProfileProvider>,
        interests: Arc<dyn InterestProvider>,
        activities: Arc<dyn ActivityProvider>,
    ) -> Self {
        let estimator = Arc::new(TokenEstimator::new(TierCache::new()));
        let volatile = Arc::new(VolatileContextCache::new(
            config.volatile_cache.ttl_secs,
            config.volatile_cache.max_usage_per_entry,
        ));
        let remote = Arc::new(RemoteContentCache::new(
            provider.clone(),
            config.remote_cache.ttl_minutes,
            config.remote_cache.min_cache_tokens,
        ));

        let optimizer = ContextOptimizer::new(
            provider.clone(),
            memory.clone(),
            profiles.clone(),
            turns.clone(),
            estimator.clone(),
            volatile.clone(),
            remote.clone(),
        );
        let dispatcher = RetrievalDispatcher::new(memory.clone(), interests, activities);
        let extractor = Arc::new(SalientFactExtractor::new(provider.clone(), memory.clone()));

        Self {
            config,
            provider,
            memory,
            turns,
            profiles,
            optimizer,
            dispatcher,
            extractor,
            estimator,
            volatile,
            remote,
        }
    }

    /// Process one conversation turn. Never fails: provider trouble and
    /// timeouts degrade to a templated fallback response.
    pub async fn process_turn(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> TurnOutcome {
        let name = match self.profiles.get_profile(user_id).await {
            Ok(profile) => profile.name,
            Err(e) => {
                warn!(user_id, error = %e, "Profile fetch failed");
                "friend".to_string()
            }
        };

        let started = std::time::Instant::now();
        let deadline = Duration::from_secs(self.config.turn.timeout_secs);
        match timeout(deadline, self.run_turn(user_id, session_id, message, started)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "Turn failed, delivering fallback");
                self.fallback_outcome(&name, message, started)
            }
            Err(_) => {
                warn!(user_id, timeout_secs = self.config.turn.timeout_secs, "Turn timed out");
                self.fallback_outcome(&name, message, started)
            }
        }
    }

    async fn run_turn(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
        started: std::time::Instant,
    ) -> Result<TurnOutcome, Error> {
        let profile = self.profiles.get_profile(user_id).await?;
        let persona = persona_instruction(&profile);

        let assembled = self
            .optimizer
            .assemble(user_id, session_id, message, &persona)
            .await?;
        let context_build_ms = started.elapsed().as_millis() as u64;
        let provider_started = std::time::Instant::now();

        let mut remote_cache_used = false;
        let mut function_call_resolved = false;
        let mut dispatched_ids = Vec::new();

        // Handle-based generation skips the function-call round: the
        // provider's cached-content path takes a plain prompt only. An
        // upload failure degrades to inline generation for this turn.
        let response_text = if assembled.escalate_to_remote && assembled.compacted.is_none() {
            match self
                .remote
                .ensure_handle(user_id, &assembled.fingerprint, &assembled.static_context)
                .await
            {
                Ok(handle) => {
                    let prompt =
                        format!("{}\n\nUser: {message}", assembled.dynamic_context);
                    match self.remote.generate(&handle, &prompt, Some(&persona)).await {
                        Ok(text) => {
                            remote_cache_used = true;
                            text
                        }
                        Err(e) => {
                            warn!(user_id, error = %e, "Handle generation failed, going inline");
                            let generated = self
                                .generate_inline(user_id, &assembled, &persona, message)
                                .await?;
                            function_call_resolved = generated.function_call_resolved;
                            dispatched_ids = generated.dispatched_memory_ids;
                            generated.text
                        }
                    }
                }
                Err(e) => {
                    warn!(user_id, error = %e, "Remote cache upload failed, going inline");
                    let generated = self
                        .generate_inline(user_id, &assembled, &persona, message)
                        .await?;
                    function_call_resolved = generated.function_call_resolved;
                    dispatched_ids = generated.dispatched_memory_ids;
                    generated.text
                }
            }
        } else {
            let generated = self
                .generate_inline(user_id, &assembled, &persona, message)
                .await?;
            function_call_resolved = generated.function_call_resolved;
            dispatched_ids = generated.dispatched_memory_ids;
            generated.text
        };

        let provider_ms = provider_started.elapsed().as_millis() as u64;

        // References come from two sources: keyword overlap with the
        // memories baked into the context, and records a retrieval call
        // surfaced mid-turn. Union them without duplicates.
        let mut memory_references = extract_memory_references(&response_text, &assembled.memories);
        for id in dispatched_ids {
            if !memory_references.contains(&id) {
                memory_references.push(id);
            }
        }

        self.record_turns(user_id, session_id, message, &response_text, &memory_references)
            .await;
        self.spawn_learning(user_id, message, &response_text, &assembled);

        info!(
            user_id,
            cache_hit = assembled.cache_hit,
            utilization_pct = assembled.report.utilization_pct,
            function_call_resolved,
            "Turn delivered"
        );

        let tokens_saved = if assembled.cache_hit {
            self.estimator.estimate(&assembled.static_context)
        } else {
            0
        };

        Ok(TurnOutcome {
            response: response_text,
            memory_references,
            metrics: TurnMetrics {
                cache_hit: assembled.cache_hit,
                estimated_tokens: assembled.report.estimated_tokens,
                utilization_pct: assembled.report.utilization_pct,
                verdict: assembled.report.verdict,
                function_call_resolved,
                remote_cache_used,
                fallback_used: false,
                tokens_saved,
                context_build_ms,
                provider_ms,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Inline generation with one round of function-call resolution. The
    /// second request carries no tools, so the model must answer.
    async fn generate_inline(
        &self,
        user_id: &str,
        assembled: &AssembledContext,
        persona: &str,
        message: &str,
    ) -> Result<InlineGeneration, Error> {
        let context_messages = vec![
            Message::user(assembled.full_context()),
            Message::assistant(format!(
                "I understand. I'm ready to chat with {} with their context loaded.",
                assembled.profile.name
            )),
            Message::user(message),
        ];

        let request = GenerateRequest::new(context_messages.clone())
            .with_system_instruction(persona)
            .with_tools(RetrievalDispatcher::declarations());
        let response = self.generate_with_retry(request).await?;

        // One resolution round only: resolve the first call, hand the
        // result back, and require a final answer.
        if let Some(call) = response.function_calls.first() {
            debug!(user_id, function = %call.name, "Resolving model function call");
            let outcome = self.dispatcher.dispatch(user_id, call).await;

            let mut messages = context_messages;
            messages.push(Message::assistant(format!(
                "Calling function {} to look that up.",
                call.name
            )));
            messages.push(Message::user(format!(
                "FUNCTION RESULT for {}: {}",
                call.name, outcome.payload
            )));

            let followup =
                GenerateRequest::new(messages).with_system_instruction(persona);
            let final_response = self.generate_with_retry(followup).await?;
            return Ok(InlineGeneration {
                text: final_response.text,
                function_call_resolved: true,
                dispatched_memory_ids: outcome.memory_ids,
            });
        }

        Ok(InlineGeneration {
            text: response.text,
            function_call_resolved: false,
            dispatched_memory_ids: Vec::new(),
        })
    }

    /// One retry with backoff on `Unavailable`; rate limits fail the
    /// turn immediately so no retry budget is spent against a provider
    /// that asked us to back off.
    async fn generate_with_retry(
        &self,
        request: GenerateRequest,
    ) -> Result<ModelResponse, Error> {
        match self.provider.generate(request.clone()).await {
            Ok(response) => Ok(response),
            Err(ProviderError::Unavailable(reason)) => {
                debug!(reason, "Provider unavailable, retrying once");
                tokio::time::sleep(Duration::from_millis(self.config.turn.retry_backoff_ms))
                    .await;
                Ok(self.provider.generate(request).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_turns(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
        response: &str,
        memory_references: &[String],
    ) {
        let user_turn = ConversationTurn::new(user_id, session_id, Role::User, message);
        if let Err(e) = self.turns.append(user_turn).await {
            warn!(user_id, error = %e, "Failed to record user turn");
        }

        let assistant_turn = ConversationTurn::new(user_id, session_id, Role::Assistant, response)
            .with_memory_references(memory_references.to_vec());
        if let Err(e) = self.turns.append(assistant_turn).await {
            warn!(user_id, error = %e, "Failed to record assistant turn");
        }
    }

    /// Fire-and-forget learning. A fact extracted here may not be
    /// searchable until the next turn; that eventual consistency is by
    /// contract.
    fn spawn_learning(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        assembled: &AssembledContext,
    ) {
        let extractor = self.extractor.clone();
        let user_id = user_id.to_string();
        let message = message.to_string();
        let response = response.to_string();
        let context = assembled.full_context();
        let window_limit = assembled.report.window_limit;

        tokio::spawn(async move {
            let outcome = extractor
                .analyze_turn(&user_id, &message, &response, &context, window_limit)
                .await;
            debug!(
                user_id,
                facts = outcome.facts_extracted,
                pct = outcome.length.percentage_used,
                "Post-turn analysis complete"
            );
        });
    }

    fn fallback_outcome(
        &self,
        name: &str,
        message: &str,
        started: std::time::Instant,
    ) -> TurnOutcome {
        TurnOutcome {
            response: fallback_response(name, message),
            memory_references: Vec::new(),
            metrics: TurnMetrics::fallback(started.elapsed().as_millis() as u64),
        }
    }

    /// Drop all cached context for a user, both in-process and
    /// provider-side. Called after out-of-band profile edits.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.volatile.invalidate(user_id).await;
        self.remote.invalidate(user_id).await;
        info!(user_id, "Invalidated cached context for user");
    }

    /// Current budget report for a user's session, without generating.
    pub async fn check_context_health(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<BudgetReport, Error> {
        let profile = self.profiles.get_profile(user_id).await?;
        let persona = persona_instruction(&profile);
        let assembled = self
            .optimizer
            .assemble(user_id, session_id, "", &persona)
            .await?;
        Ok(assembled.report)
    }

    /// Ask the model for a memory-pruning recommendation. Best-effort:
    /// a provider failure yields a fixed recommendation string.
    pub async fn optimize_context(&self, user_id: &str) -> Result<OptimizeReport, Error> {
        let memories = self
            .memory
            .high_importance(user_id, IMPORTANCE_MIN, OPTIMIZE_MEMORY_LIMIT)
            .await?;
        let memory_count = self.memory.count(user_id).await?;

        let listing: String = memories
            .iter()
            .map(|m| format!("- {} (importance: {:.1})\n", m.content, m.importance))
            .collect();
        let prompt = format!(
            "SYSTEM CONTEXT OPTIMIZATION REQUEST\nUser ID: {user_id}\n\n\
             Current memory entries ({memory_count} total):\n{listing}\n\
             Recommend which memories to keep for optimal context management. \
             Consider importance scores, recency, and relevance."
        );

        let recommendation = match self
            .provider
            .generate(GenerateRequest::new(vec![Message::user(prompt)]))
            .await
        {
            Ok(response) => response.text,
            Err(e) => {
                warn!(user_id, error = %e, "Optimization recommendation failed");
                "Optimization unavailable; retaining all memories".to_string()
            }
        };

        Ok(OptimizeReport {
            memory_count,
            recommendation,
        })
    }

    /// Combined volatile and remote cache health.
    pub async fn cache_stats(&self) -> EngineStats {
        EngineStats {
            volatile: self.volatile.stats().await,
            remote: self.remote.stats().await,
        }
    }

    /// Best-effort sweep of expired remote cache handles. Returns how
    /// many handles were removed from local bookkeeping.
    pub async fn sweep_expired_remote_caches(&self) -> usize {
        self.remote.sweep_expired().await
    }

    /// The token estimator shared across the engine.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }
}

fn persona_instruction(profile: &Profile) -> String {
    let tone = if profile.communication_style.preferred_tone.is_empty() {
        "warm and supportive"
    } else {
        profile.communication_style.preferred_tone.as_str()
    };
    let style = if profile.communication_style.response_style.is_empty() {
        "conversational"
    } else {
        profile.communication_style.response_style.as_str()
    };
    format!(
        "You are {companion}, a caring AI companion for {name}. \
         Speak in a {tone} tone with a {style} style. Use the provided \
         context to stay consistent with what you know about {name}, and \
         use the available functions when you need to recall something \
         that is not in the context.",
        companion = profile.companion_name,
        name = profile.name,
    )
}

/// Keyword overlap between a response and the memories that fed the
/// context. Words of four or more characters count as evidence.
fn extract_memory_references(response: &str, memories: &[MemoryRecord]) -> Vec<String> {
    let response_lower = response.to_lowercase();
    memories
        .iter()
        .filter(|m| {
            m.content
                .to_lowercase()
                .split_whitespace()
                .filter(|word| word.len() > 3)
                .any(|word| response_lower.contains(word))
        })
        .map(|m| m.id.clone())
        .collect()
}
