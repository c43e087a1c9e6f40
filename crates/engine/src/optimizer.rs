//! Per-turn context assembly and budgeting.
//!
//! The optimizer owns the turn pipeline up to the point where a request
//! is ready to send: fingerprint the static inputs, consult the volatile
//! cache, rebuild on miss (model-assisted split with a deterministic
//! fallback), budget the assembled context, and spawn a compacted
//! replacement when the budget demands it. Compaction is turn-scoped: it
//! never mutates the memory store and is never cached under the
//! fingerprint, since the fingerprint identifies the uncompacted inputs.

use keepsake_context::{
    fingerprint_static_context, BudgetReport, BudgetVerdict, ContextFingerprint,
    RemoteContentCache, TokenEstimator, VolatileContextCache,
};
use keepsake_core::error::{CacheError, Error};
use keepsake_core::memory::{MemoryRecord, MemoryStore};
use keepsake_core::profile::{Profile, ProfileProvider};
use keepsake_core::provider::{GenerateRequest, ModelProvider};
use keepsake_core::turn::{ConversationTurn, Message, TurnStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns included in the dynamic context.
const DYNAMIC_TURN_LIMIT: usize = 5;
/// Per-turn character cap inside the dynamic context.
const DYNAMIC_TURN_CHAR_CAP: usize = 150;
/// Memories at or above this importance feed the static context.
const STATIC_IMPORTANCE_MIN: f32 = 0.7;
/// At most this many memories in the static context.
const STATIC_MEMORY_LIMIT: usize = 10;
/// At most this many interests in the static context.
const STATIC_INTEREST_LIMIT: usize = 10;

/// Everything the engine needs to generate a response for one turn.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub profile: Profile,
    /// High-importance memories that fed the static context.
    pub memories: Vec<MemoryRecord>,
    pub fingerprint: ContextFingerprint,
    pub static_context: String,
    pub dynamic_context: String,
    /// Compacted replacement for this turn only, present when the budget
    /// verdict was `Spawn` and compaction succeeded.
    pub compacted: Option<String>,
    pub report: BudgetReport,
    pub cache_hit: bool,
    /// Whether the static payload is large enough for the remote cache.
    pub escalate_to_remote: bool,
}

impl AssembledContext {
    /// The context to actually send this turn.
    pub fn full_context(&self) -> String {
        match &self.compacted {
            Some(compacted) => compacted.clone(),
            None => format!("{}\n\n{}", self.static_context, self.dynamic_context),
        }
    }
}

/// Assembles, caches, and budgets conversation context.
pub struct ContextOptimizer {
    provider: Arc<dyn ModelProvider>,
    memory: Arc<dyn MemoryStore>,
    profiles: Arc<dyn ProfileProvider>,
    turns: Arc<dyn TurnStore>,
    estimator: Arc<TokenEstimator>,
    volatile: Arc<VolatileContextCache>,
    remote: Arc<RemoteContentCache>,
}

impl ContextOptimizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        memory: Arc<dyn MemoryStore>,
        profiles: Arc<dyn ProfileProvider>,
        turns: Arc<dyn TurnStore>,
        estimator: Arc<TokenEstimator>,
        volatile: Arc<VolatileContextCache>,
        remote: Arc<RemoteContentCache>,
    ) -> Self {
        Self {
            provider,
            memory,
            profiles,
            turns,
            estimator,
            volatile,
            remote,
        }
    }

    /// Run the assembly pipeline for one turn.
    pub async fn assemble(
        &self,
        user_id: &str,
        session_id: &str,
        user_message: &str,
        system_instruction: &str,
    ) -> Result<AssembledContext, Error> {
        let profile = self.profiles.get_profile(user_id).await?;

        // Memory fetch failures degrade to an empty static memory section;
        // the turn must still go out.
        let memories = match self
            .memory
            .high_importance(user_id, STATIC_IMPORTANCE_MIN, STATIC_MEMORY_LIMIT)
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!(user_id, error = %e, "Memory fetch failed during assembly");
                Vec::new()
            }
        };

        let recent = match self
            .turns
            .recent(user_id, session_id, DYNAMIC_TURN_LIMIT)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!(user_id, error = %e, "Turn history fetch failed during assembly");
                Vec::new()
            }
        };

        let fingerprint = fingerprint_static_context(&profile, &memories);

        let (static_context, dynamic_context, cache_hit) =
            match self.volatile.get(user_id, &fingerprint).await {
                Some(cached) => {
                    debug!(user_id, "Volatile cache hit for static context");
                    (cached, build_dynamic_context(&recent), true)
                }
                None => {
                    let (static_ctx, dynamic_ctx) =
                        self.build_split(&profile, &memories, &recent).await;
                    self.volatile
                        .put(user_id, &fingerprint, static_ctx.clone())
                        .await;
                    (static_ctx, dynamic_ctx, false)
                }
            };

        let tier = self.estimator.tier_for(self.provider.as_ref()).await;
        let window_limit = self.estimator.window_limit_for(tier);
        let input_tokens = self.estimator.estimate(system_instruction)
            + self.estimator.estimate(&static_context)
            + self.estimator.estimate(&dynamic_context)
            + self.estimator.estimate(user_message);
        let report = BudgetReport::new(input_tokens, window_limit);

        if report.exceeds_window() {
            let overflow = CacheError::BudgetExceeded {
                estimated_tokens: report.estimated_tokens,
                window_limit,
            };
            warn!(user_id, error = %overflow, "Forcing compaction for over-window context");
        }

        let compacted = if report.verdict == BudgetVerdict::Spawn {
            self.compact(user_id, &static_context, &dynamic_context, &memories)
                .await
        } else {
            None
        };

        let escalate_to_remote = self.remote.worth_caching(&static_context);

        Ok(AssembledContext {
            profile,
            memories,
            fingerprint,
            static_context,
            dynamic_context,
            compacted,
            report,
            cache_hit,
            escalate_to_remote,
        })
    }

    /// Model-assisted static/dynamic split, with the deterministic
    /// template builders as fallback. The fallback must produce a usable
    /// context without any provider call.
    async fn build_split(
        &self,
        profile: &Profile,
        memories: &[MemoryRecord],
        recent: &[ConversationTurn],
    ) -> (String, String) {
        let fallback_static = build_static_context(profile, memories);
        let fallback_dynamic = build_dynamic_context(recent);

        let prompt = format!(
            "Analyze this companion context and separate it into:\n\
             1. STATIC content (identity, core interests, important memories that rarely change)\n\
             2. DYNAMIC content (recent conversation, current session state)\n\n\
             Context data:\n{fallback_static}\n\n{fallback_dynamic}\n\n\
             Return in format:\nSTATIC:\n[content here]\n\nDYNAMIC:\n[content here]"
        );

        match self
            .provider
            .generate(GenerateRequest::new(vec![Message::user(prompt)]))
            .await
        {
            Ok(response) => match parse_split(&response.text) {
                Some((static_ctx, dynamic_ctx)) => (static_ctx, dynamic_ctx),
                None => {
                    debug!("Split response unparseable, using template context");
                    (fallback_static, fallback_dynamic)
                }
            },
            Err(e) => {
                warn!(error = %e, "Context split call failed, using template context");
                (fallback_static, fallback_dynamic)
            }
        }
    }

    /// Ask the model for a compacted replacement context. Turn-scoped:
    /// the memory store is never mutated here, and the result is never
    /// cached under the fingerprint.
    async fn compact(
        &self,
        user_id: &str,
        static_context: &str,
        dynamic_context: &str,
        memories: &[MemoryRecord],
    ) -> Option<String> {
        let memory_lines: String = memories
            .iter()
            .map(|m| format!("- {} (importance: {:.1})\n", m.content, m.importance))
            .collect();

        let prompt = format!(
            "SYSTEM CONTEXT COMPACTION REQUEST\n\n\
             The context below is too large for the model window. Produce a \
             compacted replacement that preserves the most important \
             memories, the user's identity, and the recent conversation. \
             Respond with the compacted context only.\n\n\
             Memories by importance:\n{memory_lines}\n\
             Static context:\n{static_context}\n\n\
             Dynamic context:\n{dynamic_context}"
        );

        match self
            .provider
            .generate(GenerateRequest::new(vec![Message::user(prompt)]))
            .await
        {
            Ok(response) if !response.text.trim().is_empty() => {
                info!(user_id, "Using compacted replacement context for this turn");
                Some(response.text)
            }
            Ok(_) => {
                warn!(user_id, "Compaction returned empty text, keeping assembled context");
                None
            }
            Err(e) => {
                warn!(user_id, error = %e, "Compaction failed, keeping assembled context");
                None
            }
        }
    }
}

/// Deterministic static context template.
pub fn build_static_context(profile: &Profile, memories: &[MemoryRecord]) -> String {
    let interests = if profile.top_interests.is_empty() {
        "Still learning about interests".to_string()
    } else {
        profile
            .top_interests
            .iter()
            .take(STATIC_INTEREST_LIMIT)
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let memory_section = if memories.is_empty() {
        "Building new memories".to_string()
    } else {
        memories
            .iter()
            .map(|m| format!("- {} ({})", m.content, m.topic.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "STATIC USER CONTEXT FOR {name}:\n\n\
         CORE IDENTITY:\n\
         - Name: {name}\n\
         - Companion name: {companion}\n\n\
         COMMUNICATION STYLE:\n\
         - Preferred tone: {tone}\n\
         - Response style: {style}\n\n\
         CORE INTERESTS (top {interest_limit}):\n{interests}\n\n\
         IMPORTANT MEMORIES:\n{memory_section}",
        name = profile.name,
        companion = profile.companion_name,
        tone = display_or(&profile.communication_style.preferred_tone, "warm and supportive"),
        style = display_or(&profile.communication_style.response_style, "conversational"),
        interest_limit = STATIC_INTEREST_LIMIT,
    )
}

/// Deterministic dynamic context template: the last five turns, each
/// capped at 150 characters.
pub fn build_dynamic_context(recent: &[ConversationTurn]) -> String {
    let exchanges = if recent.is_empty() {
        "No recent exchanges".to_string()
    } else {
        recent
            .iter()
            .rev()
            .take(DYNAMIC_TURN_LIMIT)
            .rev()
            .map(|t| format!("{}: {}", t.role.as_str(), truncate(&t.content, DYNAMIC_TURN_CHAR_CAP)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!("DYNAMIC CONTEXT:\n\nRECENT CONVERSATION EXCHANGES:\n{exchanges}")
}

fn display_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn truncate(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        let head: String = text.chars().take(cap).collect();
        format!("{head}...")
    }
}

fn parse_split(text: &str) -> Option<(String, String)> {
    let static_start = text.find("STATIC:")?;
    let dynamic_start = text.find("DYNAMIC:")?;
    if dynamic_start <= static_start {
        return None;
    }
    let static_part = text[static_start + "STATIC:".len()..dynamic_start].trim();
    let dynamic_part = text[dynamic_start + "DYNAMIC:".len()..].trim();
    if static_part.is_empty() || dynamic_part.is_empty() {
        return None;
    }
    Some((static_part.to_string(), dynamic_part.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keepsake_context::{TierCache, ModelTier};
    use keepsake_core::error::ProviderError;
    use keepsake_core::memory::{MemoryTopic, MemoryRecord};
    use keepsake_core::provider::ModelResponse;
    use keepsake_core::turn::Role;
    use keepsake_memory::{InMemoryMemoryStore, InMemoryTurnLog, StaticProfileProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every generate with a fixed text and counts calls.
    struct CountingProvider {
        reply: String,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(
            &self,
            _request: GenerateRequest,
        ) -> Result<ModelResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse::text(self.reply.clone()))
        }

        async fn upload_cached_content(
            &self,
            _content: &str,
            _ttl_secs: u64,
        ) -> Result<String, ProviderError> {
            Ok("handle".into())
        }

        async fn generate_with_handle(
            &self,
            _handle: &str,
            _prompt: &str,
            _system_instruction: Option<&str>,
        ) -> Result<String, ProviderError> {
            Ok(self.reply.clone())
        }

        async fn delete_cached_content(&self, _handle: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn profile() -> Profile {
        Profile {
            user_id: "u1".into(),
            name: "Maya".into(),
            companion_name: "Stella".into(),
            age: Some(12),
            top_interests: vec!["painting".into(), "astronomy".into()],
            communication_style: Default::default(),
        }
    }

    fn optimizer(provider: Arc<dyn ModelProvider>) -> ContextOptimizer {
        ContextOptimizer::new(
            provider.clone(),
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(StaticProfileProvider::new(vec![profile()])),
            Arc::new(InMemoryTurnLog::new()),
            Arc::new(TokenEstimator::new(TierCache::pinned(ModelTier::Low))),
            Arc::new(VolatileContextCache::new(3600, 100)),
            Arc::new(RemoteContentCache::new(provider, 60, 2048)),
        )
    }

    #[test]
    fn static_template_contains_identity_and_memories() {
        let mem = MemoryRecord::new("u1", "has a cat named Trixie", MemoryTopic::Personal, 0.9, vec![]);
        let ctx = build_static_context(&profile(), &[mem]);
        assert!(ctx.contains("Maya"));
        assert!(ctx.contains("Stella"));
        assert!(ctx.contains("painting"));
        assert!(ctx.contains("Trixie"));
        assert!(ctx.contains("warm and supportive"));
    }

    #[test]
    fn dynamic_template_caps_turns_and_length() {
        let turns: Vec<ConversationTurn> = (0..8)
            .map(|i| ConversationTurn::new("u1", "s1", Role::User, "x".repeat(200) + &i.to_string()))
            .collect();
        let ctx = build_dynamic_context(&turns);

        let exchange_lines: Vec<&str> = ctx.lines().filter(|l| l.starts_with("user:")).collect();
        assert_eq!(exchange_lines.len(), 5);
        for line in exchange_lines {
            assert!(line.ends_with("..."));
            // "user: " + 150 chars + "..."
            assert_eq!(line.chars().count(), 6 + 150 + 3);
        }
    }

    #[test]
    fn split_parser_handles_well_formed_and_garbage() {
        let good = "STATIC:\nidentity stuff\n\nDYNAMIC:\nrecent stuff";
        let (s, d) = parse_split(good).unwrap();
        assert_eq!(s, "identity stuff");
        assert_eq!(d, "recent stuff");

        assert!(parse_split("no markers at all").is_none());
        assert!(parse_split("DYNAMIC:\nx\nSTATIC:\ny").is_none());
        assert!(parse_split("STATIC:\n\nDYNAMIC:\nx").is_none());
    }

    #[tokio::test]
    async fn unparseable_split_falls_back_to_template() {
        let provider = Arc::new(CountingProvider::new("I cannot do that"));
        let opt = optimizer(provider);

        let assembled = opt.assemble("u1", "s1", "hello", "be kind").await.unwrap();
        assert!(assembled.static_context.contains("STATIC USER CONTEXT FOR Maya"));
        assert!(!assembled.cache_hit);
        assert_eq!(assembled.report.verdict, BudgetVerdict::Ok);
    }

    #[tokio::test]
    async fn second_assemble_hits_volatile_cache() {
        let provider = Arc::new(CountingProvider::new("STATIC:\ncore\n\nDYNAMIC:\nrecent"));
        let opt = optimizer(provider.clone());

        let first = opt.assemble("u1", "s1", "hello", "be kind").await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.static_context, "core");
        let calls_after_first = provider.calls.load(Ordering::SeqCst);

        let second = opt.assemble("u1", "s1", "hello again", "be kind").await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.static_context, "core");
        // No additional split call on a cache hit
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn spawn_verdict_requests_compaction_without_touching_memory() {
        let provider = Arc::new(CountingProvider::new("compact summary"));
        let memory = Arc::new(InMemoryMemoryStore::new());
        // A memory large enough to push a 900k-token window past 85%
        memory
            .write(MemoryRecord::new(
                "u1",
                "x".repeat(2_900_000),
                MemoryTopic::Personal,
                0.9,
                vec![],
            ))
            .await
            .unwrap();

        let opt = ContextOptimizer::new(
            provider.clone(),
            memory.clone(),
            Arc::new(StaticProfileProvider::new(vec![profile()])),
            Arc::new(InMemoryTurnLog::new()),
            Arc::new(TokenEstimator::new(TierCache::pinned(ModelTier::Low))),
            Arc::new(VolatileContextCache::new(3600, 100)),
            Arc::new(RemoteContentCache::new(provider.clone(), 60, 2048)),
        );

        let assembled = opt.assemble("u1", "s1", "hi", "be kind").await.unwrap();
        assert_eq!(assembled.report.verdict, BudgetVerdict::Spawn);
        assert_eq!(assembled.compacted.as_deref(), Some("compact summary"));
        assert_eq!(assembled.full_context(), "compact summary");
        // Compaction is turn-scoped
        assert_eq!(memory.count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn over_window_context_is_compacted() {
        let provider = Arc::new(CountingProvider::new("compact summary"));
        let memory = Arc::new(InMemoryMemoryStore::new());
        // Past the 900k-token window outright, not just past the spawn
        // threshold
        memory
            .write(MemoryRecord::new(
                "u1",
                "x".repeat(3_200_000),
                MemoryTopic::Personal,
                0.9,
                vec![],
            ))
            .await
            .unwrap();

        let opt = ContextOptimizer::new(
            provider.clone(),
            memory,
            Arc::new(StaticProfileProvider::new(vec![profile()])),
            Arc::new(InMemoryTurnLog::new()),
            Arc::new(TokenEstimator::new(TierCache::pinned(ModelTier::Low))),
            Arc::new(VolatileContextCache::new(3600, 100)),
            Arc::new(RemoteContentCache::new(provider, 60, 2048)),
        );

        let assembled = opt.assemble("u1", "s1", "hi", "be kind").await.unwrap();
        assert!(assembled.report.exceeds_window());
        assert_eq!(assembled.report.verdict, BudgetVerdict::Spawn);
        assert_eq!(assembled.full_context(), "compact summary");
    }

    #[tokio::test]
    async fn small_static_payload_is_not_escalated() {
        let provider = Arc::new(CountingProvider::new("STATIC:\ntiny\n\nDYNAMIC:\nalso tiny"));
        let opt = optimizer(provider);
        let assembled = opt.assemble("u1", "s1", "hello", "be kind").await.unwrap();
        assert!(!assembled.escalate_to_remote);
    }
}
