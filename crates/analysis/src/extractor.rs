//! Salient fact extraction and context length monitoring.
//!
//! Two provider calls per analysis, under two strictly separate system
//! roles. The fact extractor and the length monitor must never share an
//! instruction: the model analyzes the conversation, it does not join it.
//! Every failure path here degrades to "zero facts extracted" — learning
//! is best-effort and never blocks a turn.

use keepsake_core::error::MemoryError;
use keepsake_core::memory::{MemoryRecord, MemoryStore, MemoryTopic};
use keepsake_core::provider::{FunctionDeclaration, GenerateRequest, ModelProvider};
use keepsake_core::turn::Message;
use keepsake_context::{estimate_tokens, BudgetVerdict};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// System role for the extraction call. Identifies this code as an
/// internal analysis component, not the companion persona.
const FACT_EXTRACTION_INSTRUCTION: &str = "\
You are the CONTEXT ANALYSIS SYSTEM for the Keepsake companion engine.

IMPORTANT: You are NOT talking to the user. You are an internal system \
component helping the application manage conversation context and memory.

Your role is to analyze conversations between the companion and the user \
to identify salient facts that should be stored for future reference.

ANALYSIS CRITERIA:
- Personal details (pets, family, friends, school, hobbies)
- Interests and preferences (favorite activities, foods, colors)
- Achievements and milestones (completed projects, learned skills, awards)
- Concerns or challenges (fears, difficulties, struggles)
- Relationships (friends, family dynamics, social situations)
- Goals and aspirations (what they want to learn or achieve)

IMPORTANCE SCORING:
- 0.9-1.0: Critical facts (names of pets/friends, major life events, core interests)
- 0.7-0.8: Important details (specific preferences, achievements, ongoing activities)
- 0.5-0.6: Useful context (casual mentions, temporary interests)
- 0.3-0.4: Minor details (one-time events, passing comments)

For each salient fact, use the save_salient_fact function to store it. \
Focus on facts that help the companion maintain continuity in future \
conversations.";

/// System role for the length-monitoring call.
const LENGTH_MONITOR_INSTRUCTION: &str = "\
You are the CONTEXT LENGTH MONITOR for the Keepsake companion engine.

IMPORTANT: You are NOT talking to the user. You are an internal system \
component helping manage conversation context limits.

Analyze the current context size and respond with a JSON object containing:
- estimated_tokens: your estimate of the current token count
- percentage_used: estimated percentage of the context window used (0-100)
- should_optimize: boolean, true if context should be compressed
- should_spawn: boolean, true if a replacement context is needed
- recommendation: brief explanation

Thresholds: optimize above 75% utilization, spawn above 85%.";

/// Name of the function offered to the extraction model.
pub const SAVE_SALIENT_FACT: &str = "save_salient_fact";

/// Best-effort context pressure verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LengthVerdict {
    pub estimated_tokens: usize,
    pub percentage_used: f32,
    pub should_optimize: bool,
    pub should_spawn: bool,
    #[serde(default)]
    pub recommendation: String,
}

impl LengthVerdict {
    /// Deterministic verdict from the token estimator, used when the
    /// model's answer is missing or unparseable.
    pub fn fallback(context: &str, window_limit: usize) -> Self {
        let estimated_tokens = estimate_tokens(context);
        let percentage_used = if window_limit == 0 {
            100.0
        } else {
            ((estimated_tokens as f32 / window_limit as f32) * 100.0).min(100.0)
        };
        Self {
            estimated_tokens,
            percentage_used,
            should_optimize: percentage_used > 75.0,
            should_spawn: percentage_used > 85.0,
            recommendation: format!("Estimated {percentage_used:.1}% context usage"),
        }
    }

    pub fn verdict(&self) -> BudgetVerdict {
        if self.should_spawn {
            BudgetVerdict::Spawn
        } else if self.should_optimize {
            BudgetVerdict::Optimize
        } else {
            BudgetVerdict::Ok
        }
    }
}

/// Result of one post-turn analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Facts written to the memory store.
    pub facts_extracted: usize,
    pub length: LengthVerdict,
}

/// Raw tuple as emitted by the model, before clamping.
#[derive(Debug, Deserialize)]
struct SalientFactArgs {
    content: String,
    importance: f32,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    related_topics: Vec<String>,
}

/// Extracts durable facts from turn pairs and monitors context pressure.
pub struct SalientFactExtractor {
    provider: Arc<dyn ModelProvider>,
    memory: Arc<dyn MemoryStore>,
}

impl SalientFactExtractor {
    pub fn new(provider: Arc<dyn ModelProvider>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { provider, memory }
    }

    /// The tool declaration offered to the extraction model.
    pub fn save_salient_fact_declaration() -> FunctionDeclaration {
        FunctionDeclaration {
            name: SAVE_SALIENT_FACT.into(),
            description: "Save an important fact about the user that should be remembered".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "The salient fact to remember about the user"
                    },
                    "importance": {
                        "type": "number",
                        "description": "Importance score from 0.1 to 1.0"
                    },
                    "topic": {
                        "type": "string",
                        "description": "Type of memory: personal, interest, relationship, achievement, preference, concern"
                    },
                    "related_topics": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Related keywords and topics for search"
                    }
                },
                "required": ["content", "importance", "topic", "related_topics"]
            }),
        }
    }

    /// Analyze a completed turn pair: check length pressure, then extract
    /// and store salient facts. Never returns an error — every failure
    /// degrades to zero facts.
    pub async fn analyze_turn(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_response: &str,
        serialized_context: &str,
        window_limit: usize,
    ) -> AnalysisOutcome {
        let length = self.check_context_length(serialized_context, window_limit).await;
        let facts_extracted = self
            .extract_facts(user_id, user_message, assistant_response)
            .await;

        AnalysisOutcome {
            facts_extracted,
            length,
        }
    }

    /// Ask the length monitor for a verdict, falling back to the
    /// deterministic estimator when the answer is missing or malformed.
    pub async fn check_context_length(
        &self,
        serialized_context: &str,
        window_limit: usize,
    ) -> LengthVerdict {
        let summary = format!(
            "SYSTEM CONTEXT LENGTH CHECK REQUEST\n\n\
             Total context size: {} characters\n\
             Context window limit: {window_limit} tokens\n\n\
             Analyze whether we are approaching context limits and respond \
             with the JSON object described in your instructions.",
            serialized_context.chars().count(),
        );

        let request = GenerateRequest::new(vec![Message::user(summary)])
            .with_system_instruction(LENGTH_MONITOR_INSTRUCTION);

        match self.provider.generate(request).await {
            Ok(response) => match serde_json::from_str::<LengthVerdict>(response.text.trim()) {
                Ok(verdict) => verdict,
                Err(e) => {
                    debug!(error = %e, "Length monitor response unparseable, using estimator");
                    LengthVerdict::fallback(serialized_context, window_limit)
                }
            },
            Err(e) => {
                warn!(error = %e, "Length monitor call failed, using estimator");
                LengthVerdict::fallback(serialized_context, window_limit)
            }
        }
    }

    async fn extract_facts(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_response: &str,
    ) -> usize {
        let prompt = format!(
            "SYSTEM CONTEXT ANALYSIS REQUEST\nUser ID: {user_id}\n\n\
             Recent conversation to analyze:\n\
             User: {user_message}\n\
             Companion: {assistant_response}\n\n\
             Extract any salient facts that should be remembered about this \
             user for future conversations."
        );

        let request = GenerateRequest::new(vec![Message::user(prompt)])
            .with_system_instruction(FACT_EXTRACTION_INSTRUCTION)
            .with_tools(vec![Self::save_salient_fact_declaration()]);

        let response = match self.provider.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(user_id, error = %e, "Fact extraction call failed");
                return 0;
            }
        };

        let mut stored = 0;
        for call in &response.function_calls {
            if call.name != SAVE_SALIENT_FACT {
                debug!(user_id, function = %call.name, "Ignoring unexpected function call");
                continue;
            }
            match self.store_fact(user_id, call.args.clone()).await {
                Ok(content) => {
                    stored += 1;
                    info!(
                        user_id,
                        fact = %content.chars().take(50).collect::<String>(),
                        "Stored salient fact"
                    );
                }
                Err(e) => warn!(user_id, error = %e, "Failed to store salient fact"),
            }
        }
        stored
    }

    async fn store_fact(
        &self,
        user_id: &str,
        args: serde_json::Value,
    ) -> Result<String, MemoryError> {
        let args: SalientFactArgs = serde_json::from_value(args)
            .map_err(|e| MemoryError::Storage(format!("malformed fact tuple: {e}")))?;

        let record = MemoryRecord::new(
            user_id,
            args.content.clone(),
            MemoryTopic::parse_lenient(&args.topic),
            args.importance,
            args.related_topics,
        );
        self.memory.write(record).await?;
        Ok(args.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keepsake_core::error::ProviderError;
    use keepsake_core::provider::{FunctionCall, ModelResponse};
    use keepsake_memory::InMemoryMemoryStore;
    use tokio::sync::Mutex;

    /// Replays a fixed queue of responses.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<ModelResponse, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: GenerateRequest,
        ) -> Result<ModelResponse, ProviderError> {
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                return Err(ProviderError::Unavailable("script exhausted".into()));
            }
            responses.remove(0)
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
            Ok("ok".into())
        }

        async fn delete_cached_content(&self, _handle: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn fact_call(content: &str, importance: f32, topic: &str) -> FunctionCall {
        FunctionCall {
            name: SAVE_SALIENT_FACT.into(),
            args: json!({
                "content": content,
                "importance": importance,
                "topic": topic,
                "related_topics": ["cats"]
            }),
        }
    }

    fn response_with_calls(calls: Vec<FunctionCall>) -> ModelResponse {
        ModelResponse {
            text: String::new(),
            function_calls: calls,
        }
    }

    #[tokio::test]
    async fn extracted_facts_are_clamped_and_stored() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            // Length monitor answer
            Ok(ModelResponse::text("not json at all")),
            // Extraction answer: one fact with out-of-range importance
            Ok(response_with_calls(vec![fact_call(
                "has a cat named Trixie",
                1.7,
                "personal",
            )])),
        ]));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let extractor = SalientFactExtractor::new(provider, memory.clone());

        let outcome = extractor
            .analyze_turn("u1", "my cat Trixie did a flip", "That's amazing!", "ctx", 900_000)
            .await;

        assert_eq!(outcome.facts_extracted, 1);
        let stored = memory.search_by_topic("u1", "trixie", None, 5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].importance, 1.0);
        assert_eq!(stored[0].topic, MemoryTopic::Personal);
    }

    #[tokio::test]
    async fn provider_failure_yields_zero_facts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Unavailable("down".into())),
            Err(ProviderError::Unavailable("down".into())),
        ]));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let extractor = SalientFactExtractor::new(provider, memory.clone());

        let outcome = extractor
            .analyze_turn("u1", "hello", "hi", "ctx", 900_000)
            .await;

        assert_eq!(outcome.facts_extracted, 0);
        assert_eq!(memory.count("u1").await.unwrap(), 0);
        // Fallback verdict is still produced
        assert!(!outcome.length.should_optimize);
    }

    #[tokio::test]
    async fn malformed_tuple_is_skipped_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ModelResponse::text("{}")),
            Ok(response_with_calls(vec![
                FunctionCall {
                    name: SAVE_SALIENT_FACT.into(),
                    args: json!({"importance": "not a number"}),
                },
                fact_call("loves painting", 0.8, "interest"),
            ])),
        ]));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let extractor = SalientFactExtractor::new(provider, memory.clone());

        let outcome = extractor
            .analyze_turn("u1", "I painted all day", "Lovely!", "ctx", 900_000)
            .await;

        assert_eq!(outcome.facts_extracted, 1);
        assert_eq!(memory.count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unexpected_function_names_are_ignored() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ModelResponse::text("{}")),
            Ok(response_with_calls(vec![FunctionCall {
                name: "delete_everything".into(),
                args: json!({}),
            }])),
        ]));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let extractor = SalientFactExtractor::new(provider, memory.clone());

        let outcome = extractor.analyze_turn("u1", "hi", "hello", "ctx", 900_000).await;
        assert_eq!(outcome.facts_extracted, 0);
    }

    #[tokio::test]
    async fn parseable_length_verdict_passes_through() {
        let verdict_json = json!({
            "estimated_tokens": 800_000,
            "percentage_used": 88.9,
            "should_optimize": true,
            "should_spawn": true,
            "recommendation": "spawn a fresh context"
        })
        .to_string();
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ModelResponse::text(
            verdict_json,
        ))]));
        let memory = Arc::new(InMemoryMemoryStore::new());
        let extractor = SalientFactExtractor::new(provider, memory);

        let verdict = extractor.check_context_length("ctx", 900_000).await;
        assert!(verdict.should_spawn);
        assert_eq!(verdict.verdict(), BudgetVerdict::Spawn);
    }

    #[test]
    fn fallback_verdict_uses_estimator_thresholds() {
        // ~2.8M chars → 800k tokens → 80% of a 1M window
        let context = "a".repeat(2_800_000);
        let verdict = LengthVerdict::fallback(&context, 1_000_000);
        assert!(verdict.should_optimize);
        assert!(!verdict.should_spawn);
        assert_eq!(verdict.verdict(), BudgetVerdict::Optimize);
    }
}
