//! Retrieval dispatch for model-issued function calls.
//!
//! Calls parse into a typed enum before dispatch, so handlers only ever
//! see validated arguments. Dispatch never propagates an error past this
//! boundary: unknown functions and handler failures come back as
//! `{"error": ...}` payloads the model can read, and the conversation
//! continues.

use keepsake_core::error::DispatchError;
use keepsake_core::memory::MemoryStore;
use keepsake_core::profile::{ActivityProvider, InterestProvider};
use keepsake_core::provider::{FunctionCall, FunctionDeclaration};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SEARCH_MEMORIES_BY_TOPIC: &str = "search_memories_by_topic";
pub const GET_INTERESTS_BY_CATEGORY: &str = "get_interests_by_category";
pub const GET_RECENT_ACTIVITIES: &str = "get_recent_activities";

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_ACTIVITY_DAYS: u32 = 7;

/// A validated retrieval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalCall {
    SearchMemoriesByTopic { topic: String, limit: usize },
    GetInterestsByCategory { category: Option<String> },
    GetRecentActivities { days: u32, activity_type: Option<String> },
}

#[derive(Deserialize)]
struct SearchArgs {
    topic: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct InterestArgs {
    #[serde(default)]
    category: Option<String>,
}

#[derive(Deserialize)]
struct ActivityArgs {
    #[serde(default)]
    days: Option<u32>,
    #[serde(default)]
    activity_type: Option<String>,
}

impl RetrievalCall {
    /// Parse and validate a raw function call.
    pub fn parse(call: &FunctionCall) -> Result<Self, DispatchError> {
        let invalid = |reason: String| DispatchError::InvalidArguments {
            function: call.name.clone(),
            reason,
        };

        match call.name.as_str() {
            SEARCH_MEMORIES_BY_TOPIC => {
                let args: SearchArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| invalid(e.to_string()))?;
                if args.topic.trim().is_empty() {
                    return Err(invalid("topic must not be empty".into()));
                }
                Ok(Self::SearchMemoriesByTopic {
                    topic: args.topic,
                    limit: args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
                })
            }
            GET_INTERESTS_BY_CATEGORY => {
                let args: InterestArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| invalid(e.to_string()))?;
                Ok(Self::GetInterestsByCategory {
                    category: args.category,
                })
            }
            GET_RECENT_ACTIVITIES => {
                let args: ActivityArgs =
                    serde_json::from_value(call.args.clone()).map_err(|e| invalid(e.to_string()))?;
                Ok(Self::GetRecentActivities {
                    days: args.days.unwrap_or(DEFAULT_ACTIVITY_DAYS),
                    activity_type: args.activity_type,
                })
            }
            other => Err(DispatchError::UnknownFunction(other.to_string())),
        }
    }
}

/// Result of resolving one retrieval call: the JSON payload fed back to
/// the model, plus the ids of any memory records the call surfaced (these
/// were touched and count as referenced this turn).
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub payload: Value,
    pub memory_ids: Vec<String>,
}

impl DispatchOutcome {
    fn payload_only(payload: Value) -> Self {
        Self {
            payload,
            memory_ids: Vec::new(),
        }
    }
}

/// Resolves retrieval calls against the memory store and collaborators.
pub struct RetrievalDispatcher {
    memory: Arc<dyn MemoryStore>,
    interests: Arc<dyn InterestProvider>,
    activities: Arc<dyn ActivityProvider>,
}

impl RetrievalDispatcher {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        interests: Arc<dyn InterestProvider>,
        activities: Arc<dyn ActivityProvider>,
    ) -> Self {
        Self {
            memory,
            interests,
            activities,
        }
    }

    /// The tool declarations offered to the model each turn.
    pub fn declarations() -> Vec<FunctionDeclaration> {
        vec![
            FunctionDeclaration {
                name: SEARCH_MEMORIES_BY_TOPIC.into(),
                description: "Search stored memories about the user by topic or keyword".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "topic": {
                            "type": "string",
                            "description": "Topic or keyword to search memories for"
                        },
                        "limit": {
                            "type": "number",
                            "description": "Maximum number of memories to return"
                        }
                    },
                    "required": ["topic"]
                }),
            },
            FunctionDeclaration {
                name: GET_INTERESTS_BY_CATEGORY.into(),
                description: "Get the user's interests, optionally filtered by category".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "Interest category to filter by"
                        }
                    }
                }),
            },
            FunctionDeclaration {
                name: GET_RECENT_ACTIVITIES.into(),
                description: "Get the user's recent activities within a day window".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "days": {
                            "type": "number",
                            "description": "How many days back to look"
                        },
                        "activity_type": {
                            "type": "string",
                            "description": "Activity type to filter by"
                        }
                    }
                }),
            },
        ]
    }

    /// Resolve one function call into a payload for the model.
    /// Never returns an error: every failure mode becomes `{"error": ...}`.
    pub async fn dispatch(&self, user_id: &str, call: &FunctionCall) -> DispatchOutcome {
        let parsed = match RetrievalCall::parse(call) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(user_id, function = %call.name, error = %e, "Rejected function call");
                return DispatchOutcome::payload_only(json!({ "error": e.to_string() }));
            }
        };

        match parsed {
            RetrievalCall::SearchMemoriesByTopic { topic, limit } => {
                match self.memory.search_by_topic(user_id, &topic, None, limit).await {
                    Ok(records) => {
                        for record in &records {
                            if let Err(e) = self.memory.touch(&record.id).await {
                                warn!(user_id, id = %record.id, error = %e, "Failed to touch memory");
                            }
                        }
                        let memory_ids = records.iter().map(|r| r.id.clone()).collect();
                        DispatchOutcome {
                            payload: json!({ "memories": records }),
                            memory_ids,
                        }
                    }
                    Err(e) => {
                        warn!(user_id, error = %e, "Memory search failed");
                        DispatchOutcome::payload_only(json!({ "error": "Failed to search memories" }))
                    }
                }
            }
            RetrievalCall::GetInterestsByCategory { category } => {
                match self
                    .interests
                    .interests_by_category(user_id, category.as_deref())
                    .await
                {
                    Ok(interests) => DispatchOutcome::payload_only(json!({ "interests": interests })),
                    Err(e) => {
                        warn!(user_id, error = %e, "Interest lookup failed");
                        DispatchOutcome::payload_only(json!({ "error": "Failed to retrieve interests" }))
                    }
                }
            }
            RetrievalCall::GetRecentActivities { days, activity_type } => {
                match self
                    .activities
                    .recent_activities(user_id, days, activity_type.as_deref())
                    .await
                {
                    Ok(activities) => DispatchOutcome::payload_only(json!({ "activities": activities })),
                    Err(e) => {
                        warn!(user_id, error = %e, "Activity lookup failed");
                        DispatchOutcome::payload_only(json!({ "error": "Failed to retrieve recent activities" }))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::memory::{MemoryRecord, MemoryTopic};
    use keepsake_memory::{
        InMemoryMemoryStore, StaticActivityProvider, StaticInterestProvider,
    };
    use std::collections::HashMap;

    fn dispatcher(memory: Arc<InMemoryMemoryStore>) -> RetrievalDispatcher {
        RetrievalDispatcher::new(
            memory,
            Arc::new(StaticInterestProvider::new(HashMap::new())),
            Arc::new(StaticActivityProvider::new(HashMap::new())),
        )
    }

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            name: name.into(),
            args,
        }
    }

    #[test]
    fn parse_validates_and_applies_defaults() {
        let parsed = RetrievalCall::parse(&call(
            SEARCH_MEMORIES_BY_TOPIC,
            json!({"topic": "Trixie"}),
        ))
        .unwrap();
        assert_eq!(
            parsed,
            RetrievalCall::SearchMemoriesByTopic {
                topic: "Trixie".into(),
                limit: 5
            }
        );

        let parsed =
            RetrievalCall::parse(&call(GET_RECENT_ACTIVITIES, json!({}))).unwrap();
        assert_eq!(
            parsed,
            RetrievalCall::GetRecentActivities {
                days: 7,
                activity_type: None
            }
        );
    }

    #[test]
    fn parse_rejects_empty_topic_and_unknown_name() {
        let err = RetrievalCall::parse(&call(SEARCH_MEMORIES_BY_TOPIC, json!({"topic": " "})))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArguments { .. }));

        let err = RetrievalCall::parse(&call("get_weather", json!({}))).unwrap_err();
        assert_eq!(err.to_string(), "unknown function: get_weather");
    }

    #[tokio::test]
    async fn unknown_function_becomes_structured_error() {
        let result = dispatcher(Arc::new(InMemoryMemoryStore::new()))
            .dispatch("u1", &call("get_weather", json!({})))
            .await;
        assert_eq!(result.payload["error"], "unknown function: get_weather");
        assert!(result.memory_ids.is_empty());
    }

    #[tokio::test]
    async fn search_returns_and_touches_matching_memory() {
        let memory = Arc::new(InMemoryMemoryStore::new());
        memory
            .write(MemoryRecord::new(
                "u1",
                "has a cat named Trixie",
                MemoryTopic::Personal,
                0.9,
                vec![],
            ))
            .await
            .unwrap();
        memory
            .write(MemoryRecord::new(
                "u1",
                "won the spelling bee",
                MemoryTopic::Achievement,
                0.8,
                vec![],
            ))
            .await
            .unwrap();
        let before = memory.search_by_topic("u1", "trixie", None, 1).await.unwrap()[0]
            .last_referenced_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let result = dispatcher(memory.clone())
            .dispatch("u1", &call(SEARCH_MEMORIES_BY_TOPIC, json!({"topic": "Trixie"})))
            .await;

        let memories = result.payload["memories"].as_array().unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0]["content"], "has a cat named Trixie");
        assert_eq!(result.memory_ids.len(), 1);
        assert_eq!(result.memory_ids[0], memories[0]["id"].as_str().unwrap());

        let after = memory.search_by_topic("u1", "trixie", None, 1).await.unwrap()[0]
            .last_referenced_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn malformed_args_become_structured_error() {
        let result = dispatcher(Arc::new(InMemoryMemoryStore::new()))
            .dispatch("u1", &call(SEARCH_MEMORIES_BY_TOPIC, json!({"limit": 3})))
            .await;
        assert!(result.payload["error"]
            .as_str()
            .unwrap()
            .contains("invalid arguments"));
    }

    #[tokio::test]
    async fn interests_dispatch_returns_list() {
        let mut map = HashMap::new();
        map.insert(
            "u1".to_string(),
            vec![keepsake_core::profile::Interest {
                content: "watercolor".into(),
                category: "art".into(),
                importance: 0.9,
            }],
        );
        let dispatcher = RetrievalDispatcher::new(
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(StaticInterestProvider::new(map)),
            Arc::new(StaticActivityProvider::new(HashMap::new())),
        );

        let result = dispatcher
            .dispatch("u1", &call(GET_INTERESTS_BY_CATEGORY, json!({"category": "art"})))
            .await;
        assert_eq!(result.payload["interests"].as_array().unwrap().len(), 1);
        assert!(result.memory_ids.is_empty());
    }
}
