//! MemoryStore trait — durable, importance-scored facts about a user.
//!
//! Salient facts are written by the analysis pipeline and surfaced back to
//! the model either in the static context (high-importance records) or on
//! demand through the retrieval dispatcher. Records are never hard-deleted;
//! retirement by age or low importance is owned by the persistence
//! collaborator behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Importance floor for a stored fact.
pub const IMPORTANCE_MIN: f32 = 0.1;
/// Importance ceiling for a stored fact.
pub const IMPORTANCE_MAX: f32 = 1.0;

/// Clamp a raw model-emitted importance score into [0.1, 1.0].
///
/// Non-finite input (the model occasionally emits garbage) clamps to the
/// floor rather than poisoning the record.
pub fn clamp_importance(raw: f32) -> f32 {
    if !raw.is_finite() {
        return IMPORTANCE_MIN;
    }
    raw.clamp(IMPORTANCE_MIN, IMPORTANCE_MAX)
}

/// The category of a stored fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTopic {
    Personal,
    Interest,
    Relationship,
    Achievement,
    Preference,
    Concern,
}

impl MemoryTopic {
    /// Parse a model-emitted topic string. Unknown strings fall back to
    /// `Personal` — a mislabeled fact is still worth keeping.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "interest" => Self::Interest,
            "relationship" => Self::Relationship,
            "achievement" => Self::Achievement,
            "preference" => Self::Preference,
            "concern" => Self::Concern,
            _ => Self::Personal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Interest => "interest",
            Self::Relationship => "relationship",
            Self::Achievement => "achievement",
            Self::Preference => "preference",
            Self::Concern => "concern",
        }
    }
}

/// A single durable fact about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID for this record
    pub id: String,

    /// The user this fact belongs to
    pub user_id: String,

    /// The fact itself, as prose
    pub content: String,

    /// Fact category
    pub topic: MemoryTopic,

    /// Importance score, always in [0.1, 1.0]
    pub importance: f32,

    /// Related keywords and topics, used for retrieval
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_topics: Vec<String>,

    /// When this fact was first stored
    pub created_at: DateTime<Utc>,

    /// When this fact was last surfaced to the model
    pub last_referenced_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Build a new record, clamping importance on the way in.
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        topic: MemoryTopic,
        importance: f32,
        related_topics: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(), // assigned by the store
            user_id: user_id.into(),
            content: content.into(),
            topic,
            importance: clamp_importance(importance),
            related_topics,
            created_at: now,
            last_referenced_at: now,
        }
    }
}

/// Durable store for salient facts.
///
/// Searching a user with no memories returns an empty list, not an error —
/// absence of memories is a normal state, not a fault.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a record, clamping importance. Returns the assigned id.
    async fn write(&self, record: MemoryRecord) -> std::result::Result<String, MemoryError>;

    /// Keyword search over content and related topics, ordered by
    /// importance descending, ties broken by most-recent
    /// `last_referenced_at`. `topic_filter` optionally restricts by
    /// category.
    async fn search_by_topic(
        &self,
        user_id: &str,
        topic: &str,
        topic_filter: Option<MemoryTopic>,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Bump `last_referenced_at` without altering importance. Called
    /// whenever a memory is surfaced to the model.
    async fn touch(&self, id: &str) -> std::result::Result<(), MemoryError>;

    /// Records at or above an importance threshold, most important first.
    /// Feeds the static context and the fingerprint.
    async fn high_importance(
        &self,
        user_id: &str,
        min_importance: f32,
        limit: usize,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Total records for a user.
    async fn count(&self, user_id: &str) -> std::result::Result<usize, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_clamps_high() {
        assert_eq!(clamp_importance(1.7), 1.0);
    }

    #[test]
    fn importance_clamps_low() {
        assert_eq!(clamp_importance(-0.3), 0.1);
    }

    #[test]
    fn importance_clamps_nan_to_floor() {
        assert_eq!(clamp_importance(f32::NAN), 0.1);
    }

    #[test]
    fn importance_in_range_passes_through() {
        assert_eq!(clamp_importance(0.85), 0.85);
    }

    #[test]
    fn topic_parses_known_values() {
        assert_eq!(MemoryTopic::parse_lenient("preference"), MemoryTopic::Preference);
        assert_eq!(MemoryTopic::parse_lenient("  Concern "), MemoryTopic::Concern);
    }

    #[test]
    fn topic_falls_back_to_personal() {
        assert_eq!(MemoryTopic::parse_lenient("gibberish"), MemoryTopic::Personal);
    }

    #[test]
    fn new_record_clamps_importance() {
        let rec = MemoryRecord::new("u1", "has a cat named Trixie", MemoryTopic::Personal, 2.5, vec![]);
        assert_eq!(rec.importance, 1.0);
    }

    #[test]
    fn record_serialization() {
        let rec = MemoryRecord::new(
            "u1",
            "loves painting",
            MemoryTopic::Interest,
            0.8,
            vec!["art".into()],
        );
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("loves painting"));
        assert!(json.contains("\"interest\""));
    }
}
