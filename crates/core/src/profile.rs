//! Profile, interest, and activity collaborator traits.
//!
//! Profiles, interest data, and activity logs live in relational storage
//! owned by collaborators outside this engine. These narrow traits are the
//! only surface the engine consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// How the companion should talk to this user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicationStyle {
    /// e.g. "warm and supportive"
    #[serde(default)]
    pub preferred_tone: String,

    /// e.g. "conversational"
    #[serde(default)]
    pub response_style: String,
}

/// The slow-changing core of a user's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub name: String,

    /// What the user calls their companion.
    pub companion_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,

    /// Ranked interests; the static context uses the top ten.
    #[serde(default)]
    pub top_interests: Vec<String>,

    #[serde(default)]
    pub communication_style: CommunicationStyle,
}

/// A single interest with enough detail for retrieval responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interest {
    pub content: String,
    pub category: String,
    pub importance: f32,
}

/// A recent activity (conversation, mood check-in, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub activity_type: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Source of user profiles.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> std::result::Result<Profile, MemoryError>;
}

/// Source of categorized interests for the retrieval dispatcher.
#[async_trait]
pub trait InterestProvider: Send + Sync {
    /// Interests for a user, optionally filtered by category.
    async fn interests_by_category(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> std::result::Result<Vec<Interest>, MemoryError>;
}

/// Source of recent activities for the retrieval dispatcher.
#[async_trait]
pub trait ActivityProvider: Send + Sync {
    /// Activities within the last `days` days, optionally filtered by
    /// activity type.
    async fn recent_activities(
        &self,
        user_id: &str,
        days: u32,
        activity_type: Option<&str>,
    ) -> std::result::Result<Vec<Activity>, MemoryError>;
}
