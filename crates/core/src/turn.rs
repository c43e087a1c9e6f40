//! Conversation turn domain types.
//!
//! A turn is one user or assistant utterance within a session. Turns are
//! append-only; their lifetime is bounded by the session's retention
//! policy, which the external persistence collaborator owns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Who produced a turn or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A lightweight message as sent to the model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One utterance in a session, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    /// Ids of memory records the assistant referenced in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_references: Vec<String>,
}

impl ConversationTurn {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            memory_references: Vec::new(),
        }
    }

    pub fn with_memory_references(mut self, refs: Vec<String>) -> Self {
        self.memory_references = refs;
        self
    }
}

/// Append-only store for conversation turns.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Append a turn to the session log.
    async fn append(&self, turn: ConversationTurn) -> std::result::Result<(), MemoryError>;

    /// The most recent turns for a user's session, oldest first.
    async fn recent(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, MemoryError>;
}
