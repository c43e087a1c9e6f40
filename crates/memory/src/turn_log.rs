//! In-process conversation turn log.

use async_trait::async_trait;
use keepsake_core::error::MemoryError;
use keepsake_core::turn::{ConversationTurn, TurnStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only turn log backed by a Vec. Turns are kept in arrival order,
/// which is also timestamp order for a single process.
pub struct InMemoryTurnLog {
    turns: Arc<RwLock<Vec<ConversationTurn>>>,
}

impl InMemoryTurnLog {
    pub fn new() -> Self {
        Self {
            turns: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryTurnLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnLog {
    async fn append(&self, turn: ConversationTurn) -> Result<(), MemoryError> {
        self.turns.write().await.push(turn);
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, MemoryError> {
        let turns = self.turns.read().await;
        let matching: Vec<&ConversationTurn> = turns
            .iter()
            .filter(|t| t.user_id == user_id && t.session_id == session_id)
            .collect();

        let start = matching.len().saturating_sub(limit);
        Ok(matching[start..].iter().map(|t| (*t).clone()).collect())
    }
}
