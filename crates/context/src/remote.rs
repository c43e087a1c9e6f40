//! Provider-side remote content cache.
//!
//! Wraps the provider's "upload once, reference by handle" primitive.
//! Handles are tracked locally per (user, fingerprint); an unexpired
//! handle is reused instead of re-uploading, and a new upload for a key
//! supersedes the old handle. Remote deletion is best-effort throughout:
//! provider TTLs reclaim anything a failed delete leaves behind, so local
//! tracking is always cleaned up regardless of the remote outcome.

use chrono::{DateTime, Duration, Utc};
use keepsake_core::error::ProviderError;
use keepsake_core::provider::ModelProvider;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::fingerprint::ContextFingerprint;
use crate::token::estimate_tokens;

#[derive(Debug, Clone)]
struct RemoteHandle {
    handle: String,
    expires_at: DateTime<Utc>,
}

/// Aggregate view of tracked remote handles.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteCacheStats {
    pub tracked_handles: usize,
    pub expired_handles: usize,
}

/// Tracks provider-side cached-content handles per (user, fingerprint).
pub struct RemoteContentCache {
    provider: Arc<dyn ModelProvider>,
    handles: RwLock<HashMap<(String, String), RemoteHandle>>,
    ttl: Duration,
    min_cache_tokens: usize,
}

impl RemoteContentCache {
    pub fn new(provider: Arc<dyn ModelProvider>, ttl_minutes: u64, min_cache_tokens: usize) -> Self {
        Self {
            provider,
            handles: RwLock::new(HashMap::new()),
            ttl: Duration::minutes(ttl_minutes as i64),
            min_cache_tokens,
        }
    }

    fn key(user_id: &str, fingerprint: &ContextFingerprint) -> (String, String) {
        (user_id.to_string(), fingerprint.as_str().to_string())
    }

    /// Whether a payload is large enough to be worth a provider-side
    /// upload. Small payloads are cheaper sent inline.
    pub fn worth_caching(&self, content: &str) -> bool {
        estimate_tokens(content) >= self.min_cache_tokens
    }

    /// Get a usable handle for (user, fingerprint), uploading `content`
    /// if no unexpired handle exists.
    ///
    /// The upload runs without the lock held, so a slow provider does not
    /// stall other users; if two uploads race for the same key, the later
    /// insert supersedes.
    pub async fn ensure_handle(
        &self,
        user_id: &str,
        fingerprint: &ContextFingerprint,
        content: &str,
    ) -> Result<String, ProviderError> {
        let key = Self::key(user_id, fingerprint);
        let now = Utc::now();

        if let Some(existing) = self.handles.read().await.get(&key) {
            if now < existing.expires_at {
                debug!(user_id, handle = %existing.handle, "Reusing remote cache handle");
                return Ok(existing.handle.clone());
            }
        }

        let ttl_secs = self.ttl.num_seconds().max(0) as u64;
        let handle = self.provider.upload_cached_content(content, ttl_secs).await?;
        info!(user_id, handle = %handle, "Uploaded static context to remote cache");

        let mut handles = self.handles.write().await;
        handles.insert(
            key,
            RemoteHandle {
                handle: handle.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(handle)
    }

    /// Generate against previously uploaded content.
    pub async fn generate(
        &self,
        handle: &str,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.provider
            .generate_with_handle(handle, prompt, system_instruction)
            .await
    }

    /// Drop a user's tracked handles, deleting remote content
    /// best-effort. Local tracking is removed even when the remote
    /// delete fails.
    pub async fn invalidate(&self, user_id: &str) {
        let removed: Vec<RemoteHandle> = {
            let mut handles = self.handles.write().await;
            let keys: Vec<(String, String)> = handles
                .keys()
                .filter(|(uid, _)| uid == user_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| handles.remove(&k)).collect()
        };

        for entry in removed {
            if let Err(e) = self.provider.delete_cached_content(&entry.handle).await {
                warn!(handle = %entry.handle, error = %e, "Remote cache delete failed");
            }
        }
    }

    /// Remove expired handles, attempting remote deletion for each.
    /// Returns how many handles were swept locally.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<RemoteHandle> = {
            let mut handles = self.handles.write().await;
            let keys: Vec<(String, String)> = handles
                .iter()
                .filter(|(_, h)| now >= h.expires_at)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter().filter_map(|k| handles.remove(&k)).collect()
        };

        let swept = expired.len();
        for entry in &expired {
            if let Err(e) = self.provider.delete_cached_content(&entry.handle).await {
                // Provider TTL will reclaim it eventually
                warn!(handle = %entry.handle, error = %e, "Remote delete failed during sweep");
            }
        }
        if swept > 0 {
            info!(swept, "Swept expired remote cache handles");
        }
        swept
    }

    pub async fn stats(&self) -> RemoteCacheStats {
        let now = Utc::now();
        let handles = self.handles.read().await;
        let expired = handles.values().filter(|h| now >= h.expires_at).count();
        RemoteCacheStats {
            tracked_handles: handles.len(),
            expired_handles: expired,
        }
    }
}
