//! In-process volatile context cache.
//!
//! Caches assembled static context text keyed by (user, fingerprint).
//! Entries expire by TTL and by a usage ceiling, so even a hot entry is
//! periodically rebuilt from fresh source data. Eviction is lazy: an
//! expired entry is removed when it is next looked up, and `stats` only
//! counts live entries. Process restart empties the cache; that is an
//! accepted cost, not a fault.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::fingerprint::ContextFingerprint;

#[derive(Debug, Clone)]
struct CacheEntry {
    static_context: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    usage_count: u32,
}

impl CacheEntry {
    fn is_valid(&self, now: DateTime<Utc>, max_usage: u32) -> bool {
        now < self.expires_at && self.usage_count < max_usage
    }
}

/// Aggregate cache health, for `cache_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses); zero when the cache has never been queried.
    pub hit_rate: f32,
    /// Creation time of the oldest live entry.
    pub oldest_entry_at: Option<DateTime<Utc>>,
}

/// In-process cache of assembled static contexts.
pub struct VolatileContextCache {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
    ttl: Duration,
    max_usage_per_entry: u32,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl VolatileContextCache {
    pub fn new(ttl_secs: u64, max_usage_per_entry: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
            max_usage_per_entry,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(user_id: &str, fingerprint: &ContextFingerprint) -> (String, String) {
        (user_id.to_string(), fingerprint.as_str().to_string())
    }

    /// Look up the cached static context for (user, fingerprint).
    ///
    /// A hit increments the entry's usage count; an entry past its TTL or
    /// usage ceiling is evicted here and reported as a miss.
    pub async fn get(&self, user_id: &str, fingerprint: &ContextFingerprint) -> Option<String> {
        let key = Self::key(user_id, fingerprint);
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        match entries.get_mut(&key) {
            Some(entry) if entry.is_valid(now, self.max_usage_per_entry) => {
                entry.usage_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.static_context.clone())
            }
            Some(_) => {
                debug!(user_id, "Evicting stale volatile cache entry");
                entries.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an assembled static context. Overwrites any previous entry
    /// for the same key, resetting its usage count.
    pub async fn put(
        &self,
        user_id: &str,
        fingerprint: &ContextFingerprint,
        static_context: String,
    ) {
        let now = Utc::now();
        let entry = CacheEntry {
            static_context,
            created_at: now,
            expires_at: now + self.ttl,
            usage_count: 0,
        };
        self.entries
            .write()
            .await
            .insert(Self::key(user_id, fingerprint), entry);
    }

    /// Drop every entry for a user, regardless of fingerprint. Used when
    /// the user's source data changes out-of-band.
    pub async fn invalidate(&self, user_id: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|(uid, _), _| uid != user_id);
    }

    /// Stats over live entries only; expired-but-unevicted entries are
    /// excluded from the count.
    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let live: Vec<&CacheEntry> = entries
            .values()
            .filter(|e| e.is_valid(now, self.max_usage_per_entry))
            .collect();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        };

        CacheStats {
            entries: live.len(),
            hits,
            misses,
            hit_rate,
            oldest_entry_at: live.iter().map(|e| e.created_at).min(),
        }
    }
}
