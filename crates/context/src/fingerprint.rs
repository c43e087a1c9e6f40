//! Content fingerprinting for cache equivalence.
//!
//! Two static contexts with the same fingerprint are cache-equivalent:
//! any change to a fingerprinted input (a renamed companion, a new
//! high-importance memory, a shifted importance score) produces a new
//! fingerprint and naturally invalidates downstream caches. Inputs are
//! serialized with an explicit allowlist in a fixed field order, so
//! incidental fields (timestamps, usage counters) can never perturb the
//! digest.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use keepsake_core::memory::MemoryRecord;
use keepsake_core::profile::Profile;
use serde_json::json;
use sha2::{Digest, Sha256};

/// Interests beyond this rank do not participate in the fingerprint.
const FINGERPRINT_INTEREST_LIMIT: usize = 10;

/// An opaque, stable identity for a static context's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextFingerprint(String);

impl ContextFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint the inputs that feed a user's static context.
///
/// Canonical form: profile name, companion name, communication style, the
/// top ten interests in rank order, and the high-importance memories
/// sorted by id, each reduced to (id, content, importance). Memory order
/// as passed by the caller does not matter.
pub fn fingerprint_static_context(
    profile: &Profile,
    memories: &[MemoryRecord],
) -> ContextFingerprint {
    let interests: Vec<&str> = profile
        .top_interests
        .iter()
        .take(FINGERPRINT_INTEREST_LIMIT)
        .map(String::as_str)
        .collect();

    let mut sorted: Vec<&MemoryRecord> = memories.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let memory_views: Vec<serde_json::Value> = sorted
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "content": m.content,
                "importance": m.importance,
            })
        })
        .collect();

    let canonical = json!({
        "name": profile.name,
        "companion_name": profile.companion_name,
        "tone": profile.communication_style.preferred_tone,
        "style": profile.communication_style.response_style,
        "interests": interests,
        "memories": memory_views,
    });

    let mut hasher = Sha256::new();
    // serde_json's default Map is a BTreeMap, so object keys serialize
    // in sorted order and this byte stream is deterministic for equal
    // inputs.
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();

    ContextFingerprint(URL_SAFE_NO_PAD.encode(digest))
}
