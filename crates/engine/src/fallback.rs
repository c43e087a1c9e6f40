//! Templated fallback responses.
//!
//! Delivered when the provider is down, rate limited, or the turn times
//! out. Template choice is a deterministic function of (name, message) so
//! the same failed turn always produces the same response, which keeps
//! retries and tests reproducible.

use std::hash::{DefaultHasher, Hash, Hasher};

const FALLBACK_TEMPLATES: [&str; 3] = [
    "Hi {name}! I'm having a small technical moment, but I'm here for you. What's on your mind?",
    "Hey {name}! Sorry, I'm processing a lot right now. Tell me what's happening with you today!",
    "Hi there {name}! I'm listening and ready to chat. What would you like to talk about?",
];

/// A friendly response that references the user by name, picked
/// deterministically from a fixed template set.
pub fn fallback_response(name: &str, message: &str) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    message.hash(&mut hasher);
    let index = (hasher.finish() as usize) % FALLBACK_TEMPLATES.len();

    FALLBACK_TEMPLATES[index].replace("{name}", name)
}
