//! ModelProvider trait — the abstraction over the remote LLM service.
//!
//! A ModelProvider knows how to turn an assembled context plus a user
//! message into text, and exposes the provider-side "upload once,
//! reference by handle" cached-content primitive that the remote content
//! cache wraps. All calls may fail with `ProviderError::Unavailable` or
//! `ProviderError::RateLimited`; the engine owns retry and fallback policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::turn::Message;

/// A function declaration offered to the model so it can request
/// retrievals mid-turn. Parameter schemas use JSON-Schema primitive types
/// only (string/number/array/object), matching what providers mandate for
/// tool declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A function call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
}

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// System instruction, kept separate from the message list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// The conversation messages.
    pub messages: Vec<Message>,

    /// Function declarations the model may call. Empty means the model
    /// must produce plain text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionDeclaration>,
}

impl GenerateRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system_instruction: None,
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.tools = tools;
        self
    }
}

/// A complete response from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text. May be empty when the model chose to call a
    /// function instead.
    pub text: String,

    /// Function calls the model wants resolved before it can answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }
}

/// Metadata for one provider-side cached-content entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedContentInfo {
    pub handle: String,
    pub expires_at: DateTime<Utc>,
}

/// The remote LLM service.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<ModelResponse, ProviderError>;

    /// Upload a large blob to the provider-side cache. Returns an opaque
    /// handle valid for roughly `ttl_secs`.
    async fn upload_cached_content(
        &self,
        content: &str,
        ttl_secs: u64,
    ) -> std::result::Result<String, ProviderError>;

    /// Generate referencing previously uploaded content by handle instead
    /// of resending it.
    async fn generate_with_handle(
        &self,
        handle: &str,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> std::result::Result<String, ProviderError>;

    /// Delete provider-side cached content. Best-effort from the caller's
    /// perspective.
    async fn delete_cached_content(&self, handle: &str)
        -> std::result::Result<(), ProviderError>;

    /// List provider-side cached content entries.
    async fn list_cached_content(
        &self,
    ) -> std::result::Result<Vec<CachedContentInfo>, ProviderError> {
        Ok(Vec::new())
    }

    /// Capability probe: attempt a large-window operation. `Ok(true)`
    /// means the account has access to the provider's largest context
    /// window. Callers must treat an error as "no".
    async fn probe_large_window(&self) -> std::result::Result<bool, ProviderError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = GenerateRequest::new(vec![Message::user("hi")])
            .with_system_instruction("be kind")
            .with_tools(vec![FunctionDeclaration {
                name: "search_memories_by_topic".into(),
                description: "look up memories".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }]);
        assert_eq!(req.system_instruction.as_deref(), Some("be kind"));
        assert_eq!(req.tools.len(), 1);
    }

    #[test]
    fn text_response_has_no_function_calls() {
        let resp = ModelResponse::text("hello");
        assert!(resp.function_calls.is_empty());
    }

    #[test]
    fn function_call_serialization() {
        let call = FunctionCall {
            name: "get_recent_activities".into(),
            args: serde_json::json!({"days": 7}),
        };
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains("get_recent_activities"));
        assert!(json.contains("\"days\":7"));
    }
}
