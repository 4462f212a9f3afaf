//! LLM client abstractions
//!
//! The pipeline talks to a single OpenAI-compatible chat completions service.
//! Providers implement [`LLMClient`]; failures are reported as [`ProviderError`]
//! so the gateway can decide what is worth retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Model tier selected by the caller, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    /// Cheap model for orchestration-style work (planning, extraction, checks)
    Fast,
    /// Higher quality model for generative and editorial work
    Quality,
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelClass::Fast => write!(f, "fast"),
            ModelClass::Quality => write!(f, "quality"),
        }
    }
}

/// Maps model classes onto provider model names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRouting {
    pub fast: String,
    pub quality: String,
}

impl ModelRouting {
    pub fn new(fast: impl Into<String>, quality: impl Into<String>) -> Self {
        Self {
            fast: fast.into(),
            quality: quality.into(),
        }
    }

    pub fn model_for(&self, class: ModelClass) -> &str {
        match class {
            ModelClass::Fast => &self.fast,
            ModelClass::Quality => &self.quality,
        }
    }
}

/// A chat message sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A fully resolved request for one provider round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from an LLM generation request
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// The text content of the response
    pub content: String,
    /// The reason generation stopped (e.g., "stop", "length")
    pub finish_reason: String,
    /// Usage as reported by the provider, if any
    pub usage: Option<TokenUsage>,
}

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Request timed out or the connection dropped
    Timeout,
    /// 5xx-equivalent
    Server,
    /// The provider itself rejected the call for rate reasons (429)
    RateLimited,
    /// Malformed request (4xx other than auth/rate)
    BadRequest,
    /// Authentication or authorization failure
    Auth,
    /// Response body could not be decoded
    Decode,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimited,
            401 | 403 => ProviderErrorKind::Auth,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::BadRequest,
        };
        Self::new(kind, body).with_status(status)
    }

    /// Whether retrying the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Timeout | ProviderErrorKind::Server | ProviderErrorKind::RateLimited
        )
    }
}

/// Generic LLM client trait for provider abstraction
///
/// Implementations perform exactly one round-trip and never retry;
/// resilience lives in the gateway.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Perform one chat completion.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<LLMResponse, ProviderError>;

    /// Provider name for trace records
    fn provider_name(&self) -> &str;
}
