//! Access to the language-model service
//!
//! # Architecture
//!
//! - [`LLMClient`] - one provider round-trip, no retries
//! - [`RateGovernor`] - process-wide request and token budgets
//! - [`InferenceGateway`] - admission, transient retry, structured re-prompt, tracing
//!
//! Stages only ever talk to the gateway. The gateway receives its governor by
//! injection so every run in a process shares one set of budgets.

/// Client trait, request/response types and provider error classification.
pub mod client;
/// Rate-governed, retrying gateway used by every stage.
pub mod gateway;
/// Dual token-bucket admission control.
pub mod governor;
/// OpenAI-compatible HTTP client.
pub mod openai;

pub use client::{
    ChatMessage, CompletionRequest, LLMClient, LLMResponse, ModelClass, ModelRouting,
    ProviderError, ProviderErrorKind, TokenUsage,
};
pub use gateway::{Completion, GatewayConfig, InferenceGateway, PromptSpec, UsageStats};
pub use governor::{AdmissionControl, GovernorConfig, GovernorError, GovernorStats, RateGovernor, RatePermit};
pub use openai::OpenAIClient;
