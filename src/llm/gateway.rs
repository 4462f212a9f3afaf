//! Inference gateway
//!
//! One logical request to the language-model service with bounded resilience:
//! rate admission, transient retry with exponential backoff and jitter, and
//! corrective re-prompting when structured (JSON) output fails to parse.
//! Every provider round-trip emits one trace event on the `lekha::gateway`
//! target. Prompt and response content are never logged or retained.

use crate::llm::client::{
    ChatMessage, CompletionRequest, LLMClient, ModelClass, ModelRouting, ProviderError,
    ProviderErrorKind, TokenUsage,
};
use crate::llm::governor::AdmissionControl;
use crate::types::{AppError, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const JSON_INSTRUCTION: &str =
    "Respond with a single valid JSON object only. Do not wrap it in markdown or add commentary.";

/// What to ask the model. The gateway owns how it is asked.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    /// Short name used in trace records (e.g. "plan.outline")
    pub label: String,
    pub system: String,
    pub user: String,
    /// Overrides the gateway default when set
    pub max_tokens: Option<u32>,
    /// Overrides the gateway default when set
    pub temperature: Option<f32>,
}

impl PromptSpec {
    pub fn new(label: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            system: system.into(),
            user: user.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Gateway resilience settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Retries after the first attempt for transient failures (default: 3)
    pub max_transient_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the uniform random jitter added to each backoff
    pub jitter: Duration,
    /// Corrective re-prompts after a structured output parse failure (default: 2)
    pub max_structured_retries: u32,
    /// Per-call ceiling on the provider round-trip
    pub call_timeout: Duration,
    pub default_max_tokens: u32,
    /// Completion tokens charged to the rate budget up front; `max_tokens` caps it
    pub expected_completion_tokens: u32,
    pub default_temperature: f32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8_000),
            jitter: Duration::from_millis(250),
            max_structured_retries: 2,
            call_timeout: Duration::from_secs(60),
            default_max_tokens: 4_096,
            expected_completion_tokens: 1_024,
            default_temperature: 0.1,
        }
    }
}

/// Result of one successful logical request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    pub model_class: ModelClass,
    /// Provider round-trips spent, including transient retries
    pub attempts: u32,
    pub latency: Duration,
}

/// Aggregate gateway usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub calls: u64,
    pub failed_calls: u64,
    pub transient_retries: u64,
    pub structured_retries: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Default)]
struct UsageCounters {
    calls: AtomicU64,
    failed_calls: AtomicU64,
    transient_retries: AtomicU64,
    structured_retries: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

/// Rate-governed, retrying front door to an [`LLMClient`].
pub struct InferenceGateway {
    client: Arc<dyn LLMClient>,
    governor: Arc<dyn AdmissionControl>,
    routing: ModelRouting,
    config: GatewayConfig,
    usage: UsageCounters,
}

impl InferenceGateway {
    pub fn new(
        client: Arc<dyn LLMClient>,
        governor: Arc<dyn AdmissionControl>,
        routing: ModelRouting,
        config: GatewayConfig,
    ) -> Self {
        Self {
            client,
            governor,
            routing,
            config,
            usage: UsageCounters::default(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn usage(&self) -> UsageStats {
        UsageStats {
            calls: self.usage.calls.load(Ordering::Relaxed),
            failed_calls: self.usage.failed_calls.load(Ordering::Relaxed),
            transient_retries: self.usage.transient_retries.load(Ordering::Relaxed),
            structured_retries: self.usage.structured_retries.load(Ordering::Relaxed),
            prompt_tokens: self.usage.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.usage.completion_tokens.load(Ordering::Relaxed),
        }
    }

    /// Free-text completion.
    pub async fn complete(&self, prompt: &PromptSpec, model_class: ModelClass) -> Result<Completion> {
        let messages = vec![
            ChatMessage::system(prompt.system.clone()),
            ChatMessage::user(prompt.user.clone()),
        ];
        self.dispatch(prompt, &messages, model_class, false).await
    }

    /// JSON completion deserialized into `T`.
    ///
    /// On a parse failure the model is shown its own answer together with the
    /// parse error and asked again, up to `max_structured_retries` times.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        prompt: &PromptSpec,
        model_class: ModelClass,
    ) -> Result<T> {
        let mut messages = vec![
            ChatMessage::system(format!("{}\n\n{}", prompt.system, JSON_INSTRUCTION)),
            ChatMessage::user(prompt.user.clone()),
        ];

        let max_attempts = self.config.max_structured_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let completion = self.dispatch(prompt, &messages, model_class, true).await?;
            match parse_json::<T>(&completion.content) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        target: "lekha::gateway",
                        label = %prompt.label,
                        attempt,
                        error = %e,
                        "Structured output failed to parse"
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        self.usage.structured_retries.fetch_add(1, Ordering::Relaxed);
                        messages.push(ChatMessage::assistant(completion.content));
                        messages.push(ChatMessage::user(format!(
                            "The previous response had validation errors: {}\n\n\
                             Please respond again with valid JSON that matches the requested structure.",
                            last_error
                        )));
                    }
                }
            }
        }

        Err(AppError::StructuredOutput {
            schema: prompt.label.clone(),
            attempts: max_attempts,
            error: last_error,
        })
    }

    async fn dispatch(
        &self,
        prompt: &PromptSpec,
        messages: &[ChatMessage],
        model_class: ModelClass,
        json_mode: bool,
    ) -> Result<Completion> {
        let max_tokens = prompt.max_tokens.unwrap_or(self.config.default_max_tokens);
        let request = CompletionRequest {
            model: self.routing.model_for(model_class).to_string(),
            messages: messages.to_vec(),
            temperature: prompt.temperature.unwrap_or(self.config.default_temperature),
            max_tokens,
            json_mode,
        };
        let prompt_estimate = estimate_prompt_tokens(messages);
        let estimate = admission_estimate(prompt_estimate, max_tokens, self.config.expected_completion_tokens);

        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let permit = self.governor.acquire(estimate).await?;
            let call_started = Instant::now();

            let result = match tokio::time::timeout(self.config.call_timeout, self.client.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::new(
                    ProviderErrorKind::Timeout,
                    format!("No response within {:?}", self.config.call_timeout),
                )),
            };
            let latency_ms = call_started.elapsed().as_millis() as u64;
            self.usage.calls.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(response) => {
                    let usage = response.usage.unwrap_or(TokenUsage {
                        prompt_tokens: prompt_estimate,
                        completion_tokens: (response.content.len() / 4) as u32,
                        total_tokens: prompt_estimate + (response.content.len() / 4) as u32,
                    });
                    self.governor.release(permit, usage.total_tokens);
                    self.usage
                        .prompt_tokens
                        .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
                    self.usage
                        .completion_tokens
                        .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);

                    tracing::info!(
                        target: "lekha::gateway",
                        model_class = %model_class,
                        model = %request.model,
                        label = %prompt.label,
                        attempt,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        latency_ms,
                        finish_reason = %response.finish_reason,
                        outcome = "ok",
                        "LLM call completed"
                    );

                    return Ok(Completion {
                        content: response.content,
                        usage,
                        model_class,
                        attempts: attempt,
                        latency: started.elapsed(),
                    });
                }
                Err(err) => {
                    self.governor.release(permit, prompt_estimate);
                    self.usage.failed_calls.fetch_add(1, Ordering::Relaxed);
                    let transient = err.is_transient();
                    let outcome = if transient { "transient_error" } else { "fatal_error" };

                    tracing::warn!(
                        target: "lekha::gateway",
                        model_class = %model_class,
                        model = %request.model,
                        label = %prompt.label,
                        attempt,
                        latency_ms,
                        status = err.status,
                        transient,
                        outcome,
                        error = %err,
                        "LLM call failed"
                    );

                    if !transient {
                        return Err(AppError::Provider(err.to_string()));
                    }
                    if attempt > self.config.max_transient_retries {
                        return Err(AppError::GatewayExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }

                    self.usage.transient_retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.backoff_delay(attempt - 1)).await;
                }
            }
        }
    }

    /// `min(base * 2^retry, max)` plus uniform jitter in `[0, jitter]`.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = self
            .config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.config.max_backoff);
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// chars / 4, the usual rough ratio for English text.
/// Tokens debited at admission: the prompt plus the expected completion.
///
/// `release` refunds the difference once actual usage is known.
pub fn admission_estimate(prompt_tokens: u32, max_tokens: u32, expected_completion: u32) -> u32 {
    prompt_tokens.saturating_add(max_tokens.min(expected_completion))
}

pub fn estimate_prompt_tokens(messages: &[ChatMessage]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    (chars / 4) as u32
}

/// Strip markdown fences and surrounding prose, returning the outermost JSON value.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let start = trimmed.find(['{', '[']);
    let Some(start) = start else {
        return trimmed;
    };
    let closing = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    match trimmed.rfind(closing) {
        Some(end) if end > start => &trimmed[start..=end],
        _ => &trimmed[start..],
    }
}

fn parse_json<T: DeserializeOwned>(text: &str) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nThanks";
        assert_eq!(extract_json(text), "{\"a\": [1, 2]}");
    }

    #[test]
    fn test_extract_json_array() {
        assert_eq!(extract_json("result: [1, 2, 3]."), "[1, 2, 3]");
    }

    #[test]
    fn test_extract_json_without_json_returns_trimmed_text() {
        assert_eq!(extract_json("  nothing here "), "nothing here");
    }

    #[test]
    fn test_admission_estimate_caps_completion() {
        assert_eq!(admission_estimate(200, 4_096, 1_024), 1_224);
        assert_eq!(admission_estimate(200, 300, 1_024), 500);
        assert_eq!(admission_estimate(u32::MAX, 10, 10), u32::MAX);
    }

    #[test]
    fn test_estimate_prompt_tokens() {
        let messages = vec![ChatMessage::system("a".repeat(40)), ChatMessage::user("b".repeat(40))];
        assert_eq!(estimate_prompt_tokens(&messages), 20);
    }
}
