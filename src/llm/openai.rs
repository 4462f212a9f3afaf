use crate::llm::client::{
    CompletionRequest, LLMClient, LLMResponse, ProviderError, ProviderErrorKind, TokenUsage,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for any OpenAI-compatible `/chat/completions` endpoint (Groq, OpenAI, vLLM, ...).
pub struct OpenAIClient {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAIClient {
    pub fn new(api_key: String, api_base: String, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request_body(request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn parse_response(response_json: &Value) -> Result<LLMResponse, ProviderError> {
        let choice = response_json
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::Decode, "No choices in response"))?;

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::Decode, "No message content in response")
            })?
            .to_string();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("stop")
            .to_string();

        let usage = response_json
            .get("usage")
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

        Ok(LLMResponse {
            content,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<LLMResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ProviderError::new(ProviderErrorKind::Timeout, format!("HTTP request failed: {}", e))
                } else {
                    ProviderError::new(ProviderErrorKind::BadRequest, format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text));
        }

        let response_json: Value = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Decode,
                format!("Failed to parse response: {}", e),
            )
        })?;

        Self::parse_response(&response_json)
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}
