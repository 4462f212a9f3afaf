//! Inference gateway tests against a mocked OpenAI-compatible server
//!
//! Covers transient retry, non-retryable failures, structured-output
//! re-prompting and rate-governor integration.

mod common;

use common::{test_gateway_config, unmetered_governor};
use lekha::llm::{
    GatewayConfig, GovernorConfig, InferenceGateway, ModelClass, ModelRouting, OpenAIClient,
    PromptSpec, RateGovernor,
};
use lekha::types::{AppError, FatalReason};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============= Helper Functions =============

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 10, "total_tokens": 50}
    })
}

fn gateway_for(server: &MockServer, config: GatewayConfig) -> InferenceGateway {
    let client = OpenAIClient::new(
        "test-key".to_string(),
        format!("{}/v1", server.uri()),
        Duration::from_secs(5),
    );
    InferenceGateway::new(
        Arc::new(client),
        unmetered_governor(),
        ModelRouting::new("fast-model", "quality-model"),
        config,
    )
}

fn prompt() -> PromptSpec {
    PromptSpec::new("test.prompt", "You are terse.", "Say hello.")
}

#[derive(Debug, Deserialize, PartialEq)]
struct Greeting {
    greeting: String,
}

// ============= Tests =============

#[tokio::test]
async fn test_complete_routes_model_class_and_records_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "quality-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, test_gateway_config());
    let completion = gateway.complete(&prompt(), ModelClass::Quality).await.unwrap();

    assert_eq!(completion.content, "hello");
    assert_eq!(completion.attempts, 1);
    assert_eq!(completion.usage.total_tokens, 50);

    let usage = gateway.usage();
    assert_eq!(usage.calls, 1);
    assert_eq!(usage.prompt_tokens, 40);
    assert_eq!(usage.completion_tokens, 10);
    assert_eq!(usage.total_tokens(), 50);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, test_gateway_config());
    let completion = gateway.complete(&prompt(), ModelClass::Fast).await.unwrap();

    assert_eq!(completion.content, "recovered");
    assert_eq!(completion.attempts, 3);
    let usage = gateway.usage();
    assert_eq!(usage.transient_retries, 2);
    assert_eq!(usage.failed_calls, 2);
}

#[tokio::test]
async fn test_rate_limited_provider_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, test_gateway_config());
    let completion = gateway.complete(&prompt(), ModelClass::Fast).await.unwrap();
    assert_eq!(completion.attempts, 2);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, test_gateway_config());
    let err = gateway.complete(&prompt(), ModelClass::Fast).await.unwrap_err();

    assert!(matches!(err, AppError::Provider(_)));
    assert_eq!(err.fatal_reason(), FatalReason::ProviderRejected);
    assert_eq!(gateway.usage().transient_retries, 0);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let config = GatewayConfig {
        max_transient_retries: 2,
        ..test_gateway_config()
    };
    let gateway = gateway_for(&server, config);
    let err = gateway.complete(&prompt(), ModelClass::Fast).await.unwrap_err();

    match err {
        AppError::GatewayExhausted { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("500"));
        }
        other => panic!("expected GatewayExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_json_mode_and_reprompt_on_invalid_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Sure! greeting = hi")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("```json\n{\"greeting\": \"hi\"}\n```")),
        )
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, test_gateway_config());
    let greeting: Greeting = gateway.complete_json(&prompt(), ModelClass::Fast).await.unwrap();

    assert_eq!(greeting, Greeting { greeting: "hi".to_string() });
    assert_eq!(gateway.usage().structured_retries, 1);

    // the re-prompt carries the failed answer and the parse error
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2]["role"], "assistant");
    assert!(messages[3]["content"].as_str().unwrap().contains("validation errors"));
}

#[tokio::test]
async fn test_structured_output_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("not json")))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, test_gateway_config());
    let err = gateway
        .complete_json::<Greeting>(&prompt(), ModelClass::Fast)
        .await
        .unwrap_err();

    match err {
        AppError::StructuredOutput { schema, attempts, .. } => {
            assert_eq!(schema, "test.prompt");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected StructuredOutput, got {:?}", other),
    }
}

#[tokio::test]
async fn test_governor_timeout_surfaces_as_rate_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .mount(&server)
        .await;

    let governor = Arc::new(RateGovernor::new(
        GovernorConfig::default()
            .with_requests_per_minute(1, 1)
            .with_acquire_timeout(Some(Duration::from_millis(50))),
    ));
    let client = OpenAIClient::new(
        "test-key".to_string(),
        format!("{}/v1", server.uri()),
        Duration::from_secs(5),
    );
    let gateway = InferenceGateway::new(
        Arc::new(client),
        governor,
        ModelRouting::new("fast-model", "quality-model"),
        test_gateway_config(),
    );

    gateway.complete(&prompt(), ModelClass::Fast).await.unwrap();
    let err = gateway.complete(&prompt(), ModelClass::Fast).await.unwrap_err();

    assert!(matches!(err, AppError::RateTimeout { .. }));
    assert_eq!(err.fatal_reason(), FatalReason::RateTimeout);
}
