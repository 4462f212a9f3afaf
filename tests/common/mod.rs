//! Shared fixtures for integration tests.

#![allow(dead_code)]

pub mod mocks;

use lekha::llm::{GatewayConfig, GovernorConfig, ModelRouting, RateGovernor};
use lekha::rag::Bm25Retriever;
use lekha::tools::Harvester;
use lekha::types::{Source, TopicSpec};
use lekha::workflows::{OrchestratorConfig, RunManager};
use mocks::{echo_article, ScriptedLLMClient, CLAIM_EXTRACTOR, EDITOR, FACT_CHECKER, PLANNER, SEO, SUMMARIZER};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const TITLE: &str = "How Tides Work";

/// Ten factual statements, five per outline section.
pub const FACTS: [&str; 10] = [
    "Tides are long waves that move through the oceans",
    "The gravitational pull of the moon is the main force behind tides",
    "The sun also exerts a smaller tidal force on the oceans",
    "Most coastal places experience two high tides each day",
    "Spring tides occur when the sun and moon align",
    "Neap tides occur when the sun and moon form a right angle",
    "The rotation of the Earth moves coastlines through the tidal bulges",
    "Tidal range varies widely between different coastlines",
    "The Bay of Fundy has one of the largest tidal ranges in the world",
    "Tide gauges record water levels at regular intervals",
];

pub fn tide_topic() -> TopicSpec {
    TopicSpec::new("tides", "students").with_keywords(vec!["tides".to_string(), "moon".to_string()])
}

pub fn tide_sources() -> Vec<Source> {
    vec![
        Source::new(
            "https://oceanservice.noaa.gov/education/tides",
            "Tides and Water Levels",
            "Tides are very long-period waves that move through the oceans in response to the \
             forces exerted by the moon and sun. The gravitational pull of the moon is the main \
             force behind tides. Spring tides occur when the sun and moon align.",
        )
        .with_author("NOAA"),
        Source::new(
            "https://en.wikipedia.org/wiki/Tide",
            "Tide",
            "Most places experience two high tides each day. The rotation of the Earth carries \
             coastlines through the tidal bulges. Neap tides occur when the sun and moon are at \
             right angles.",
        ),
        Source::new(
            "https://www.bayoffundy.com/about/highest-tides",
            "Highest Tides in the World",
            "The Bay of Fundy has one of the largest tidal ranges in the world. Tidal range \
             varies widely between coastlines. Tide gauges record water levels at regular intervals.",
        ),
    ]
}

pub fn outline_json() -> String {
    json!({
        "title": TITLE,
        "sections": [
            {"title": "What causes tides", "key_questions": ["Why does the moon cause tides?"]},
            {"title": "Tidal patterns", "key_questions": ["How large can tides get?"]}
        ],
        "target_keywords": ["tides", "moon"]
    })
    .to_string()
}

/// The full article with the last `uncited` facts missing their markers.
pub fn article(uncited: usize) -> String {
    let cited_until = FACTS.len().saturating_sub(uncited);
    let sentence = |i: usize| {
        if i < cited_until {
            format!("{} [{}].", FACTS[i], i % 3 + 1)
        } else {
            format!("{}.", FACTS[i])
        }
    };
    let first: Vec<String> = (0..5).map(sentence).collect();
    let second: Vec<String> = (5..10).map(sentence).collect();
    format!(
        "# {}\n\n## What causes tides\n\n{}\n\n## Tidal patterns\n\n{}\n",
        TITLE,
        first.join(" "),
        second.join(" ")
    )
}

/// One claim per fact, each attributed to the source the article cites for it.
pub fn claims_json(confidence: f32) -> String {
    let claims: Vec<_> = FACTS
        .iter()
        .enumerate()
        .map(|(i, fact)| json!({"text": fact, "source_indices": [i % 3 + 1], "confidence": confidence}))
        .collect();
    json!({ "claims": claims }).to_string()
}

pub fn seo_json() -> String {
    json!({
        "title": "How Tides Work: Moon, Sun and the Sea",
        "meta_description": "Why the oceans rise and fall twice a day, explained with sources.",
        "slug": "how-tides-work",
        "keywords": ["tides", "moon", "Tides"]
    })
    .to_string()
}

/// Client scripted for every role except the writer.
pub fn scripted_client(fact_verdict: &str) -> ScriptedLLMClient {
    let verdict = json!({"verdict": fact_verdict, "confidence": 0.9}).to_string();
    ScriptedLLMClient::new()
        .reply(PLANNER, outline_json())
        .reply(SUMMARIZER, format!("{} [1]. {} [2].", FACTS[0], FACTS[3]))
        .reply(CLAIM_EXTRACTOR, claims_json(0.9))
        .reply(FACT_CHECKER, verdict)
        .on(EDITOR, echo_article)
        .reply(SEO, seo_json())
}

pub fn test_gateway_config() -> GatewayConfig {
    GatewayConfig {
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: Duration::ZERO,
        ..GatewayConfig::default()
    }
}

/// Budgets large enough that no test ever waits for admission.
pub fn unmetered_governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(
        GovernorConfig::default()
            .with_requests_per_minute(100_000, 100_000)
            .with_tokens_per_minute(100_000_000, 100_000_000),
    ))
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_run_duration: Duration::from_secs(30),
        ..OrchestratorConfig::default()
    }
}

pub fn manager(client: ScriptedLLMClient, harvester: Arc<dyn Harvester>) -> RunManager {
    RunManager::new(
        Arc::new(client),
        unmetered_governor(),
        ModelRouting::new("fast-model", "quality-model"),
        harvester,
        Arc::new(Bm25Retriever::default()),
    )
    .with_gateway_config(test_gateway_config())
    .with_defaults(test_config())
}
