//! Mock collaborators for pipeline tests.
//!
//! [`ScriptedLLMClient`] answers each call according to the role named in the
//! system prompt ("Your role: ..."), so a test can script the planner, writer,
//! fact-checker and so on independently and count how often each was asked.

#![allow(dead_code)]

use async_trait::async_trait;
use lekha::llm::{CompletionRequest, LLMClient, LLMResponse, ProviderError, ProviderErrorKind, TokenUsage};
use lekha::tools::Harvester;
use lekha::types::{AppError, Result, Source};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PLANNER: &str = "Topic Planner";
pub const SUMMARIZER: &str = "Abstractive Summarizer";
pub const CLAIM_EXTRACTOR: &str = "Claim Extractor";
pub const FACT_CHECKER: &str = "Fact-Checker";
pub const WRITER: &str = "Narrative Writer";
pub const EDITOR: &str = "Style & QA Editor";
pub const SEO: &str = "SEO Specialist";

/// Handler for one role. Receives the request and the 1-based call number for that role.
pub type RoleHandler =
    Arc<dyn Fn(&CompletionRequest, usize) -> std::result::Result<String, ProviderError> + Send + Sync>;

// ============= Scripted LLM Client =============

/// LLM client that dispatches on the role in the system prompt.
#[derive(Clone, Default)]
pub struct ScriptedLLMClient {
    handlers: Arc<Mutex<HashMap<String, RoleHandler>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    delay: Option<Duration>,
}

impl ScriptedLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `role`.
    pub fn on<F>(self, role: &str, handler: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> std::result::Result<String, ProviderError> + Send + Sync + 'static,
    {
        self.handlers.lock().insert(role.to_string(), Arc::new(handler));
        self
    }

    /// Always answer `role` with `content`.
    pub fn reply(self, role: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        self.on(role, move |_, _| Ok(content.clone()))
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `role` was called.
    pub fn calls(&self, role: &str) -> usize {
        self.calls.lock().get(role).copied().unwrap_or(0)
    }

    fn role_of(request: &CompletionRequest) -> Option<String> {
        let system = request.messages.iter().find(|m| m.role == "system")?;
        let rest = system.content.split("Your role: ").nth(1)?;
        Some(rest.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<LLMResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let role = Self::role_of(request)
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::BadRequest, "no role in system prompt"))?;
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(role.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let handler = self.handlers.lock().get(&role).cloned().ok_or_else(|| {
            ProviderError::new(ProviderErrorKind::BadRequest, format!("unscripted role '{}'", role))
        })?;

        let content = handler(request, call)?;
        Ok(LLMResponse {
            finish_reason: "stop".to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            }),
            content,
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

/// Editor handler that returns the article it was given unchanged.
pub fn echo_article(request: &CompletionRequest, _call: usize) -> std::result::Result<String, ProviderError> {
    let user = request
        .messages
        .iter()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    Ok(user
        .split_once("Article:\n")
        .map(|(_, article)| article.to_string())
        .unwrap_or_default())
}

// ============= Harvester =============

/// Harvester returning a fixed source list and counting its queries.
pub struct CountingHarvester {
    sources: Vec<Source>,
    queries: AtomicUsize,
    failing: bool,
}

impl CountingHarvester {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            queries: AtomicUsize::new(0),
            failing: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Every query fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::empty()
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Harvester for CountingHarvester {
    async fn harvest(&self, _query: &str, _constraints: &BTreeMap<String, String>) -> Result<Vec<Source>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(AppError::Collaborator("search backend unavailable".to_string()));
        }
        Ok(self.sources.clone())
    }

    fn name(&self) -> &str {
        "counting"
    }
}
