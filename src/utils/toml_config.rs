//! TOML-based configuration for Lekha
//!
//! Every field has a default, so an empty `lekha.toml` is a valid configuration.
//! Secrets are never stored in the file: `[llm].api_key_env` names the
//! environment variable holding the key.

use crate::llm::{GatewayConfig, GovernorConfig, ModelRouting};
use crate::quality::QualityThresholds;
use crate::workflows::{OrchestratorConfig, RetryEntry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure loaded from lekha.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LekhaConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    #[serde(default = "default_quality_model")]
    pub quality_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_fast_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_quality_model() -> String {
    "llama-3.1-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            fast_model: default_fast_model(),
            quality_model: default_quality_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// ============= Rate Limit Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    #[serde(default = "default_tpm")]
    pub tokens_per_minute: u32,

    /// Request bucket capacity; defaults to requests_per_minute
    #[serde(default)]
    pub burst_requests: Option<u32>,

    /// Token bucket capacity; defaults to tokens_per_minute
    #[serde(default)]
    pub burst_tokens: Option<u32>,

    /// 0 waits indefinitely
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_max_drift")]
    pub max_drift_tokens: u32,
}

fn default_rpm() -> u32 {
    30
}

fn default_tpm() -> u32 {
    14_000
}

fn default_acquire_timeout() -> u64 {
    120
}

fn default_max_drift() -> u32 {
    2_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            tokens_per_minute: default_tpm(),
            burst_requests: None,
            burst_tokens: None,
            acquire_timeout_secs: default_acquire_timeout(),
            max_drift_tokens: default_max_drift(),
        }
    }
}

// ============= Gateway Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    #[serde(default = "default_transient_retries")]
    pub max_transient_retries: u32,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,

    #[serde(default = "default_structured_retries")]
    pub max_structured_retries: u32,

    /// Completion tokens reserved per call before the real usage is known
    #[serde(default = "default_expected_completion")]
    pub expected_completion_tokens: u32,
}

fn default_transient_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8_000
}

fn default_jitter() -> u64 {
    250
}

fn default_structured_retries() -> u32 {
    2
}

fn default_expected_completion() -> u32 {
    1_024
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            max_transient_retries: default_transient_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter_ms: default_jitter(),
            max_structured_retries: default_structured_retries(),
            expected_completion_tokens: default_expected_completion(),
        }
    }
}

// ============= Quality Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    #[serde(default = "default_min_coverage")]
    pub min_citation_coverage: f64,

    #[serde(default = "default_max_unsupported")]
    pub max_unsupported_ratio: f64,

    #[serde(default = "default_min_confidence")]
    pub min_fact_confidence: f64,

    #[serde(default = "default_reading_level")]
    pub target_reading_level: f64,

    /// Sentences with fewer words are treated as structural text
    #[serde(default = "default_min_words")]
    pub min_words_per_sentence: usize,
}

fn default_min_coverage() -> f64 {
    0.95
}

fn default_max_unsupported() -> f64 {
    0.05
}

fn default_min_confidence() -> f64 {
    0.70
}

fn default_reading_level() -> f64 {
    60.0
}

fn default_min_words() -> usize {
    2
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_citation_coverage: default_min_coverage(),
            max_unsupported_ratio: default_max_unsupported(),
            min_fact_confidence: default_min_confidence(),
            target_reading_level: default_reading_level(),
            min_words_per_sentence: default_min_words(),
        }
    }
}

// ============= Pipeline Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub retry_entry: RetryEntry,

    /// Wall-clock ceiling for one run
    #[serde(default = "default_max_run_seconds")]
    pub max_run_seconds: u64,

    /// Parallel sub-tasks inside one stage
    #[serde(default = "default_stage_concurrency")]
    pub stage_concurrency: usize,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Added to max_sources on each retry
    #[serde(default = "default_retry_extra_sources")]
    pub retry_extra_sources: usize,

    /// Harvest rounds before giving up with zero sources
    #[serde(default = "default_harvest_attempts")]
    pub harvest_attempts: u32,

    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_run_seconds() -> u64 {
    600
}

fn default_stage_concurrency() -> usize {
    4
}

fn default_max_sources() -> usize {
    12
}

fn default_retry_extra_sources() -> usize {
    5
}

fn default_harvest_attempts() -> u32 {
    2
}

fn default_retrieval_k() -> usize {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_entry: RetryEntry::default(),
            max_run_seconds: default_max_run_seconds(),
            stage_concurrency: default_stage_concurrency(),
            max_sources: default_max_sources(),
            retry_extra_sources: default_retry_extra_sources(),
            harvest_attempts: default_harvest_attempts(),
            retrieval_k: default_retrieval_k(),
        }
    }
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ============= Errors =============

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl LekhaConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LekhaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check ranges and budgets. Environment variables are checked by [`Self::api_key`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.llm.api_base.trim().is_empty() {
            return invalid("llm.api_base must not be empty".to_string());
        }
        if self.llm.fast_model.trim().is_empty() || self.llm.quality_model.trim().is_empty() {
            return invalid("llm.fast_model and llm.quality_model must be set".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid(format!("llm.temperature {} outside 0.0..=2.0", self.llm.temperature));
        }
        if self.llm.max_tokens == 0 || self.llm.request_timeout_secs == 0 {
            return invalid("llm.max_tokens and llm.request_timeout_secs must be > 0".to_string());
        }

        let rl = &self.rate_limit;
        if rl.requests_per_minute == 0 || rl.tokens_per_minute == 0 {
            return invalid("rate_limit budgets must be > 0".to_string());
        }
        if rl.burst_requests == Some(0) || rl.burst_tokens == Some(0) {
            return invalid("rate_limit bursts must be > 0".to_string());
        }

        if self.gateway.expected_completion_tokens == 0 {
            return invalid("gateway.expected_completion_tokens must be > 0".to_string());
        }

        if self.gateway.base_backoff_ms > self.gateway.max_backoff_ms {
            return invalid("gateway.base_backoff_ms exceeds gateway.max_backoff_ms".to_string());
        }

        let q = &self.quality;
        for (name, value) in [
            ("min_citation_coverage", q.min_citation_coverage),
            ("max_unsupported_ratio", q.max_unsupported_ratio),
            ("min_fact_confidence", q.min_fact_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("quality.{} {} outside 0.0..=1.0", name, value));
            }
        }

        let p = &self.pipeline;
        if p.stage_concurrency == 0 {
            return invalid("pipeline.stage_concurrency must be > 0".to_string());
        }
        if p.max_sources == 0 || p.retrieval_k == 0 || p.harvest_attempts == 0 {
            return invalid(
                "pipeline.max_sources, pipeline.retrieval_k and pipeline.harvest_attempts must be > 0"
                    .to_string(),
            );
        }
        if p.max_run_seconds == 0 {
            return invalid("pipeline.max_run_seconds must be > 0".to_string());
        }

        Ok(())
    }

    /// Resolve the API key through `llm.api_key_env`.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        resolve_env(&self.llm.api_key_env)
    }

    pub fn routing(&self) -> ModelRouting {
        ModelRouting::new(self.llm.fast_model.clone(), self.llm.quality_model.clone())
    }

    pub fn governor_config(&self) -> GovernorConfig {
        let rl = &self.rate_limit;
        GovernorConfig {
            requests_per_minute: rl.requests_per_minute,
            tokens_per_minute: rl.tokens_per_minute,
            burst_requests: rl.burst_requests.unwrap_or(rl.requests_per_minute),
            burst_tokens: rl.burst_tokens.unwrap_or(rl.tokens_per_minute),
            acquire_timeout: (rl.acquire_timeout_secs > 0)
                .then(|| Duration::from_secs(rl.acquire_timeout_secs)),
            max_drift_tokens: rl.max_drift_tokens,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let g = &self.gateway;
        GatewayConfig {
            max_transient_retries: g.max_transient_retries,
            base_backoff: Duration::from_millis(g.base_backoff_ms),
            max_backoff: Duration::from_millis(g.max_backoff_ms),
            jitter: Duration::from_millis(g.jitter_ms),
            max_structured_retries: g.max_structured_retries,
            call_timeout: Duration::from_secs(self.llm.request_timeout_secs),
            default_max_tokens: self.llm.max_tokens,
            expected_completion_tokens: self.gateway.expected_completion_tokens,
            default_temperature: self.llm.temperature,
        }
    }

    pub fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            min_citation_coverage: self.quality.min_citation_coverage,
            max_unsupported_ratio: self.quality.max_unsupported_ratio,
            min_fact_confidence: self.quality.min_fact_confidence,
            target_reading_level: self.quality.target_reading_level,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let p = &self.pipeline;
        OrchestratorConfig {
            max_retries: p.max_retries,
            retry_entry: p.retry_entry,
            max_run_duration: Duration::from_secs(p.max_run_seconds),
            stage_concurrency: p.stage_concurrency,
            max_sources: p.max_sources,
            retry_extra_sources: p.retry_extra_sources,
            harvest_attempts: p.harvest_attempts,
            retrieval_k: p.retrieval_k,
            min_words_per_sentence: self.quality.min_words_per_sentence,
            thresholds: self.thresholds(),
        }
    }
}

/// Read a required environment variable
pub fn resolve_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}
