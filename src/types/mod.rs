use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

// ============= Run Input Types =============

/// What a run is asked to write about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopicSpec {
    pub topic: String,
    pub audience: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(topic: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            audience: audience.into(),
            ..Default::default()
        }
    }

    pub fn with_goals(mut self, goals: Vec<String>) -> Self {
        self.goals = goals;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }
}

// ============= Article Types =============

/// Planned article structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Outline {
    pub title: String,
    pub sections: Vec<OutlineSection>,
    #[serde(default)]
    pub target_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutlineSection {
    pub title: String,
    #[serde(default)]
    pub key_questions: Vec<String>,
    #[serde(default)]
    pub estimated_words: Option<u32>,
}

/// Summarized content for one outline section, citation markers included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftSection {
    pub title: String,
    pub content: String,
    pub word_count: usize,
}

impl DraftSection {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            title: title.into(),
            word_count: content.split_whitespace().count(),
            content,
        }
    }
}

/// Search metadata produced by the optimize stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoMetadata {
    pub title: String,
    pub meta_description: String,
    pub slug: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

// ============= Source Types =============

/// A harvested document. Immutable once it enters a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    /// Content hash of URL + extracted text
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    pub retrieved_at: DateTime<Utc>,
    pub text: String,
    /// Domain authority in [0, 1], when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<f32>,
}

impl Source {
    /// Build a source, deriving its id from the URL and extracted text.
    pub fn new(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        let url = url.into();
        let text = text.into();
        Self {
            id: Self::content_id(&url, &text),
            url,
            title: title.into(),
            author: None,
            published_date: None,
            retrieved_at: Utc::now(),
            text,
            authority: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_published_date(mut self, date: impl Into<String>) -> Self {
        self.published_date = Some(date.into());
        self
    }

    pub fn with_authority(mut self, authority: f32) -> Self {
        self.authority = Some(authority.clamp(0.0, 1.0));
        self
    }

    /// Stable content hash used for deduplication across retries.
    pub fn content_id(url: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
        hasher.update(text.as_bytes());
        hex::encode(&hasher.finalize()[..12])
    }

    /// Host part of the URL, lowercased and without a leading `www.`.
    ///
    /// Scheme-less URLs are read as `https`. Empty when there is no host.
    pub fn domain(&self) -> String {
        let host = Url::parse(&self.url)
            .or_else(|_| Url::parse(&format!("https://{}", self.url)))
            .ok()
            .and_then(|url| url.host_str().map(str::to_lowercase))
            .unwrap_or_default();
        match host.strip_prefix("www.") {
            Some(rest) => rest.to_string(),
            None => host,
        }
    }
}

// ============= Claim Types =============

/// Citation status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimTag {
    Cited,
    Common,
    #[default]
    Unsupported,
}

/// A unit of factual assertion extracted during summarization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub text: String,
    /// Ids of sources supporting this claim; every id exists in the run's source list
    #[serde(default)]
    pub source_ids: BTreeSet<String>,
    /// Confidence in [0, 1]
    pub confidence: f32,
    #[serde(default)]
    pub tag: ClaimTag,
    /// Whether the fact-checker has already ruled on this claim
    #[serde(default)]
    pub checked: bool,
}

impl Claim {
    pub fn new(text: impl Into<String>, source_ids: BTreeSet<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            source_ids,
            confidence: confidence.clamp(0.0, 1.0),
            tag: ClaimTag::Unsupported,
            checked: false,
        }
    }

    /// Identity used to merge claims across retries: normalised text + source set.
    pub fn key(&self) -> ClaimKey {
        ClaimKey {
            text: normalize_claim_text(&self.text),
            source_ids: self.source_ids.clone(),
        }
    }
}

/// Merge identity of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    pub text: String,
    pub source_ids: BTreeSet<String>,
}

/// Lowercase, collapse whitespace, drop trailing punctuation.
pub fn normalize_claim_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '?', ';', ','])
        .to_lowercase()
}

/// A ruling on a claim, produced by the fact-checker or the judge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimRuling {
    pub key: ClaimKey,
    pub tag: ClaimTag,
    /// Replacement confidence, when the ruling carries one
    pub confidence: Option<f32>,
}

// ============= Quality Types =============

/// Outcome of the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Retry,
    Reject,
}

/// One threshold comparison inside a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateCheck {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub passed: bool,
    /// Advisory checks never influence the verdict
    #[serde(default)]
    pub advisory: bool,
}

/// Scoring of one draft. Produced fresh by each judge pass and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub citation_coverage: f64,
    pub unsupported_ratio: f64,
    pub mean_fact_confidence: f64,
    pub reading_level: f64,
    pub total_sentences: usize,
    pub factual_sentences: usize,
    pub covered_sentences: usize,
    /// Citation markers that did not resolve to a known source
    pub unknown_marker_count: usize,
    pub word_count: usize,
    pub source_count: usize,
    pub checks: Vec<GateCheck>,
    pub failure_reasons: Vec<String>,
    pub recommendations: Vec<String>,
    pub uncited_sentences: Vec<String>,
    /// 1-based attempt this report was produced on
    pub attempt: u32,
    pub max_attempts: u32,
    pub verdict: Verdict,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

// ============= Run Outcome Types =============

/// Terminal or running status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    FailedQuality,
    FailedFatal,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Why a run ended without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    RateTimeout,
    GatewayExhausted,
    ZeroSources,
    WallClockExceeded,
    MaxRetriesExceeded,
    NoFactualContent,
    StructuredOutputFailure,
    ProviderRejected,
    Configuration,
    Collaborator,
    Cancelled,
    Internal,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FatalReason::RateTimeout => "rate_timeout",
            FatalReason::GatewayExhausted => "gateway_exhausted",
            FatalReason::ZeroSources => "zero_sources",
            FatalReason::WallClockExceeded => "wall_clock_exceeded",
            FatalReason::MaxRetriesExceeded => "max_retries_exceeded",
            FatalReason::NoFactualContent => "no_factual_content",
            FatalReason::StructuredOutputFailure => "structured_output_failure",
            FatalReason::ProviderRejected => "provider_rejected",
            FatalReason::Configuration => "configuration",
            FatalReason::Collaborator => "collaborator",
            FatalReason::Cancelled => "cancelled",
            FatalReason::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Reason code plus a human-readable message, stored on the terminal run state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub reason: FatalReason,
    pub message: String,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LLM provider rejected request: {0}")]
    Provider(String),

    #[error("LLM gateway exhausted after {attempts} attempts: {last_error}")]
    GatewayExhausted { attempts: u32, last_error: String },

    #[error("Timed out waiting for rate budget after {waited_ms}ms")]
    RateTimeout { waited_ms: u64 },

    #[error("Structured output for '{schema}' failed after {attempts} attempts: {error}")]
    StructuredOutput {
        schema: String,
        attempts: u32,
        error: String,
    },

    #[error("No sources harvested after {attempts} attempts")]
    ZeroSources { attempts: u32 },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Reason code recorded on a run that this error terminates.
    pub fn fatal_reason(&self) -> FatalReason {
        match self {
            AppError::Configuration(_) | AppError::InvalidInput(_) => FatalReason::Configuration,
            AppError::Provider(_) => FatalReason::ProviderRejected,
            AppError::GatewayExhausted { .. } => FatalReason::GatewayExhausted,
            AppError::RateTimeout { .. } => FatalReason::RateTimeout,
            AppError::StructuredOutput { .. } => FatalReason::StructuredOutputFailure,
            AppError::ZeroSources { .. } => FatalReason::ZeroSources,
            AppError::Collaborator(_) => FatalReason::Collaborator,
            AppError::Cancelled => FatalReason::Cancelled,
            AppError::NotFound(_) | AppError::Internal(_) => FatalReason::Internal,
        }
    }

    pub fn into_failure(self) -> RunFailure {
        RunFailure {
            reason: self.fatal_reason(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Collaborator(format!("I/O error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
