//! Run state, phases and the transition table
//!
//! [`RunState`] is owned by the orchestrator. Stages read it and return a
//! [`StageDelta`]; only [`RunState::apply`] mutates it. Sources and claims
//! accumulate across retries and are merged by identity, never replaced.

use crate::llm::UsageStats;
use crate::rag::IndexHandle;
use crate::types::{
    AppError, Claim, ClaimKey, ClaimRuling, DraftSection, Outline, QualityReport, Result,
    RunFailure, RunStatus, SeoMetadata, Source, TopicSpec,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ============= Stages and Phases =============

/// The eight pipeline stages plus the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Plan,
    Harvest,
    Index,
    Summarize,
    FactCheck,
    Write,
    Edit,
    Optimize,
    Judge,
}

impl StageKind {
    pub const ALL: [StageKind; 9] = [
        StageKind::Plan,
        StageKind::Harvest,
        StageKind::Index,
        StageKind::Summarize,
        StageKind::FactCheck,
        StageKind::Write,
        StageKind::Edit,
        StageKind::Optimize,
        StageKind::Judge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Plan => "plan",
            StageKind::Harvest => "harvest",
            StageKind::Index => "index",
            StageKind::Summarize => "summarize",
            StageKind::FactCheck => "fact_check",
            StageKind::Write => "write",
            StageKind::Edit => "edit",
            StageKind::Optimize => "optimize",
            StageKind::Judge => "judge",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a run is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Harvesting,
    Indexing,
    Summarizing,
    FactChecking,
    Writing,
    Editing,
    Optimizing,
    Judging,
    Retrying,
    Succeeded,
    FailedQuality,
    FailedFatal,
}

impl Phase {
    /// Stage executed while in this phase.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Phase::Planning => Some(StageKind::Plan),
            Phase::Harvesting => Some(StageKind::Harvest),
            Phase::Indexing => Some(StageKind::Index),
            Phase::Summarizing => Some(StageKind::Summarize),
            Phase::FactChecking => Some(StageKind::FactCheck),
            Phase::Writing => Some(StageKind::Write),
            Phase::Editing => Some(StageKind::Edit),
            Phase::Optimizing => Some(StageKind::Optimize),
            Phase::Judging => Some(StageKind::Judge),
            Phase::Retrying | Phase::Succeeded | Phase::FailedQuality | Phase::FailedFatal => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::FailedQuality | Phase::FailedFatal)
    }
}

/// Stage the orchestrator re-enters after a Retry verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryEntry {
    #[default]
    Harvesting,
    Summarizing,
    Writing,
    /// Chosen per retry from the hint: harvest when more sources are needed,
    /// re-summarize when confidence is low, otherwise rewrite
    Auto,
}

/// Events driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The current phase's stage returned successfully
    StageCompleted,
    /// Judge verdict Pass
    Passed,
    /// Judge verdict Retry with budget left
    RetryRequested,
    /// Judge verdict Reject, or Retry with no budget left
    Rejected,
    /// Leave Retrying for the chosen entry phase
    Resume(Phase),
    /// Any fatal condition
    Fatal,
}

/// The transition table. Anything not listed is an invalid transition.
pub fn next_phase(from: Phase, event: Transition) -> Option<Phase> {
    use Phase::*;
    match (from, event) {
        (p, _) if p.is_terminal() => None,
        (_, Transition::Fatal) => Some(FailedFatal),
        (Planning, Transition::StageCompleted) => Some(Harvesting),
        (Harvesting, Transition::StageCompleted) => Some(Indexing),
        (Indexing, Transition::StageCompleted) => Some(Summarizing),
        (Summarizing, Transition::StageCompleted) => Some(FactChecking),
        (FactChecking, Transition::StageCompleted) => Some(Writing),
        (Writing, Transition::StageCompleted) => Some(Editing),
        (Editing, Transition::StageCompleted) => Some(Optimizing),
        (Optimizing, Transition::StageCompleted) => Some(Judging),
        (Judging, Transition::Passed) => Some(Succeeded),
        (Judging, Transition::RetryRequested) => Some(Retrying),
        (Judging, Transition::Rejected) => Some(FailedQuality),
        (Retrying, Transition::Resume(entry @ (Harvesting | Summarizing | Writing))) => Some(entry),
        _ => None,
    }
}

// ============= Retry Hint and Trace =============

/// What the previous attempt got wrong, for re-executed stages to target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetryHint {
    /// Attempt this hint was produced for (1-based attempt about to start)
    pub attempt: u32,
    pub failure_reasons: Vec<String>,
    pub uncited_sentences: Vec<String>,
    pub unknown_marker_count: usize,
    pub low_confidence_claims: Vec<String>,
    pub need_more_sources: bool,
    pub previous_coverage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Failed,
}

/// One executed stage, in order of execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub stage: StageKind,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

// ============= Stage Delta =============

/// Output of one stage. Applied to the run state by the orchestrator only.
#[derive(Debug, Clone, Default)]
pub struct StageDelta {
    pub outline: Option<Outline>,
    /// Merged by content hash
    pub sources: Vec<Source>,
    pub index_handle: Option<IndexHandle>,
    /// Replaces the previous sections when present
    pub sections: Option<Vec<DraftSection>>,
    /// Merged by claim identity
    pub claims: Vec<Claim>,
    /// Honored only from the fact-check and judge stages
    pub rulings: Vec<ClaimRuling>,
    pub draft: Option<String>,
    pub seo: Option<SeoMetadata>,
    pub report: Option<QualityReport>,
    /// Short human-readable note for the stage trace
    pub detail: String,
}

impl StageDelta {
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Counts of what an applied delta changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub sources_added: usize,
    pub sources_duplicate: usize,
    pub claims_added: usize,
    pub claims_duplicate: usize,
    pub claims_dropped: usize,
    pub rulings_applied: usize,
}

// ============= Run State =============

/// Everything known about one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub topic: TopicSpec,
    pub phase: Phase,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// 1-based attempt currently executing
    pub attempt: u32,
    /// Executions per stage
    pub stage_attempts: BTreeMap<StageKind, u32>,
    pub outline: Option<Outline>,
    /// Ordered; citation marker `[n]` refers to `sources[n - 1]`
    pub sources: Vec<Source>,
    pub claims: Vec<Claim>,
    pub index_handle: Option<IndexHandle>,
    pub sections: Vec<DraftSection>,
    pub draft: Option<String>,
    pub seo: Option<SeoMetadata>,
    /// Latest report
    pub report: Option<QualityReport>,
    pub report_history: Vec<QualityReport>,
    pub retry_hint: Option<RetryHint>,
    pub trace: Vec<StageRecord>,
    pub usage: UsageStats,
    /// Paths written by the exporter
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, topic: TopicSpec) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            topic,
            phase: Phase::Planning,
            status: RunStatus::Running,
            failure: None,
            attempt: 1,
            stage_attempts: BTreeMap::new(),
            outline: None,
            sources: Vec::new(),
            claims: Vec::new(),
            index_handle: None,
            sections: Vec::new(),
            draft: None,
            seo: None,
            report: None,
            report_history: Vec::new(),
            retry_hint: None,
            trace: Vec::new(),
            usage: UsageStats::default(),
            artifacts: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Stable run id: hash of the topic plus an explicit seed, or the creation time.
    pub fn derive_run_id(topic: &str, seed: Option<&str>, now: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(topic.trim().to_lowercase().as_bytes());
        hasher.update(b"\n");
        match seed {
            Some(seed) => hasher.update(seed.as_bytes()),
            None => hasher.update(
                now.timestamp_nanos_opt()
                    .unwrap_or_else(|| now.timestamp_micros())
                    .to_string()
                    .as_bytes(),
            ),
        }
        format!("run-{}", &hex::encode(hasher.finalize())[..12])
    }

    /// Current stage name, if the run is executing one.
    pub fn current_stage(&self) -> Option<StageKind> {
        self.phase.stage()
    }

    /// 1-based citation number of a source id.
    pub fn citation_index(&self, source_id: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.id == source_id).map(|p| p + 1)
    }

    /// Source for a 1-based citation number.
    pub fn source_by_citation(&self, index: usize) -> Option<&Source> {
        index.checked_sub(1).and_then(|i| self.sources.get(i))
    }

    /// Move along the transition table.
    pub fn transition(&mut self, event: Transition) -> Result<Phase> {
        let next = next_phase(self.phase, event).ok_or_else(|| {
            AppError::Internal(format!("Invalid transition {:?} from {:?}", event, self.phase))
        })?;
        self.phase = next;
        self.status = match next {
            Phase::Succeeded => RunStatus::Succeeded,
            Phase::FailedQuality => RunStatus::FailedQuality,
            Phase::FailedFatal => RunStatus::FailedFatal,
            _ => RunStatus::Running,
        };
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(next)
    }

    /// Terminate with a reason.
    pub fn fail(&mut self, failure: RunFailure, quality: bool) {
        let event = if quality && self.phase == Phase::Judging {
            Transition::Rejected
        } else {
            Transition::Fatal
        };
        if self.transition(event).is_err() {
            // already terminal or not judging; fall back to the fatal edge
            self.phase = Phase::FailedFatal;
            self.status = RunStatus::FailedFatal;
            self.finished_at.get_or_insert_with(Utc::now);
        }
        self.failure = Some(failure);
    }

    /// Merge sources, skipping content hashes already present.
    pub fn merge_sources(&mut self, sources: Vec<Source>) -> (usize, usize) {
        let mut known: HashSet<String> = self.sources.iter().map(|s| s.id.clone()).collect();
        let mut added = 0;
        let mut duplicate = 0;
        for source in sources {
            if known.insert(source.id.clone()) {
                self.sources.push(source);
                added += 1;
            } else {
                duplicate += 1;
            }
        }
        (added, duplicate)
    }

    /// Merge claims by identity. Unknown source ids are stripped; a claim whose
    /// every source id was unknown is dropped.
    pub fn merge_claims(&mut self, claims: Vec<Claim>) -> (usize, usize, usize) {
        let source_ids: HashSet<&str> = self.sources.iter().map(|s| s.id.as_str()).collect();
        let mut known: HashSet<ClaimKey> = self.claims.iter().map(Claim::key).collect();
        let mut accepted = Vec::new();
        let (mut added, mut duplicate, mut dropped) = (0, 0, 0);

        for mut claim in claims {
            if claim.text.trim().is_empty() {
                dropped += 1;
                continue;
            }
            let had_sources = !claim.source_ids.is_empty();
            claim.source_ids.retain(|id| source_ids.contains(id.as_str()));
            if had_sources && claim.source_ids.is_empty() {
                dropped += 1;
                continue;
            }
            if known.insert(claim.key()) {
                accepted.push(claim);
                added += 1;
            } else {
                duplicate += 1;
            }
        }

        self.claims.extend(accepted);
        (added, duplicate, dropped)
    }

    /// Apply tag rulings by claim identity. Returns how many matched.
    pub fn apply_rulings(&mut self, rulings: &[ClaimRuling]) -> usize {
        let mut applied = 0;
        for ruling in rulings {
            if let Some(claim) = self.claims.iter_mut().find(|c| c.key() == ruling.key) {
                claim.tag = ruling.tag;
                if let Some(confidence) = ruling.confidence {
                    claim.confidence = confidence.clamp(0.0, 1.0);
                }
                claim.checked = true;
                applied += 1;
            }
        }
        applied
    }

    /// Fold a stage's output into the state.
    pub fn apply(&mut self, stage: StageKind, delta: StageDelta) -> MergeSummary {
        let mut summary = MergeSummary::default();

        if let Some(outline) = delta.outline {
            self.outline = Some(outline);
        }
        let (added, duplicate) = self.merge_sources(delta.sources);
        summary.sources_added = added;
        summary.sources_duplicate = duplicate;
        if let Some(handle) = delta.index_handle {
            self.index_handle = Some(handle);
        }
        if let Some(sections) = delta.sections {
            self.sections = sections;
        }
        let (added, duplicate, dropped) = self.merge_claims(delta.claims);
        summary.claims_added = added;
        summary.claims_duplicate = duplicate;
        summary.claims_dropped = dropped;

        if !delta.rulings.is_empty() {
            if matches!(stage, StageKind::FactCheck | StageKind::Judge) {
                summary.rulings_applied = self.apply_rulings(&delta.rulings);
            } else {
                tracing::warn!(
                    run_id = %self.run_id,
                    stage = %stage,
                    count = delta.rulings.len(),
                    "Ignoring claim rulings from a stage that may not retag claims"
                );
            }
        }

        if let Some(draft) = delta.draft {
            self.draft = Some(draft);
        }
        if let Some(seo) = delta.seo {
            self.seo = Some(seo);
        }
        if let Some(report) = delta.report {
            self.report_history.push(report.clone());
            self.report = Some(report);
        }

        self.updated_at = Utc::now();
        summary
    }

    pub fn record_stage(&mut self, record: StageRecord) {
        *self.stage_attempts.entry(record.stage).or_insert(0) += 1;
        self.trace.push(record);
    }

    pub fn stage_count(&self, stage: StageKind) -> u32 {
        self.stage_attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Rendered article followed by a numbered reference list.
    pub fn article_markdown(&self) -> Option<String> {
        let draft = self.draft.as_ref()?;
        let mut out = String::new();
        out.push_str(draft.trim_end());
        out.push_str("\n\n## References\n\n");
        for (i, source) in self.sources.iter().enumerate() {
            let mut parts = vec![format!("[{}]", i + 1)];
            if let Some(author) = &source.author {
                parts.push(format!("{}.", author));
            }
            parts.push(format!("\"{}.\"", source.title));
            if let Some(date) = &source.published_date {
                parts.push(format!("Published {}.", date));
            }
            parts.push(format!("Available at: {}", source.url));
            parts.push(format!("(accessed {})", source.retrieved_at.format("%Y-%m-%d")));
            out.push_str(&parts.join(" "));
            out.push('\n');
        }
        Some(out)
    }
}
