//! Orchestrator
//!
//! Drives one run through the transition table in [`crate::workflows::state`].
//! Stages execute one at a time; the orchestrator checks for cancellation and
//! the wall-clock deadline at every stage boundary, applies each stage's delta
//! and interprets the judge's verdict.

use crate::quality::QualityThresholds;
use crate::stages::{StageContext, StageRegistry};
use crate::types::{FatalReason, QualityReport, RunFailure, Verdict};
use crate::workflows::state::{
    Phase, RetryEntry, RetryHint, RunState, StageKind, StageOutcome, StageRecord, Transition,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Per-run pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Retries after the first attempt (default: 2)
    pub max_retries: u32,
    pub retry_entry: RetryEntry,
    /// Wall-clock ceiling for the whole run
    pub max_run_duration: Duration,
    /// Parallel sub-tasks inside one stage
    pub stage_concurrency: usize,
    pub max_sources: usize,
    /// Extra sources allowed per retry
    pub retry_extra_sources: usize,
    /// Harvest rounds before failing with zero sources
    pub harvest_attempts: u32,
    pub retrieval_k: usize,
    pub min_words_per_sentence: usize,
    pub thresholds: QualityThresholds,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_entry: RetryEntry::Harvesting,
            max_run_duration: Duration::from_secs(600),
            stage_concurrency: 4,
            max_sources: 12,
            retry_extra_sources: 5,
            harvest_attempts: 2,
            retrieval_k: 5,
            min_words_per_sentence: 2,
            thresholds: QualityThresholds::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Judge passes allowed, counting the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Sequences stages for one run and owns its state while it executes.
pub struct Orchestrator {
    registry: StageRegistry,
    ctx: StageContext,
}

impl Orchestrator {
    pub fn new(registry: StageRegistry, ctx: StageContext) -> Self {
        Self { registry, ctx }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.ctx.config
    }

    /// Run to a terminal phase. Never returns a non-terminal state.
    ///
    /// `cancel` is honoured between stages. Every state change is published on
    /// `updates` when given.
    pub async fn run(
        &self,
        mut state: RunState,
        cancel: Arc<AtomicBool>,
        updates: Option<&watch::Sender<RunState>>,
    ) -> RunState {
        let deadline = Instant::now() + self.ctx.config.max_run_duration;
        tracing::info!(
            run_id = %state.run_id,
            topic = %state.topic.topic,
            max_retries = self.ctx.config.max_retries,
            "Run started"
        );
        publish(updates, &state);

        while !state.phase.is_terminal() {
            if cancel.load(Ordering::SeqCst) {
                state.fail(
                    RunFailure {
                        reason: FatalReason::Cancelled,
                        message: format!("Cancelled during {:?}", state.phase),
                    },
                    false,
                );
                break;
            }
            if Instant::now() >= deadline {
                state.fail(self.wall_clock_failure(&state), false);
                break;
            }

            if state.phase == Phase::Retrying {
                let entry = self.retry_entry(&state);
                if let Err(e) = state.transition(Transition::Resume(entry)) {
                    state.fail(e.into_failure(), false);
                    break;
                }
                tracing::info!(run_id = %state.run_id, attempt = state.attempt, entry = ?entry, "Retrying run");
                publish(updates, &state);
                continue;
            }

            let Some(kind) = state.phase.stage() else {
                break;
            };
            self.run_stage(&mut state, kind, deadline).await;
            state.usage = self.ctx.gateway.usage();
            publish(updates, &state);
        }

        if let Some(index) = state.index_handle {
            self.ctx.retriever.release(&index).await;
        }
        state.usage = self.ctx.gateway.usage();
        publish(updates, &state);

        match &state.failure {
            None => tracing::info!(
                run_id = %state.run_id,
                status = ?state.status,
                attempts = state.attempt,
                tokens = state.usage.total_tokens(),
                "Run finished"
            ),
            Some(failure) => tracing::warn!(
                run_id = %state.run_id,
                status = ?state.status,
                reason = %failure.reason,
                message = %failure.message,
                attempts = state.attempt,
                "Run failed"
            ),
        }
        state
    }

    async fn run_stage(&self, state: &mut RunState, kind: StageKind, deadline: Instant) {
        let stage = match self.registry.get(kind) {
            Ok(stage) => stage,
            Err(e) => {
                state.fail(e.into_failure(), false);
                return;
            }
        };

        tracing::info!(run_id = %state.run_id, stage = %kind, attempt = state.attempt, "Stage started");
        let started_at = Utc::now();
        let started = Instant::now();
        let outcome = tokio::time::timeout_at(deadline, stage.run(state, &self.ctx)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut record = StageRecord {
            stage: kind,
            attempt: state.attempt,
            started_at,
            duration_ms,
            outcome: StageOutcome::Failed,
            detail: String::new(),
        };

        match outcome {
            Err(_) => {
                record.detail = "wall-clock limit reached".to_string();
                state.record_stage(record);
                state.fail(self.wall_clock_failure(state), false);
            }
            Ok(Err(e)) => {
                tracing::error!(
                    run_id = %state.run_id,
                    stage = %kind,
                    attempt = state.attempt,
                    duration_ms,
                    error = %e,
                    "Stage failed"
                );
                record.detail = e.to_string();
                state.record_stage(record);
                state.fail(e.into_failure(), false);
            }
            Ok(Ok(delta)) => {
                record.outcome = StageOutcome::Completed;
                record.detail = delta.detail.clone();
                let summary = state.apply(kind, delta);
                state.record_stage(record);

                tracing::info!(
                    run_id = %state.run_id,
                    stage = %kind,
                    attempt = state.attempt,
                    duration_ms,
                    sources_added = summary.sources_added,
                    sources_duplicate = summary.sources_duplicate,
                    claims_added = summary.claims_added,
                    claims_duplicate = summary.claims_duplicate,
                    rulings = summary.rulings_applied,
                    "Stage completed"
                );

                if kind == StageKind::Judge {
                    self.interpret_verdict(state);
                } else if let Err(e) = state.transition(Transition::StageCompleted) {
                    state.fail(e.into_failure(), false);
                }
            }
        }
    }

    fn interpret_verdict(&self, state: &mut RunState) {
        let Some(report) = state.report.clone() else {
            state.fail(
                RunFailure {
                    reason: FatalReason::Internal,
                    message: "Judge produced no report".to_string(),
                },
                false,
            );
            return;
        };

        let result = match report.verdict {
            Verdict::Pass => state.transition(Transition::Passed).map(|_| ()),
            Verdict::Retry if state.attempt <= self.ctx.config.max_retries => {
                state.retry_hint = Some(self.build_hint(state, &report));
                state.attempt += 1;
                state.transition(Transition::RetryRequested).map(|_| ())
            }
            Verdict::Retry | Verdict::Reject => {
                let reason = if report.factual_sentences == 0 {
                    FatalReason::NoFactualContent
                } else {
                    FatalReason::MaxRetriesExceeded
                };
                let message = if report.failure_reasons.is_empty() {
                    format!("Draft rejected on attempt {}", state.attempt)
                } else {
                    format!(
                        "Draft rejected on attempt {}: {}",
                        state.attempt,
                        report.failure_reasons.join("; ")
                    )
                };
                state.fail(RunFailure { reason, message }, true);
                Ok(())
            }
        };

        if let Err(e) = result {
            state.fail(e.into_failure(), false);
        }
    }

    fn build_hint(&self, state: &RunState, report: &QualityReport) -> RetryHint {
        let thresholds = &self.ctx.config.thresholds;
        let low_confidence_claims = state
            .claims
            .iter()
            .filter(|c| (c.confidence as f64) < thresholds.min_fact_confidence)
            .take(10)
            .map(|c| c.text.clone())
            .collect();

        RetryHint {
            attempt: state.attempt + 1,
            failure_reasons: report.failure_reasons.clone(),
            uncited_sentences: report.uncited_sentences.clone(),
            unknown_marker_count: report.unknown_marker_count,
            low_confidence_claims,
            need_more_sources: report.citation_coverage < thresholds.min_citation_coverage
                || report.unknown_marker_count > 0,
            previous_coverage: report.citation_coverage,
        }
    }

    fn retry_entry(&self, state: &RunState) -> Phase {
        match self.ctx.config.retry_entry {
            RetryEntry::Harvesting => Phase::Harvesting,
            RetryEntry::Summarizing => Phase::Summarizing,
            RetryEntry::Writing => Phase::Writing,
            RetryEntry::Auto => match (&state.retry_hint, &state.report) {
                (Some(hint), _) if hint.need_more_sources => Phase::Harvesting,
                (_, Some(report))
                    if report.mean_fact_confidence < self.ctx.config.thresholds.min_fact_confidence =>
                {
                    Phase::Summarizing
                }
                _ => Phase::Writing,
            },
        }
    }

    fn wall_clock_failure(&self, state: &RunState) -> RunFailure {
        RunFailure {
            reason: FatalReason::WallClockExceeded,
            message: format!(
                "Run exceeded {:?} during {:?}",
                self.ctx.config.max_run_duration, state.phase
            ),
        }
    }
}

fn publish(updates: Option<&watch::Sender<RunState>>, state: &RunState) {
    if let Some(tx) = updates {
        tx.send_replace(state.clone());
    }
}
