use crate::quality::AttemptBudget;
use crate::stages::{Stage, StageContext};
use crate::types::{AppError, Result};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;

/// Runs the quality gate over the final draft. Makes no model calls.
pub struct JudgeStage;

#[async_trait]
impl Stage for JudgeStage {
    fn kind(&self) -> StageKind {
        StageKind::Judge
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let draft = state
            .draft
            .as_deref()
            .ok_or_else(|| AppError::Internal("Judge requires a draft".to_string()))?;

        let budget = AttemptBudget::new(state.attempt, ctx.config.max_retries + 1);
        let report = ctx
            .evaluator
            .evaluate(draft, &state.sources, &state.claims, budget);
        let rulings = ctx.evaluator.retag_claims(draft, &state.sources, &state.claims);

        tracing::info!(
            run_id = %state.run_id,
            attempt = state.attempt,
            coverage = report.citation_coverage,
            unsupported = report.unsupported_ratio,
            confidence = report.mean_fact_confidence,
            reading_level = report.reading_level,
            unknown_markers = report.unknown_marker_count,
            verdict = ?report.verdict,
            "Draft judged"
        );

        let detail = format!(
            "{:?}: coverage {:.2}, unsupported {:.2}, confidence {:.2}",
            report.verdict, report.citation_coverage, report.unsupported_ratio, report.mean_fact_confidence
        );
        Ok(StageDelta {
            report: Some(report),
            rulings,
            ..Default::default()
        }
        .with_detail(detail))
    }
}
