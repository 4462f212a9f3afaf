use crate::llm::{ModelClass, PromptSpec};
use crate::rag::IndexHandle;
use crate::stages::{fan_out, prompts, unit_interval, Stage, StageContext};
use crate::types::{AppError, Claim, ClaimRuling, ClaimTag, Result};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckVerdict {
    Supported,
    Refuted,
    #[serde(alias = "needs-more-evidence")]
    NeedsMoreEvidence,
    #[serde(alias = "common")]
    CommonKnowledge,
}

#[derive(Debug, Deserialize)]
struct CheckPayload {
    verdict: CheckVerdict,
    #[serde(deserialize_with = "unit_interval")]
    confidence: f32,
}

/// Rules on every claim the fact-checker has not seen yet.
pub struct FactCheckStage;

#[async_trait]
impl Stage for FactCheckStage {
    fn kind(&self) -> StageKind {
        StageKind::FactCheck
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let handle = state
            .index_handle
            .ok_or_else(|| AppError::Internal("Fact-check requires a retrieval index".to_string()))?;
        let pending: Vec<Claim> = state.claims.iter().filter(|c| !c.checked).cloned().collect();
        if pending.is_empty() {
            return Ok(StageDelta::default().with_detail("no unchecked claims"));
        }

        let worker_ctx = ctx.clone();
        let rulings = fan_out(pending, ctx.config.stage_concurrency, move |claim| {
            check_claim(worker_ctx.clone(), handle, claim)
        })
        .await?;

        let cited = rulings.iter().filter(|r| r.tag == ClaimTag::Cited).count();
        let common = rulings.iter().filter(|r| r.tag == ClaimTag::Common).count();
        tracing::info!(
            run_id = %state.run_id,
            checked = rulings.len(),
            cited,
            common,
            unsupported = rulings.len() - cited - common,
            "Claims checked"
        );

        let detail = format!("{} claims checked, {} cited", rulings.len(), cited);
        Ok(StageDelta {
            rulings,
            ..Default::default()
        }
        .with_detail(detail))
    }
}

async fn check_claim(ctx: StageContext, handle: IndexHandle, claim: Claim) -> Result<ClaimRuling> {
    let evidence = ctx
        .retriever
        .retrieve(&handle, &claim.text, ctx.config.retrieval_k.min(3))
        .await?;
    let evidence_text = evidence
        .iter()
        .map(|p| format!("From \"{}\":\n{}", p.source.title, p.passage.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = PromptSpec::new(
        "factcheck.claim",
        prompts::fact_checker(),
        format!("Claim: {}\n\nEvidence:\n{}", claim.text, evidence_text),
    )
    .with_max_tokens(300);
    let payload: CheckPayload = ctx.gateway.complete_json(&prompt, ModelClass::Fast).await?;

    Ok(ClaimRuling {
        key: claim.key(),
        tag: tag_for(payload.verdict, &claim),
        confidence: Some(payload.confidence),
    })
}

/// A supported claim is only Cited when it names at least one source.
pub fn tag_for(verdict: CheckVerdict, claim: &Claim) -> ClaimTag {
    match verdict {
        CheckVerdict::Supported if !claim.source_ids.is_empty() => ClaimTag::Cited,
        CheckVerdict::CommonKnowledge => ClaimTag::Common,
        _ => ClaimTag::Unsupported,
    }
}
