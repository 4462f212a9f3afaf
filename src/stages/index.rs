use crate::stages::{Stage, StageContext};
use crate::types::{AppError, Result};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;

/// Hands every accumulated source to the retrieval collaborator.
pub struct IndexStage;

#[async_trait]
impl Stage for IndexStage {
    fn kind(&self) -> StageKind {
        StageKind::Index
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        if state.sources.is_empty() {
            return Err(AppError::ZeroSources { attempts: 0 });
        }

        let handle = ctx.retriever.index(&state.sources).await?;
        if let Some(previous) = &state.index_handle {
            ctx.retriever.release(previous).await;
        }

        tracing::debug!(run_id = %state.run_id, sources = state.sources.len(), "Sources indexed");

        Ok(StageDelta {
            index_handle: Some(handle),
            ..Default::default()
        }
        .with_detail(format!("{} sources indexed", state.sources.len())))
    }
}
