//! Pipeline stages
//!
//! Each stage implements [`Stage`]: it reads the run state, may call the
//! inference gateway and the collaborators in [`StageContext`], and returns a
//! [`StageDelta`] for the orchestrator to apply. Stages never hold the run
//! state across calls. Independent sub-tasks inside a stage go through
//! [`fan_out`], which waits for every sub-task before returning.

pub mod edit;
pub mod factcheck;
pub mod harvest;
pub mod index;
pub mod judge;
pub mod optimize;
pub mod plan;
pub mod prompts;
pub mod summarize;
pub mod write;

use crate::llm::InferenceGateway;
use crate::quality::CitationEvaluator;
use crate::rag::Retriever;
use crate::tools::Harvester;
use crate::types::{AppError, Result};
use crate::workflows::{OrchestratorConfig, RunState, StageDelta, StageKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub use edit::EditStage;
pub use factcheck::FactCheckStage;
pub use harvest::HarvestStage;
pub use index::IndexStage;
pub use judge::JudgeStage;
pub use optimize::OptimizeStage;
pub use plan::PlanStage;
pub use summarize::SummarizeStage;
pub use write::WriteStage;

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta>;
}

/// Everything a stage may call. Cheap to clone.
#[derive(Clone)]
pub struct StageContext {
    pub gateway: Arc<InferenceGateway>,
    pub harvester: Arc<dyn Harvester>,
    pub retriever: Arc<dyn Retriever>,
    pub evaluator: Arc<CitationEvaluator>,
    pub config: OrchestratorConfig,
}

/// Lookup from stage kind to implementation.
#[derive(Clone)]
pub struct StageRegistry {
    stages: HashMap<StageKind, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// All nine stages with their standard implementations.
    pub fn standard() -> Self {
        Self::empty()
            .with_stage(Arc::new(PlanStage))
            .with_stage(Arc::new(HarvestStage))
            .with_stage(Arc::new(IndexStage))
            .with_stage(Arc::new(SummarizeStage))
            .with_stage(Arc::new(FactCheckStage))
            .with_stage(Arc::new(WriteStage))
            .with_stage(Arc::new(EditStage))
            .with_stage(Arc::new(OptimizeStage))
            .with_stage(Arc::new(JudgeStage))
    }

    /// Register or replace the implementation for `stage.kind()`.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(stage.kind(), stage);
        self
    }

    pub fn get(&self, kind: StageKind) -> Result<Arc<dyn Stage>> {
        self.stages
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("No stage registered for '{}'", kind)))
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Run `f` over `items` with at most `limit` in flight.
///
/// Results keep the order of `items`. Every sub-task is awaited before
/// returning; if any failed, the error of the earliest failing item is returned.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();

    for (position, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let task = f(item);
        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => task.await,
                Err(e) => Err(AppError::Internal(format!("Stage worker pool closed: {}", e))),
            };
            (position, result)
        });
    }

    let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
    let mut first_error: Option<(usize, AppError)> = None;

    while let Some(joined) = set.join_next().await {
        let (position, result) = match joined {
            Ok(pair) => pair,
            Err(e) => (total, Err(AppError::Internal(format!("Stage sub-task failed: {}", e)))),
        };
        match result {
            Ok(value) => {
                if let Some(slot) = results.get_mut(position) {
                    *slot = Some(value);
                }
            }
            Err(err) => {
                if first_error.as_ref().is_none_or(|(p, _)| position < *p) {
                    first_error = Some((position, err));
                }
            }
        }
    }

    if let Some((_, err)) = first_error {
        return Err(err);
    }
    results
        .into_iter()
        .map(|r| r.ok_or_else(|| AppError::Internal("Stage sub-task produced no result".to_string())))
        .collect()
}

/// Serde helper for model-reported scores, which must lie in `0.0..=1.0`.
///
/// An out-of-range value fails deserialization, so the gateway re-prompts.
pub(crate) fn unit_interval<'de, D>(deserializer: D) -> std::result::Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <f32 as serde::Deserialize>::deserialize(deserializer)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(serde::de::Error::custom(format!(
            "confidence {} is outside 0.0..=1.0",
            value
        )))
    }
}
