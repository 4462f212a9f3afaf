//! Run manager: the interface front ends use
//!
//! `start_run` validates the request, registers the run and executes it on a
//! background task; `get_status` returns the latest snapshot. Runs share the
//! LLM client and the rate governor, but each gets its own gateway (for usage
//! accounting) and its own state. Terminal runs stay queryable.

use crate::exporters::Exporter;
use crate::llm::{AdmissionControl, GatewayConfig, InferenceGateway, LLMClient, ModelRouting};
use crate::quality::{CitationEvaluator, StructuralClassifier};
use crate::rag::Retriever;
use crate::stages::{StageContext, StageRegistry};
use crate::tools::Harvester;
use crate::types::{AppError, FatalReason, Result, RunFailure, RunStatus, TopicSpec};
use crate::workflows::engine::{Orchestrator, OrchestratorConfig};
use crate::workflows::state::RunState;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Optional knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Makes the run id reproducible
    pub seed: Option<String>,
    /// Overrides the manager's defaults
    pub config: Option<OrchestratorConfig>,
}

impl RunOptions {
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }
}

struct RunEntry {
    status: watch::Receiver<RunState>,
    /// Flips to true once the run is terminal and exported
    done: watch::Receiver<bool>,
    cancel: Arc<AtomicBool>,
}

/// Owns every run in the process.
pub struct RunManager {
    client: Arc<dyn LLMClient>,
    governor: Arc<dyn AdmissionControl>,
    routing: ModelRouting,
    gateway_config: GatewayConfig,
    harvester: Arc<dyn Harvester>,
    retriever: Arc<dyn Retriever>,
    exporter: Option<Arc<dyn Exporter>>,
    registry: StageRegistry,
    defaults: OrchestratorConfig,
    runs: RwLock<HashMap<String, RunEntry>>,
}

impl RunManager {
    pub fn new(
        client: Arc<dyn LLMClient>,
        governor: Arc<dyn AdmissionControl>,
        routing: ModelRouting,
        harvester: Arc<dyn Harvester>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            client,
            governor,
            routing,
            gateway_config: GatewayConfig::default(),
            harvester,
            retriever,
            exporter: None,
            registry: StageRegistry::standard(),
            defaults: OrchestratorConfig::default(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_gateway_config(mut self, config: GatewayConfig) -> Self {
        self.gateway_config = config;
        self
    }

    pub fn with_defaults(mut self, config: OrchestratorConfig) -> Self {
        self.defaults = config;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Replace stage implementations.
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn defaults(&self) -> &OrchestratorConfig {
        &self.defaults
    }

    /// Accept a run and start it in the background. Returns its id immediately.
    pub fn start_run(&self, topic: TopicSpec) -> Result<String> {
        self.start_run_with(topic, RunOptions::default())
    }

    pub fn start_run_with(&self, topic: TopicSpec, options: RunOptions) -> Result<String> {
        if topic.topic.trim().is_empty() {
            return Err(AppError::InvalidInput("topic must not be empty".to_string()));
        }
        let config = options.config.unwrap_or_else(|| self.defaults.clone());
        validate_config(&config)?;

        let run_id = RunState::derive_run_id(&topic.topic, options.seed.as_deref(), Utc::now());
        let state = RunState::new(run_id.clone(), topic);
        let (tx, rx) = watch::channel(state.clone());
        let (done_tx, done_rx) = watch::channel(false);
        let cancel = Arc::new(AtomicBool::new(false));

        {
            let mut runs = self.runs.write();
            if runs.contains_key(&run_id) {
                return Err(AppError::InvalidInput(format!("run '{}' already exists", run_id)));
            }
            runs.insert(
                run_id.clone(),
                RunEntry {
                    status: rx,
                    done: done_rx,
                    cancel: cancel.clone(),
                },
            );
        }

        let orchestrator = Orchestrator::new(self.registry.clone(), self.stage_context(config));
        let exporter = self.exporter.clone();

        let tx = Arc::new(tx);
        let worker_tx = tx.clone();
        let worker = tokio::spawn(async move {
            let mut finished = orchestrator.run(state, cancel, Some(&*worker_tx)).await;

            if finished.status == RunStatus::Succeeded {
                if let Some(exporter) = exporter {
                    match exporter.export(&finished).await {
                        Ok(paths) => {
                            finished.artifacts = paths.iter().map(|p| p.display().to_string()).collect();
                        }
                        Err(e) => {
                            tracing::error!(run_id = %finished.run_id, error = %e, "Export failed");
                        }
                    }
                }
            }
            worker_tx.send_replace(finished);
        });

        // the supervisor publishes a terminal state even if the worker panics
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                let mut state = tx.borrow().clone();
                tracing::error!(run_id = %state.run_id, error = %e, "Run task aborted");
                state.fail(
                    RunFailure {
                        reason: FatalReason::Internal,
                        message: format!("run task aborted: {}", e),
                    },
                    false,
                );
                tx.send_replace(state);
            }
            done_tx.send_replace(true);
        });

        tracing::info!(run_id = %run_id, "Run accepted");
        Ok(run_id)
    }

    /// Latest snapshot of a run.
    pub fn get_status(&self, run_id: &str) -> Result<RunState> {
        self.runs
            .read()
            .get(run_id)
            .map(|entry| entry.status.borrow().clone())
            .ok_or_else(|| AppError::NotFound(format!("run '{}'", run_id)))
    }

    /// Ask a run to stop at its next stage boundary.
    pub fn cancel(&self, run_id: &str) -> Result<()> {
        let runs = self.runs.read();
        let entry = runs
            .get(run_id)
            .ok_or_else(|| AppError::NotFound(format!("run '{}'", run_id)))?;
        entry.cancel.store(true, Ordering::SeqCst);
        tracing::info!(run_id = %run_id, "Cancellation requested");
        Ok(())
    }

    /// Wait until a run reaches a terminal status (and, on success, is exported).
    pub async fn wait(&self, run_id: &str) -> Result<RunState> {
        let mut done = self
            .runs
            .read()
            .get(run_id)
            .map(|entry| entry.done.clone())
            .ok_or_else(|| AppError::NotFound(format!("run '{}'", run_id)))?;

        if done.wait_for(|finished| *finished).await.is_err() {
            return Err(AppError::Internal(format!("run '{}' lost its supervisor", run_id)));
        }
        self.get_status(run_id)
    }

    /// Snapshots of every known run, oldest first.
    pub fn list_runs(&self) -> Vec<RunState> {
        let mut runs: Vec<RunState> = self
            .runs
            .read()
            .values()
            .map(|entry| entry.status.borrow().clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    fn stage_context(&self, config: OrchestratorConfig) -> StageContext {
        let gateway = InferenceGateway::new(
            self.client.clone(),
            self.governor.clone(),
            self.routing.clone(),
            self.gateway_config.clone(),
        );
        let evaluator = CitationEvaluator::new(config.thresholds.clone()).with_classifier(Box::new(
            StructuralClassifier {
                min_words: config.min_words_per_sentence,
            },
        ));
        StageContext {
            gateway: Arc::new(gateway),
            harvester: self.harvester.clone(),
            retriever: self.retriever.clone(),
            evaluator: Arc::new(evaluator),
            config,
        }
    }
}

fn validate_config(config: &OrchestratorConfig) -> Result<()> {
    if config.max_sources == 0 {
        return Err(AppError::Configuration("max_sources must be greater than 0".to_string()));
    }
    if config.stage_concurrency == 0 {
        return Err(AppError::Configuration("stage_concurrency must be greater than 0".to_string()));
    }
    if config.max_run_duration.is_zero() {
        return Err(AppError::Configuration("max_run_duration must be greater than 0".to_string()));
    }
    if config.retrieval_k == 0 {
        return Err(AppError::Configuration("retrieval_k must be greater than 0".to_string()));
    }
    Ok(())
}
