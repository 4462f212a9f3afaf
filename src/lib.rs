//! # Lekha - citation-gated research-to-article pipeline
//!
//! Lekha turns a research topic into a citation-backed article by running a
//! fixed sequence of stages against an OpenAI-compatible model service and
//! releasing the result only when it passes a deterministic citation quality
//! gate.
//!
//! ## Overview
//!
//! ```text
//! Planning -> Harvesting -> Indexing -> Summarizing -> FactChecking
//!          -> Writing -> Editing -> Optimizing -> Judging
//!                                                   |-- Pass   -> Succeeded
//!                                                   |-- Retry  -> Retrying -> (entry stage)
//!                                                   `-- Reject -> FailedQuality
//! ```
//!
//! Any fatal condition ends the run in FailedFatal with a reason code.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use lekha::llm::{OpenAIClient, RateGovernor};
//! use lekha::rag::Bm25Retriever;
//! use lekha::tools::FileHarvester;
//! use lekha::types::TopicSpec;
//! use lekha::utils::toml_config::LekhaConfig;
//! use lekha::workflows::RunManager;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = LekhaConfig::load("lekha.toml")?;
//! let client = OpenAIClient::new(config.api_key()?, config.llm.api_base.clone(), Duration::from_secs(60));
//! let manager = RunManager::new(
//!     Arc::new(client),
//!     Arc::new(RateGovernor::new(config.governor_config())),
//!     config.routing(),
//!     Arc::new(FileHarvester::load("sources.json")?),
//!     Arc::new(Bm25Retriever::default()),
//! )
//! .with_gateway_config(config.gateway_config())
//! .with_defaults(config.orchestrator_config());
//!
//! let run_id = manager.start_run(TopicSpec::new("Tides", "students"))?;
//! let finished = manager.wait(&run_id).await?;
//! ```
//!
//! ## Modules
//!
//! - [`types`] - shared data model and error handling
//! - [`llm`] - model client, rate governor and inference gateway
//! - [`quality`] - sentence parsing, readability and the citation evaluator
//! - [`stages`] - the pipeline stages
//! - [`workflows`] - run state, orchestrator and run manager
//! - [`tools`] - the harvest collaborator
//! - [`rag`] - the retrieval collaborator
//! - [`exporters`] - the export collaborator
//! - [`utils`] - TOML configuration
//! - [`cli`] - command-line definitions and output

#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line parsing and terminal output.
pub mod cli;
/// Export collaborators.
pub mod exporters;
/// LLM client, rate governor and inference gateway.
pub mod llm;
/// Draft quality scoring.
pub mod quality;
/// Chunking and BM25 retrieval.
pub mod rag;
/// Pipeline stages.
pub mod stages;
/// Harvest collaborators.
pub mod tools;
/// Core types and errors.
pub mod types;
/// Configuration utilities.
pub mod utils;
/// Run orchestration.
pub mod workflows;

pub use llm::{InferenceGateway, LLMClient, RateGovernor};
pub use quality::CitationEvaluator;
pub use types::{AppError, Result};
pub use utils::toml_config::LekhaConfig;
pub use workflows::{Orchestrator, RunManager, RunState};
