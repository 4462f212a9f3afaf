//! Run orchestration
//!
//! - [`state`] - run state, phases and the transition table
//! - [`engine`] - the orchestrator that drives one run
//! - [`runs`] - the run manager front ends talk to
//!
//! # Usage
//!
//! ```ignore
//! let manager = RunManager::new(client, governor, routing, harvester, retriever)
//!     .with_defaults(config.orchestrator_config());
//! let run_id = manager.start_run(TopicSpec::new("Heat pumps", "homeowners"))?;
//! let finished = manager.wait(&run_id).await?;
//! println!("{:?}", finished.status);
//! ```

pub mod engine;
pub mod runs;
pub mod state;

pub use engine::{Orchestrator, OrchestratorConfig};
pub use runs::{RunManager, RunOptions};
pub use state::{
    next_phase, MergeSummary, Phase, RetryEntry, RetryHint, RunState, StageDelta, StageKind,
    StageOutcome, StageRecord, Transition,
};
