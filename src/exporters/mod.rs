//! Export collaborators
//!
//! An [`Exporter`] receives a finished, successful run and persists it.

pub mod file;

use crate::types::Result;
use crate::workflows::RunState;
use async_trait::async_trait;
use std::path::PathBuf;

pub use file::FileExporter;

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Persist a Succeeded run. Returns the paths written.
    async fn export(&self, state: &RunState) -> Result<Vec<PathBuf>>;
}
