//! External collaborators the pipeline consumes
//!
//! - [`harvest`](crate::tools::harvest) - turns search queries into sources

pub mod harvest;

pub use harvest::{FileHarvester, Harvester, SourceRecord};
