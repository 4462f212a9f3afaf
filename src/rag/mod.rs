//! Passage retrieval over harvested sources
//!
//! - [`chunker`] - sentence-aware overlapping chunks
//! - [`index`] - BM25 ranking
//! - [`retriever`] - the [`Retriever`] collaborator and its in-memory implementation

pub mod chunker;
pub mod index;
pub mod retriever;

pub use chunker::TextChunker;
pub use index::Bm25Index;
pub use retriever::{Bm25Retriever, IndexHandle, RetrievedPassage, Retriever};
