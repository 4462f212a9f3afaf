//! Indexing and retrieval collaborator

use crate::rag::chunker::TextChunker;
use crate::rag::index::Bm25Index;
use crate::types::{AppError, Result, Source};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque handle to an index built by a [`Retriever`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexHandle(pub Uuid);

impl IndexHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A passage returned by retrieval, with the source it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub source: Source,
    pub passage: String,
    pub score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Build a retrieval index over `sources`.
    async fn index(&self, sources: &[Source]) -> Result<IndexHandle>;

    /// Best `k` passages for `query`, best first.
    async fn retrieve(&self, handle: &IndexHandle, query: &str, k: usize) -> Result<Vec<RetrievedPassage>>;

    /// Drop an index that is no longer needed.
    async fn release(&self, _handle: &IndexHandle) {}
}

struct PassageIndex {
    bm25: Bm25Index,
    /// Position -> (source position, passage text)
    passages: Vec<(usize, String)>,
    sources: Vec<Source>,
}

/// In-memory chunk + BM25 retriever.
pub struct Bm25Retriever {
    chunker: TextChunker,
    indexes: RwLock<HashMap<IndexHandle, Arc<PassageIndex>>>,
}

impl Default for Bm25Retriever {
    fn default() -> Self {
        Self::new(TextChunker::default())
    }
}

impl Bm25Retriever {
    pub fn new(chunker: TextChunker) -> Self {
        Self {
            chunker,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn index_count(&self) -> usize {
        self.indexes.read().len()
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    async fn index(&self, sources: &[Source]) -> Result<IndexHandle> {
        let mut bm25 = Bm25Index::new();
        let mut passages = Vec::new();
        for (source_pos, source) in sources.iter().enumerate() {
            // title helps short sources match their topic
            let text = format!("{}\n{}", source.title, source.text);
            for chunk in self.chunker.chunk(&text) {
                bm25.add(&chunk);
                passages.push((source_pos, chunk));
            }
        }

        let handle = IndexHandle::new();
        tracing::debug!(
            handle = %handle.0,
            sources = sources.len(),
            passages = passages.len(),
            "Built retrieval index"
        );
        self.indexes.write().insert(
            handle,
            Arc::new(PassageIndex {
                bm25,
                passages,
                sources: sources.to_vec(),
            }),
        );
        Ok(handle)
    }

    async fn retrieve(&self, handle: &IndexHandle, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        let index = self
            .indexes
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Retrieval index {}", handle.0)))?;

        Ok(index
            .bm25
            .search(query, k)
            .into_iter()
            .map(|(position, score)| {
                let (source_pos, passage) = &index.passages[position];
                RetrievedPassage {
                    source: index.sources[*source_pos].clone(),
                    passage: passage.clone(),
                    score,
                }
            })
            .collect())
    }

    async fn release(&self, handle: &IndexHandle) {
        self.indexes.write().remove(handle);
    }
}
