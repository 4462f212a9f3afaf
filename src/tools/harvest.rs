//! Search/harvest collaborator
//!
//! The core never performs web search itself. A [`Harvester`] turns one query
//! into an ordered list of sources; [`FileHarvester`] answers queries from a
//! local JSON source pack.

use crate::types::{AppError, Result, Source};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[async_trait]
pub trait Harvester: Send + Sync {
    /// Ordered sources for one query. An empty list is a valid answer.
    async fn harvest(&self, query: &str, constraints: &BTreeMap<String, String>) -> Result<Vec<Source>>;

    fn name(&self) -> &str;
}

/// One entry of a source pack file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
}

impl From<SourceRecord> for Source {
    fn from(record: SourceRecord) -> Self {
        let mut source = Source::new(record.url, record.title, record.text);
        source.author = record.author;
        source.published_date = record.published_date;
        source
    }
}

/// Harvester over a fixed pack of documents, matched by term overlap.
pub struct FileHarvester {
    sources: Vec<Source>,
    max_results: usize,
}

impl FileHarvester {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            max_results: 10,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Load a JSON array of `{url, title, text, author?, published_date?}`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Collaborator(format!("Failed to read source pack {}: {}", path.display(), e))
        })?;
        let records: Vec<SourceRecord> = serde_json::from_str(&content).map_err(|e| {
            AppError::Collaborator(format!("Invalid source pack {}: {}", path.display(), e))
        })?;
        let retrieved_at = Utc::now();
        let sources = records
            .into_iter()
            .map(|r| {
                let mut source = Source::from(r);
                source.retrieved_at = retrieved_at;
                source
            })
            .collect();
        Ok(Self::new(sources))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn terms(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(String::from)
            .collect()
    }
}

#[async_trait]
impl Harvester for FileHarvester {
    async fn harvest(&self, query: &str, constraints: &BTreeMap<String, String>) -> Result<Vec<Source>> {
        let query_terms = Self::terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let domain_filter = constraints.get("domain").map(|d| d.to_lowercase());

        let mut scored: Vec<(usize, &Source)> = self
            .sources
            .iter()
            .filter(|s| {
                domain_filter
                    .as_ref()
                    .is_none_or(|d| s.domain().ends_with(d.as_str()))
            })
            .map(|s| {
                let doc_terms = Self::terms(&format!("{} {}", s.title, s.text));
                (query_terms.intersection(&doc_terms).count(), s)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(self.max_results)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "file"
    }
}
