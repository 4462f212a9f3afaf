use crate::exporters::Exporter;
use crate::types::{AppError, Result, RunStatus};
use crate::workflows::RunState;
use async_trait::async_trait;
use std::path::PathBuf;

/// Writes `<root>/<run_id>/run.json` and `<root>/<run_id>/article.md`.
pub struct FileExporter {
    root: PathBuf,
}

impl FileExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn export(&self, state: &RunState) -> Result<Vec<PathBuf>> {
        if state.status != RunStatus::Succeeded {
            return Err(AppError::InvalidInput(format!(
                "run '{}' is {:?}; only succeeded runs are exported",
                state.run_id, state.status
            )));
        }
        let article = state.article_markdown().ok_or_else(|| {
            AppError::Internal(format!("run '{}' succeeded without a draft", state.run_id))
        })?;
        let run_json = serde_json::to_string_pretty(state)
            .map_err(|e| AppError::Internal(format!("Failed to serialize run: {}", e)))?;

        let dir = self.run_dir(&state.run_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Collaborator(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let json_path = dir.join("run.json");
        let article_path = dir.join("article.md");
        tokio::fs::write(&json_path, run_json).await.map_err(|e| {
            AppError::Collaborator(format!("Failed to write {}: {}", json_path.display(), e))
        })?;
        tokio::fs::write(&article_path, with_front_matter(state, &article))
            .await
            .map_err(|e| {
                AppError::Collaborator(format!("Failed to write {}: {}", article_path.display(), e))
            })?;

        tracing::info!(run_id = %state.run_id, dir = %dir.display(), "Run exported");
        Ok(vec![json_path, article_path])
    }
}

/// YAML front matter from the SEO metadata, when there is any.
fn with_front_matter(state: &RunState, article: &str) -> String {
    let Some(seo) = &state.seo else {
        return article.to_string();
    };
    let keywords = seo.keywords.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ");
    format!(
        "---\ntitle: {}\ndescription: {}\nslug: {}\nkeywords: [{}]\n---\n\n{}",
        quote(&seo.title),
        quote(&seo.meta_description),
        seo.slug,
        keywords,
        article
    )
}

/// Double-quoted YAML scalar. JSON string escapes are valid YAML escapes.
fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.escape_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SeoMetadata, Source, TopicSpec};
    use crate::workflows::{Phase, Transition};

    fn succeeded_state() -> RunState {
        let mut state = RunState::new("run-abc", TopicSpec::new("Tides", "students"));
        state.merge_sources(vec![Source::new("https://noaa.gov/tides", "Tides", "The moon drives tides.")]);
        state.draft = Some("# Tides\n\nThe moon drives tides [1].".to_string());
        state.seo = Some(SeoMetadata {
            title: "Tides".to_string(),
            meta_description: "Why the \"moon\" matters".to_string(),
            slug: "tides".to_string(),
            keywords: vec!["tides".to_string()],
        });
        state.phase = Phase::Judging;
        state.transition(Transition::Passed).unwrap();
        state
    }

    #[tokio::test]
    async fn test_export_writes_run_and_article() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());

        let paths = exporter.export(&succeeded_state()).await.unwrap();
        assert_eq!(paths.len(), 2);

        let article = std::fs::read_to_string(&paths[1]).unwrap();
        assert!(article.starts_with("---\ntitle: \"Tides\""));
        assert!(article.contains("description: \"Why the \\\"moon\\\" matters\""));
        assert!(article.contains("## References"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(json["status"], "succeeded");
    }

    #[test]
    fn test_front_matter_escapes_backslashes_and_newlines() {
        let mut state = succeeded_state();
        if let Some(seo) = state.seo.as_mut() {
            seo.title = r"C:\tides\moon".to_string();
            seo.meta_description = "line one\nline two".to_string();
        }
        let front = with_front_matter(&state, "body");

        assert!(front.contains(r#"title: "C:\\tides\\moon""#));
        assert!(front.contains(r#"description: "line one\nline two""#));
        // four fields, no line broken by the escaped newline
        let block: Vec<&str> = front.split("---\n").nth(1).unwrap().lines().collect();
        assert_eq!(block.len(), 4);
    }

    #[tokio::test]
    async fn test_export_rejects_unfinished_runs() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());
        let state = RunState::new("run-x", TopicSpec::new("Tides", "students"));

        let err = exporter.export(&state).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(!exporter.run_dir("run-x").exists());
    }
}
