use crate::llm::{ModelClass, PromptSpec};
use crate::quality::citation::{marker_set, parse_sentences};
use crate::stages::{prompts, Stage, StageContext};
use crate::types::{AppError, Result};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;

/// Style pass. Edits that lose citations are thrown away.
pub struct EditStage;

#[async_trait]
impl Stage for EditStage {
    fn kind(&self) -> StageKind {
        StageKind::Edit
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let draft = state
            .draft
            .as_ref()
            .ok_or_else(|| AppError::Internal("Edit requires a draft".to_string()))?;

        let prompt = PromptSpec::new(
            "edit.article",
            prompts::editor(),
            format!(
                "Audience: {}\nTarget Flesch reading ease: {:.0}\n\nArticle:\n{}",
                state.topic.audience,
                ctx.evaluator.thresholds().target_reading_level,
                draft
            ),
        );
        let completion = ctx.gateway.complete(&prompt, ModelClass::Quality).await?;
        let edited = completion.content.trim();

        if let Some(problem) = citation_loss(draft, edited) {
            tracing::warn!(run_id = %state.run_id, problem = %problem, "Discarding edit");
            return Ok(StageDelta::default().with_detail(format!("edit discarded: {}", problem)));
        }

        Ok(StageDelta {
            draft: Some(edited.to_string()),
            ..Default::default()
        }
        .with_detail("edit applied"))
    }
}

/// Why `edited` may not replace `original`, if it may not.
fn citation_loss(original: &str, edited: &str) -> Option<String> {
    if edited.is_empty() {
        return Some("empty response".to_string());
    }

    let kept = marker_set(edited);
    let missing: Vec<String> = marker_set(original)
        .into_iter()
        .filter(|m| !kept.contains(m))
        .collect();
    if !missing.is_empty() {
        return Some(format!("dropped markers {}", missing.join(" ")));
    }

    let marked = |text: &str| parse_sentences(text).iter().filter(|s| s.has_any_marker()).count();
    let (before, after) = (marked(original), marked(edited));
    if after < before {
        return Some(format!("cited sentences fell from {} to {}", before, after));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_keeping_markers_is_accepted() {
        let original = "Rust is fast [1]. It is safe [2].";
        let edited = "Rust runs fast [1]. It is memory safe [2].";
        assert_eq!(citation_loss(original, edited), None);
    }

    #[test]
    fn test_edit_dropping_marker_is_rejected() {
        let original = "Rust is fast [1]. It is safe [2].";
        let edited = "Rust is fast and safe [1].";
        let problem = citation_loss(original, edited).unwrap();
        assert!(problem.contains("[2]"));
    }

    #[test]
    fn test_edit_uncovering_sentences_is_rejected() {
        let original = "Rust is fast [1]. It is safe [1].";
        let edited = "Rust is fast [1]. It is safe.";
        assert!(citation_loss(original, edited).is_some());
    }
}
