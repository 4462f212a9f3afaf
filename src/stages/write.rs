use crate::llm::{ModelClass, PromptSpec};
use crate::stages::{prompts, Stage, StageContext};
use crate::types::{AppError, Result};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;

/// Composes the full article from the section drafts and verified claims.
pub struct WriteStage;

#[async_trait]
impl Stage for WriteStage {
    fn kind(&self) -> StageKind {
        StageKind::Write
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let outline = state
            .outline
            .as_ref()
            .ok_or_else(|| AppError::Internal("Write requires an outline".to_string()))?;
        if state.sections.is_empty() {
            return Err(AppError::Internal("Write requires summarized sections".to_string()));
        }

        let mut user = format!(
            "{}\nArticle title: {}\n\nSources:\n{}\n\nSection drafts:\n{}\n\nVerified claims:\n{}\n",
            prompts::format_topic(&state.topic),
            outline.title,
            prompts::format_source_list(&state.sources),
            prompts::format_sections(&state.sections),
            prompts::format_claims(&state.claims, &state.sources),
        );
        if let Some(hint) = &state.retry_hint {
            user.push_str(&format!(
                "\nThe previous version failed review on attempt {}:\n",
                hint.attempt.saturating_sub(1)
            ));
            for reason in &hint.failure_reasons {
                user.push_str(&format!("- {}\n", reason));
            }
            for sentence in hint.uncited_sentences.iter().take(10) {
                user.push_str(&format!("Uncited: {}\n", sentence));
            }
        }

        let prompt = PromptSpec::new("write.article", prompts::writer(), user);
        let completion = ctx.gateway.complete(&prompt, ModelClass::Quality).await?;
        let draft = with_title(completion.content.trim(), &outline.title);

        let words = draft.split_whitespace().count();
        Ok(StageDelta {
            draft: Some(draft),
            ..Default::default()
        }
        .with_detail(format!("{} words", words)))
    }
}

/// Prepend `# title` unless the draft already opens with a top-level heading.
fn with_title(draft: &str, title: &str) -> String {
    if draft.starts_with("# ") {
        draft.to_string()
    } else {
        format!("# {}\n\n{}", title, draft)
    }
}
