use crate::llm::{ModelClass, PromptSpec};
use crate::stages::{prompts, Stage, StageContext};
use crate::types::{AppError, Outline, Result};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;

/// Produces the article outline with the fast model.
pub struct PlanStage;

#[async_trait]
impl Stage for PlanStage {
    fn kind(&self) -> StageKind {
        StageKind::Plan
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let prompt = PromptSpec::new(
            "plan.outline",
            prompts::planner(),
            format!("{}\nCreate the outline.", prompts::format_topic(&state.topic)),
        )
        .with_max_tokens(1_500);

        let mut outline: Outline = ctx.gateway.complete_json(&prompt, ModelClass::Fast).await?;
        normalize_outline(&mut outline, state);

        if outline.sections.is_empty() {
            return Err(AppError::StructuredOutput {
                schema: prompt.label,
                attempts: 1,
                error: "outline has no sections".to_string(),
            });
        }

        let detail = format!("{} sections", outline.sections.len());
        Ok(StageDelta {
            outline: Some(outline),
            ..Default::default()
        }
        .with_detail(detail))
    }
}

fn normalize_outline(outline: &mut Outline, state: &RunState) {
    outline.title = outline.title.trim().to_string();
    if outline.title.is_empty() {
        outline.title = state.topic.topic.clone();
    }
    outline.sections.retain(|s| !s.title.trim().is_empty());
    if outline.target_keywords.is_empty() {
        outline.target_keywords = state.topic.keywords.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutlineSection, TopicSpec};

    #[test]
    fn test_normalize_fills_title_and_keywords() {
        let state = RunState::new(
            "run-1",
            TopicSpec::new("Solar power", "homeowners").with_keywords(vec!["solar".into()]),
        );
        let mut outline = Outline {
            title: "  ".to_string(),
            sections: vec![
                OutlineSection {
                    title: "Costs".to_string(),
                    ..Default::default()
                },
                OutlineSection::default(),
            ],
            target_keywords: Vec::new(),
        };
        normalize_outline(&mut outline, &state);
        assert_eq!(outline.title, "Solar power");
        assert_eq!(outline.sections.len(), 1);
        assert_eq!(outline.target_keywords, vec!["solar".to_string()]);
    }
}
