use crate::llm::{ModelClass, PromptSpec};
use crate::stages::{prompts, Stage, StageContext};
use crate::types::{AppError, Result, SeoMetadata};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;

const MAX_TITLE_CHARS: usize = 60;
const MAX_DESCRIPTION_CHARS: usize = 160;
const MAX_KEYWORDS: usize = 10;

/// Search metadata for the finished draft.
pub struct OptimizeStage;

#[async_trait]
impl Stage for OptimizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Optimize
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let draft = state
            .draft
            .as_ref()
            .ok_or_else(|| AppError::Internal("Optimize requires a draft".to_string()))?;
        let keywords = state
            .outline
            .as_ref()
            .map(|o| o.target_keywords.join(", "))
            .unwrap_or_default();

        let prompt = PromptSpec::new(
            "optimize.seo",
            prompts::seo(),
            format!("Target keywords: {}\n\nArticle:\n{}", keywords, draft),
        )
        .with_max_tokens(600);
        let seo: SeoMetadata = ctx.gateway.complete_json(&prompt, ModelClass::Fast).await?;
        let seo = normalize_seo(seo, state);

        let detail = format!("slug {}", seo.slug);
        Ok(StageDelta {
            seo: Some(seo),
            ..Default::default()
        }
        .with_detail(detail))
    }
}

fn normalize_seo(mut seo: SeoMetadata, state: &RunState) -> SeoMetadata {
    if seo.title.trim().is_empty() {
        seo.title = state
            .outline
            .as_ref()
            .map(|o| o.title.clone())
            .unwrap_or_else(|| state.topic.topic.clone());
    }
    seo.title = truncate_chars(seo.title.trim(), MAX_TITLE_CHARS);
    seo.meta_description = truncate_chars(seo.meta_description.trim(), MAX_DESCRIPTION_CHARS);

    let slug_source = if seo.slug.trim().is_empty() { &seo.title } else { &seo.slug };
    seo.slug = slugify(slug_source);

    let mut keywords: Vec<String> = Vec::new();
    for keyword in seo.keywords.iter().chain(state.topic.keywords.iter()) {
        let keyword = keyword.trim().to_lowercase();
        if !keyword.is_empty() && !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
    }
    keywords.truncate(MAX_KEYWORDS);
    seo.keywords = keywords;
    seo
}

/// Lowercase ASCII alphanumerics separated by single hyphens.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TopicSpec;
    use rstest::rstest;

    #[rstest]
    #[case("Hello, World!", "hello-world")]
    #[case("  Rust -- in 2026 ", "rust-in-2026")]
    #[case("already-a-slug", "already-a-slug")]
    #[case("Café au lait", "caf-au-lait")]
    fn test_slugify(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_normalize_seo_limits_lengths() {
        let state = RunState::new("run-1", TopicSpec::new("Topic", "all").with_keywords(vec!["Extra".into()]));
        let seo = SeoMetadata {
            title: "T".repeat(80),
            meta_description: "d".repeat(200),
            slug: String::new(),
            keywords: (0..12).map(|i| format!("k{}", i)).collect(),
        };
        let seo = normalize_seo(seo, &state);
        assert_eq!(seo.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(seo.meta_description.chars().count(), MAX_DESCRIPTION_CHARS);
        assert!(seo.slug.starts_with("ttt"));
        assert_eq!(seo.keywords.len(), MAX_KEYWORDS);
    }
}
