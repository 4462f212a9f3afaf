use crate::llm::{ModelClass, PromptSpec};
use crate::rag::IndexHandle;
use crate::stages::{fan_out, prompts, unit_interval, Stage, StageContext};
use crate::types::{AppError, Claim, DraftSection, OutlineSection, Result, Source};
use crate::workflows::{RetryHint, RunState, StageDelta, StageKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ClaimsPayload {
    #[serde(default)]
    claims: Vec<ClaimPayload>,
}

#[derive(Debug, Deserialize)]
struct ClaimPayload {
    text: String,
    #[serde(default)]
    source_indices: Vec<usize>,
    #[serde(default = "default_confidence", deserialize_with = "unit_interval")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

/// Drafts every outline section from retrieved passages and extracts its claims.
pub struct SummarizeStage;

#[async_trait]
impl Stage for SummarizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Summarize
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let outline = state
            .outline
            .as_ref()
            .ok_or_else(|| AppError::Internal("Summarize requires an outline".to_string()))?;
        let handle = state
            .index_handle
            .ok_or_else(|| AppError::Internal("Summarize requires a retrieval index".to_string()))?;

        let shared = Arc::new(SectionInputs {
            topic: prompts::format_topic(&state.topic),
            sources: state.sources.clone(),
            hint: state.retry_hint.clone(),
            handle,
        });

        let worker_ctx = ctx.clone();
        let results = fan_out(
            outline.sections.clone(),
            ctx.config.stage_concurrency,
            move |section| summarize_section(worker_ctx.clone(), shared.clone(), section),
        )
        .await?;

        let mut sections = Vec::with_capacity(results.len());
        let mut claims = Vec::new();
        for (section, section_claims) in results {
            sections.push(section);
            claims.extend(section_claims);
        }

        tracing::info!(
            run_id = %state.run_id,
            attempt = state.attempt,
            sections = sections.len(),
            claims = claims.len(),
            "Sections summarized"
        );

        let detail = format!("{} sections, {} claims", sections.len(), claims.len());
        Ok(StageDelta {
            sections: Some(sections),
            claims,
            ..Default::default()
        }
        .with_detail(detail))
    }
}

struct SectionInputs {
    topic: String,
    sources: Vec<Source>,
    hint: Option<RetryHint>,
    handle: IndexHandle,
}

impl SectionInputs {
    fn citation_index(&self, source_id: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.id == source_id).map(|p| p + 1)
    }
}

async fn summarize_section(
    ctx: StageContext,
    inputs: Arc<SectionInputs>,
    section: OutlineSection,
) -> Result<(DraftSection, Vec<Claim>)> {
    let query = std::iter::once(section.title.as_str())
        .chain(section.key_questions.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let passages = ctx
        .retriever
        .retrieve(&inputs.handle, &query, ctx.config.retrieval_k)
        .await?;
    let numbered: Vec<(usize, _)> = passages
        .iter()
        .filter_map(|p| inputs.citation_index(&p.source.id).map(|n| (n, p)))
        .collect();

    let mut user = format!(
        "{}\nSection: {}\n",
        inputs.topic, section.title
    );
    if !section.key_questions.is_empty() {
        user.push_str("Answer these questions:\n");
        for question in &section.key_questions {
            user.push_str(&format!("- {}\n", question));
        }
    }
    if let Some(words) = section.estimated_words {
        user.push_str(&format!("Target length: about {} words\n", words));
    }
    user.push_str(&format!("\nSources:\n{}\n", prompts::format_passages(&numbered)));
    if let Some(hint) = &inputs.hint {
        user.push_str(&retry_guidance(hint));
    }

    let prompt = PromptSpec::new("summarize.section", prompts::summarizer(), user);
    let draft = ctx.gateway.complete(&prompt, ModelClass::Quality).await?;
    let content = draft.content.trim().to_string();

    let extract = PromptSpec::new(
        "summarize.claims",
        prompts::claim_extractor(),
        format!("Section text:\n{}", content),
    )
    .with_max_tokens(2_000);
    let payload: ClaimsPayload = ctx.gateway.complete_json(&extract, ModelClass::Fast).await?;

    let claims = payload
        .claims
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .filter_map(|c| {
            let source_ids: BTreeSet<String> = c
                .source_indices
                .iter()
                .filter_map(|&i| i.checked_sub(1).and_then(|i| inputs.sources.get(i)))
                .map(|s| s.id.clone())
                .collect();
            if !c.source_indices.is_empty() && source_ids.is_empty() {
                return None;
            }
            Some(Claim::new(c.text.trim(), source_ids, c.confidence))
        })
        .collect();

    Ok((DraftSection::new(section.title, content), claims))
}

fn retry_guidance(hint: &RetryHint) -> String {
    let mut out = format!(
        "\nThis is attempt {}. The previous draft failed review:\n",
        hint.attempt
    );
    for reason in &hint.failure_reasons {
        out.push_str(&format!("- {}\n", reason));
    }
    if !hint.uncited_sentences.is_empty() {
        out.push_str("Cite or remove these sentences:\n");
        for sentence in hint.uncited_sentences.iter().take(10) {
            out.push_str(&format!("- {}\n", sentence));
        }
    }
    if hint.unknown_marker_count > 0 {
        out.push_str("Only use the source numbers listed above.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_guidance_lists_uncited_sentences() {
        let hint = RetryHint {
            attempt: 2,
            failure_reasons: vec!["Citation coverage 80.0% below 95.0%".to_string()],
            uncited_sentences: vec!["An uncited sentence.".to_string()],
            unknown_marker_count: 1,
            ..Default::default()
        };
        let text = retry_guidance(&hint);
        assert!(text.contains("attempt 2"));
        assert!(text.contains("- An uncited sentence."));
        assert!(text.contains("Only use the source numbers"));
    }

    #[test]
    fn test_claims_payload_defaults() {
        let payload: ClaimsPayload =
            serde_json::from_str(r#"{"claims": [{"text": "x"}]}"#).unwrap();
        assert_eq!(payload.claims[0].confidence, 0.5);
        assert!(payload.claims[0].source_indices.is_empty());
    }

    #[test]
    fn test_claim_confidence_out_of_range_is_rejected() {
        let result = serde_json::from_str::<ClaimsPayload>(r#"{"claims": [{"text": "x", "confidence": 7}]}"#);
        assert!(result.is_err());
    }
}
