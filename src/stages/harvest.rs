use crate::stages::{fan_out, Stage, StageContext};
use crate::types::{AppError, Outline, Result, Source};
use crate::workflows::{RunState, StageDelta, StageKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

const HIGH_AUTHORITY: &[&str] = &[".edu", ".gov", ".ac.", "nature.com", "science.org", "ieee.org"];
const MEDIUM_AUTHORITY: &[&str] = &[".org", "medium.com", "wikipedia.org"];

/// Queries the harvest collaborator and selects the best new sources.
pub struct HarvestStage;

#[async_trait]
impl Stage for HarvestStage {
    fn kind(&self) -> StageKind {
        StageKind::Harvest
    }

    async fn run(&self, state: &RunState, ctx: &StageContext) -> Result<StageDelta> {
        let outline = state
            .outline
            .as_ref()
            .ok_or_else(|| AppError::Internal("Harvest requires an outline".to_string()))?;

        let queries = build_queries(state, outline);
        let known: HashSet<&str> = state.sources.iter().map(|s| s.id.as_str()).collect();
        let cap = ctx.config.max_sources
            + ctx.config.retry_extra_sources * state.attempt.saturating_sub(1) as usize;
        let rounds = ctx.config.harvest_attempts.max(1);

        let mut candidates: Vec<Source> = Vec::new();
        for round in 1..=rounds {
            let harvester = ctx.harvester.clone();
            let constraints = Arc::new(state.topic.constraints.clone());
            let run_id = state.run_id.clone();

            let batches = fan_out(queries.clone(), ctx.config.stage_concurrency, move |query| {
                let harvester = harvester.clone();
                let constraints = constraints.clone();
                let run_id = run_id.clone();
                async move {
                    match harvester.harvest(&query, &constraints).await {
                        Ok(sources) => Ok(sources),
                        Err(e) => {
                            tracing::warn!(run_id = %run_id, query = %query, error = %e, "Harvest query failed");
                            Ok(Vec::new())
                        }
                    }
                }
            })
            .await?;

            let mut seen: HashSet<String> = HashSet::new();
            candidates = batches
                .into_iter()
                .flatten()
                .filter(|s| !known.contains(s.id.as_str()))
                .filter(|s| seen.insert(s.id.clone()))
                .collect();

            if !candidates.is_empty() || !state.sources.is_empty() {
                break;
            }
            tracing::warn!(
                run_id = %state.run_id,
                round,
                rounds,
                "Harvest returned no sources"
            );
        }

        if candidates.is_empty() && state.sources.is_empty() {
            return Err(AppError::ZeroSources { attempts: rounds });
        }

        let ranked = rank_sources(candidates, outline);
        let room = cap.saturating_sub(state.sources.len());
        let selected: Vec<Source> = ranked.into_iter().take(room).collect();

        tracing::info!(
            run_id = %state.run_id,
            queries = queries.len(),
            selected = selected.len(),
            existing = state.sources.len(),
            cap,
            "Harvest complete"
        );

        let detail = format!("{} new sources from {} queries", selected.len(), queries.len());
        Ok(StageDelta {
            sources: selected,
            ..Default::default()
        }
        .with_detail(detail))
    }
}

/// Outline title, section titles, up to three keywords and, on retry, the
/// sentences that still lack citations.
fn build_queries(state: &RunState, outline: &Outline) -> Vec<String> {
    let keywords = if outline.target_keywords.is_empty() {
        &state.topic.keywords
    } else {
        &outline.target_keywords
    };

    let mut queries = vec![outline.title.clone()];
    queries.extend(outline.sections.iter().map(|s| s.title.clone()));
    queries.extend(keywords.iter().take(3).cloned());
    if let Some(hint) = &state.retry_hint {
        queries.extend(hint.uncited_sentences.iter().take(3).cloned());
    }

    let mut seen = HashSet::new();
    queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .collect()
}

pub fn authority_score(domain: &str) -> f32 {
    let domain = domain.to_lowercase();
    if HIGH_AUTHORITY.iter().any(|d| domain.contains(d)) {
        1.0
    } else if MEDIUM_AUTHORITY.iter().any(|d| domain.contains(d)) {
        0.7
    } else {
        0.5
    }
}

/// Share of outline keywords and section titles mentioned by the source.
pub fn relevance_score(source: &Source, outline: &Outline) -> f32 {
    let mut keywords: HashSet<String> = outline.target_keywords.iter().map(|k| k.to_lowercase()).collect();
    keywords.extend(outline.sections.iter().map(|s| s.title.to_lowercase()));
    keywords.retain(|k| !k.trim().is_empty());
    if keywords.is_empty() {
        return 0.5;
    }

    let text = source.text.to_lowercase();
    let title = source.title.to_lowercase();
    let matches = keywords
        .iter()
        .filter(|k| text.contains(k.as_str()) || title.contains(k.as_str()))
        .count();
    (matches as f32 / keywords.len() as f32).min(1.0)
}

/// Sort by `0.6 * relevance + 0.4 * authority`, best first. Fills in missing authority.
fn rank_sources(sources: Vec<Source>, outline: &Outline) -> Vec<Source> {
    let mut scored: Vec<(f32, Source)> = sources
        .into_iter()
        .map(|mut s| {
            let authority = match s.authority {
                Some(authority) => authority,
                None => {
                    let authority = authority_score(&s.domain());
                    s.authority = Some(authority);
                    authority
                }
            };
            let score = 0.6 * relevance_score(&s, outline) + 0.4 * authority;
            (score, s)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, s)| s).collect()
}
