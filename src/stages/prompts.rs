//! Stage system prompts and prompt formatting helpers

use crate::rag::RetrievedPassage;
use crate::types::{Claim, ClaimTag, DraftSection, Outline, Source, TopicSpec};

const BASE_PROMPT: &str = "You are a research writing assistant producing well-cited articles.

Principles:
- Never invent facts or citations
- Every non-obvious claim must be supported by a numbered source
- Write for the stated audience";

/// Build a role prompt on top of the shared base.
fn role_prompt(role: &str, body: &str) -> String {
    format!("{}\n\nYour role: {}\n\n{}", BASE_PROMPT, role, body)
}

pub fn planner() -> String {
    role_prompt(
        "Topic Planner",
        "Create an outline for an article on the given topic.

Return JSON: {\"title\": string, \"sections\": [{\"title\": string, \"key_questions\": [string], \"estimated_words\": number}], \"target_keywords\": [string]}

Use between 3 and 7 sections sized for the audience.",
    )
}

pub fn summarizer() -> String {
    role_prompt(
        "Abstractive Summarizer",
        "Draft the content of one article section from the numbered sources provided.

Rules:
- Cite with bracket markers that use the source numbers given, e.g. [1] or [2, 3]
- Never use a number that is not in the source list
- Write plain Markdown paragraphs without a heading",
    )
}

pub fn claim_extractor() -> String {
    role_prompt(
        "Claim Extractor",
        "List the atomic factual claims made in the section text.

Return JSON: {\"claims\": [{\"text\": string, \"source_indices\": [number], \"confidence\": number}]}

source_indices are the bracket numbers the text cites for the claim. confidence is in [0, 1].",
    )
}

pub fn fact_checker() -> String {
    role_prompt(
        "Fact-Checker",
        "Judge one claim against the evidence passages.

Return JSON: {\"verdict\": \"supported\" | \"refuted\" | \"needs_more_evidence\" | \"common_knowledge\", \"confidence\": number}

Be conservative: when in doubt answer needs_more_evidence.",
    )
}

pub fn writer() -> String {
    role_prompt(
        "Narrative Writer",
        "Compose the complete article in Markdown from the section drafts and verified claims.

Every sentence must either carry a citation marker such as [1] or [1, 2], or end with [COMMON] if it is common knowledge. Use [COMMON] sparingly. Keep the existing source numbers; never invent new ones.",
    )
}

pub fn editor() -> String {
    role_prompt(
        "Style & QA Editor",
        "Refine the article for grammar, flow and readability for the audience.

Keep every citation marker exactly as written. Do not delete, merge or renumber markers. Return only the revised Markdown article.",
    )
}

pub fn seo() -> String {
    role_prompt(
        "SEO Specialist",
        "Produce search metadata for the article.

Return JSON: {\"title\": string (max 60 chars), \"meta_description\": string (max 160 chars), \"slug\": string, \"keywords\": [string] (5 to 10)}",
    )
}

// ============= Formatting Helpers =============

pub fn format_topic(topic: &TopicSpec) -> String {
    let mut out = format!("Topic: {}\nAudience: {}\n", topic.topic, topic.audience);
    if !topic.goals.is_empty() {
        out.push_str(&format!("Goals:\n{}\n", bullet_list(&topic.goals)));
    }
    if !topic.keywords.is_empty() {
        out.push_str(&format!("Keywords: {}\n", topic.keywords.join(", ")));
    }
    for (key, value) in &topic.constraints {
        out.push_str(&format!("Constraint {}: {}\n", key, value));
    }
    out
}

pub fn format_outline(outline: &Outline) -> String {
    let mut out = format!("Title: {}\n", outline.title);
    for (i, section) in outline.sections.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, section.title));
        for question in &section.key_questions {
            out.push_str(&format!("   - {}\n", question));
        }
    }
    out
}

/// Passages numbered by the citation index of their source in the run.
pub fn format_passages(passages: &[(usize, &RetrievedPassage)]) -> String {
    passages
        .iter()
        .map(|(n, p)| format!("[{}] {} ({})\n{}\n", n, p.source.title, p.source.url, p.passage.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_source_list(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{}] {}\n   URL: {}\n   Author: {}\n   Date: {}",
                i + 1,
                s.title,
                s.url,
                s.author.as_deref().unwrap_or("Unknown"),
                s.published_date.as_deref().unwrap_or("N/A"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_sections(sections: &[DraftSection]) -> String {
    sections
        .iter()
        .map(|s| format!("## {}\n\n{}", s.title, s.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Verified claims with their citation numbers.
pub fn format_claims(claims: &[Claim], sources: &[Source]) -> String {
    claims
        .iter()
        .filter(|c| c.tag != ClaimTag::Unsupported)
        .map(|c| {
            let markers: Vec<String> = c
                .source_ids
                .iter()
                .filter_map(|id| sources.iter().position(|s| &s.id == id))
                .map(|p| (p + 1).to_string())
                .collect();
            if c.tag == ClaimTag::Common {
                format!("- {} [COMMON]", c.text)
            } else {
                format!("- {} [{}]", c.text, markers.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
}
