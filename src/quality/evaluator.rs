//! Citation evaluator: the quality gate
//!
//! Deterministic and side-effect free. The verdict is a function of the
//! report's own metrics, the configured thresholds and the attempt budget
//! recorded in the report.

use crate::quality::citation::{parse_sentences, BlockKind, Sentence};
use crate::quality::readability::{flesch_reading_ease, reading_level_recommendation};
use crate::types::{
    Claim, ClaimRuling, ClaimTag, GateCheck, QualityReport, Source, Verdict,
};
use std::collections::HashSet;

/// Gate thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct QualityThresholds {
    pub min_citation_coverage: f64,
    pub max_unsupported_ratio: f64,
    pub min_fact_confidence: f64,
    /// Advisory only; never affects the verdict
    pub target_reading_level: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_citation_coverage: 0.95,
            max_unsupported_ratio: 0.05,
            min_fact_confidence: 0.70,
            target_reading_level: 60.0,
        }
    }
}

/// Which attempt is being judged, out of how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
}

impl AttemptBudget {
    pub fn new(attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts,
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Decides which sentences are structural text excluded from the factual denominator.
pub trait SentenceClassifier: Send + Sync {
    fn is_structural(&self, sentence: &Sentence) -> bool;
}

/// Headings, list introductions ending in `:` and fragments shorter than
/// `min_words` are structural.
#[derive(Debug, Clone)]
pub struct StructuralClassifier {
    pub min_words: usize,
}

impl Default for StructuralClassifier {
    fn default() -> Self {
        Self { min_words: 2 }
    }
}

impl SentenceClassifier for StructuralClassifier {
    fn is_structural(&self, sentence: &Sentence) -> bool {
        if sentence.block == BlockKind::Heading {
            return true;
        }
        if sentence.has_any_marker() {
            return false;
        }
        let clean = sentence.clean.trim();
        clean.ends_with(':') || sentence.word_count() < self.min_words
    }
}

/// Per-sentence evaluation detail.
#[derive(Debug, Clone)]
struct ScoredSentence<'a> {
    sentence: &'a Sentence,
    covered: bool,
    unsupported: bool,
}

/// Scores drafts against their claims and sources.
pub struct CitationEvaluator {
    thresholds: QualityThresholds,
    classifier: Box<dyn SentenceClassifier>,
    /// Share of a claim's words that must appear in a sentence for the claim to map to it
    claim_match_threshold: f64,
}

impl Default for CitationEvaluator {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}

impl CitationEvaluator {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            classifier: Box::new(StructuralClassifier::default()),
            claim_match_threshold: 0.6,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SentenceClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_claim_match_threshold(mut self, threshold: f64) -> Self {
        self.claim_match_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Score `draft`. Citation markers are 1-based indices into `sources`.
    pub fn evaluate(
        &self,
        draft: &str,
        sources: &[Source],
        claims: &[Claim],
        budget: AttemptBudget,
    ) -> QualityReport {
        let sentences = parse_sentences(draft);
        let source_count = sources.len();

        let mut unknown_marker_count = 0;
        let mut scored = Vec::new();
        for sentence in &sentences {
            if self.classifier.is_structural(sentence) {
                continue;
            }
            let unknown = sentence
                .markers
                .iter()
                .filter(|&&m| m == 0 || m > source_count)
                .count();
            unknown_marker_count += unknown;
            let resolved = sentence.markers.len() - unknown;
            scored.push(ScoredSentence {
                sentence,
                covered: resolved > 0 || sentence.common,
                unsupported: !sentence.has_any_marker(),
            });
        }

        let factual_sentences = scored.len();
        let covered_sentences = scored.iter().filter(|s| s.covered).count();
        let unsupported_sentences = scored.iter().filter(|s| s.unsupported).count();

        let (citation_coverage, unsupported_ratio) = if factual_sentences == 0 {
            (0.0, 1.0)
        } else {
            (
                covered_sentences as f64 / factual_sentences as f64,
                unsupported_sentences as f64 / factual_sentences as f64,
            )
        };

        let covered_texts: Vec<&str> = scored
            .iter()
            .filter(|s| s.covered)
            .map(|s| s.sentence.clean.as_str())
            .collect();
        let mapped: Vec<f64> = claims
            .iter()
            .filter(|claim| {
                covered_texts
                    .iter()
                    .any(|text| claim_matches(&claim.text, text, self.claim_match_threshold))
            })
            .map(|claim| claim.confidence as f64)
            .collect();
        let mean_fact_confidence = if mapped.is_empty() {
            0.0
        } else {
            mapped.iter().sum::<f64>() / mapped.len() as f64
        };

        let prose: Vec<&str> = sentences
            .iter()
            .filter(|s| s.block != BlockKind::Heading)
            .map(|s| s.clean.as_str())
            .collect();
        let reading_level = flesch_reading_ease(&prose);
        let word_count = prose.iter().map(|s| s.split_whitespace().count()).sum();

        let uncited_sentences = scored
            .iter()
            .filter(|s| !s.covered)
            .map(|s| s.sentence.text.clone())
            .collect();

        let t = &self.thresholds;
        let checks = vec![
            GateCheck {
                name: "citation_coverage".to_string(),
                value: citation_coverage,
                threshold: t.min_citation_coverage,
                passed: factual_sentences > 0 && citation_coverage >= t.min_citation_coverage,
                advisory: false,
            },
            GateCheck {
                name: "unsupported_ratio".to_string(),
                value: unsupported_ratio,
                threshold: t.max_unsupported_ratio,
                passed: factual_sentences > 0 && unsupported_ratio <= t.max_unsupported_ratio,
                advisory: false,
            },
            GateCheck {
                name: "mean_fact_confidence".to_string(),
                value: mean_fact_confidence,
                threshold: t.min_fact_confidence,
                passed: mean_fact_confidence >= t.min_fact_confidence,
                advisory: false,
            },
            GateCheck {
                name: "reading_level".to_string(),
                value: reading_level,
                threshold: t.target_reading_level,
                passed: reading_level_recommendation(reading_level).is_none(),
                advisory: true,
            },
        ];

        let mut failure_reasons = Vec::new();
        let mut recommendations = Vec::new();
        if factual_sentences == 0 {
            failure_reasons.push("Draft contains no factual sentences".to_string());
        } else {
            if citation_coverage < t.min_citation_coverage {
                failure_reasons.push(format!(
                    "Citation coverage {:.1}% below threshold {:.1}%",
                    citation_coverage * 100.0,
                    t.min_citation_coverage * 100.0
                ));
                recommendations.push(
                    "Add citations to uncited sentences or mark them as common knowledge".to_string(),
                );
            }
            if unsupported_ratio > t.max_unsupported_ratio {
                failure_reasons.push(format!(
                    "Unsupported sentence ratio {:.1}% exceeds threshold {:.1}%",
                    unsupported_ratio * 100.0,
                    t.max_unsupported_ratio * 100.0
                ));
                recommendations.push(
                    "Find additional sources for unsupported claims or remove them".to_string(),
                );
            }
        }
        if mean_fact_confidence < t.min_fact_confidence {
            failure_reasons.push(format!(
                "Mean fact confidence {:.2} below threshold {:.2}",
                mean_fact_confidence, t.min_fact_confidence
            ));
            recommendations.push("Strengthen evidence for low-confidence claims".to_string());
        }
        if unknown_marker_count > 0 {
            recommendations.push(format!(
                "Remove or fix {} citation marker(s) that reference unknown sources",
                unknown_marker_count
            ));
        }
        if let Some(advice) = reading_level_recommendation(reading_level) {
            if factual_sentences > 0 {
                recommendations.push(advice.to_string());
            }
        }

        let all_passed = checks.iter().filter(|c| !c.advisory).all(|c| c.passed);
        let verdict = decide_verdict(factual_sentences, all_passed, budget);

        tracing::debug!(
            factual_sentences,
            covered_sentences,
            unknown_marker_count,
            citation_coverage,
            unsupported_ratio,
            mean_fact_confidence,
            reading_level,
            ?verdict,
            "Draft evaluated"
        );

        QualityReport {
            citation_coverage,
            unsupported_ratio,
            mean_fact_confidence,
            reading_level,
            total_sentences: sentences.len(),
            factual_sentences,
            covered_sentences,
            unknown_marker_count,
            word_count,
            source_count,
            checks,
            failure_reasons,
            recommendations,
            uncited_sentences,
            attempt: budget.attempt,
            max_attempts: budget.max_attempts,
            verdict,
        }
    }

    /// Rulings for claims the draft no longer supports: a claim that maps only
    /// to uncovered sentences becomes Unsupported.
    pub fn retag_claims(&self, draft: &str, sources: &[Source], claims: &[Claim]) -> Vec<ClaimRuling> {
        let sentences = parse_sentences(draft);
        let source_count = sources.len();
        let factual: Vec<&Sentence> = sentences
            .iter()
            .filter(|s| !self.classifier.is_structural(s))
            .collect();

        claims
            .iter()
            .filter(|claim| claim.tag != ClaimTag::Unsupported)
            .filter_map(|claim| {
                let matches: Vec<&&Sentence> = factual
                    .iter()
                    .filter(|s| claim_matches(&claim.text, &s.clean, self.claim_match_threshold))
                    .collect();
                if matches.is_empty() {
                    return None;
                }
                let any_covered = matches.iter().any(|s| {
                    s.common || s.markers.iter().any(|&m| m >= 1 && m <= source_count)
                });
                if any_covered {
                    None
                } else {
                    Some(ClaimRuling {
                        key: claim.key(),
                        tag: ClaimTag::Unsupported,
                        confidence: None,
                    })
                }
            })
            .collect()
    }
}

/// Pass only when every gate passes; otherwise Retry while budget remains, else Reject.
/// A draft without factual sentences is always rejected.
pub fn decide_verdict(factual_sentences: usize, all_passed: bool, budget: AttemptBudget) -> Verdict {
    if factual_sentences == 0 {
        Verdict::Reject
    } else if all_passed {
        Verdict::Pass
    } else if budget.has_remaining() {
        Verdict::Retry
    } else {
        Verdict::Reject
    }
}

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .collect()
}

/// True when at least `threshold` of the claim's words appear in the sentence.
fn claim_matches(claim: &str, sentence: &str, threshold: f64) -> bool {
    let claim_words = content_words(claim);
    if claim_words.is_empty() {
        return false;
    }
    let sentence_words = content_words(sentence);
    let shared = claim_words.intersection(&sentence_words).count();
    shared as f64 / claim_words.len() as f64 >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sources(n: usize) -> Vec<Source> {
        (0..n)
            .map(|i| Source::new(format!("https://example.com/{}", i), format!("S{}", i), format!("text {}", i)))
            .collect()
    }

    fn claim(text: &str, confidence: f32) -> Claim {
        Claim::new(text, BTreeSet::new(), confidence)
    }

    #[test]
    fn test_fully_cited_draft_passes() {
        let draft = "Rust has no garbage collector [1]. Ownership rules are checked at compile time [2].";
        let claims = vec![
            claim("Rust has no garbage collector", 0.9),
            claim("Ownership rules are checked at compile time", 0.8),
        ];
        let report = CitationEvaluator::default().evaluate(draft, &sources(2), &claims, AttemptBudget::new(1, 3));

        assert_eq!(report.citation_coverage, 1.0);
        assert_eq!(report.unsupported_ratio, 0.0);
        assert!((report.mean_fact_confidence - 0.85).abs() < 1e-6);
        assert_eq!(report.verdict, Verdict::Pass);
    }

    #[test]
    fn test_empty_draft_rejected() {
        let report = CitationEvaluator::default().evaluate("", &sources(2), &[], AttemptBudget::new(1, 3));
        assert_eq!(report.citation_coverage, 0.0);
        assert_eq!(report.verdict, Verdict::Reject);
    }

    #[test]
    fn test_headings_only_draft_rejected() {
        let draft = "# Title\n\n## Section\n\nKey points:";
        let report = CitationEvaluator::default().evaluate(draft, &sources(1), &[], AttemptBudget::new(1, 3));
        assert_eq!(report.factual_sentences, 0);
        assert_eq!(report.verdict, Verdict::Reject);
    }

    #[test]
    fn test_unknown_marker_is_uncovered_anomaly() {
        let draft = "Rust is fast [1]. Rust is loved [7].";
        let claims = vec![claim("Rust is fast", 0.9)];
        let report = CitationEvaluator::default().evaluate(draft, &sources(2), &claims, AttemptBudget::new(1, 3));
        assert_eq!(report.unknown_marker_count, 1);
        assert_eq!(report.covered_sentences, 1);
        assert_eq!(report.citation_coverage, 0.5);
        // carries a marker, so not counted as unsupported
        assert_eq!(report.unsupported_ratio, 0.0);
        assert_eq!(report.verdict, Verdict::Retry);
    }

    #[test]
    fn test_multiple_markers_count_once() {
        let draft = "Rust is fast [1][2] and safe [1, 2].";
        let claims = vec![claim("Rust is fast and safe", 0.9)];
        let report = CitationEvaluator::default().evaluate(draft, &sources(2), &claims, AttemptBudget::new(1, 3));
        assert_eq!(report.factual_sentences, 1);
        assert_eq!(report.covered_sentences, 1);
    }

    #[test]
    fn test_common_marker_covers() {
        let draft = "Water boils at 100 degrees at sea level [COMMON].";
        let claims = vec![claim("Water boils at 100 degrees at sea level", 0.95)];
        let report = CitationEvaluator::default().evaluate(draft, &sources(0), &claims, AttemptBudget::new(1, 3));
        assert_eq!(report.citation_coverage, 1.0);
        assert_eq!(report.verdict, Verdict::Pass);
    }

    #[test]
    fn test_retry_then_reject_when_budget_spent() {
        let draft = "Rust is fast [1]. Rust is popular.";
        let claims = vec![claim("Rust is fast", 0.9)];
        let evaluator = CitationEvaluator::default();

        let first = evaluator.evaluate(draft, &sources(1), &claims, AttemptBudget::new(1, 3));
        assert_eq!(first.verdict, Verdict::Retry);

        let last = evaluator.evaluate(draft, &sources(1), &claims, AttemptBudget::new(3, 3));
        assert_eq!(last.verdict, Verdict::Reject);
        assert_eq!(last.citation_coverage, first.citation_coverage);
    }

    #[test]
    fn test_low_confidence_fails_gate() {
        let draft = "Rust is fast [1].";
        let claims = vec![claim("Rust is fast", 0.4)];
        let report = CitationEvaluator::default().evaluate(draft, &sources(1), &claims, AttemptBudget::new(1, 3));
        assert_eq!(report.citation_coverage, 1.0);
        assert_eq!(report.verdict, Verdict::Retry);
        assert!(report.failure_reasons.iter().any(|r| r.contains("confidence")));
    }

    #[test]
    fn test_no_mapped_claims_gives_zero_confidence() {
        let draft = "Rust is fast [1].";
        let claims = vec![claim("Completely unrelated statement about oceans", 0.99)];
        let report = CitationEvaluator::default().evaluate(draft, &sources(1), &claims, AttemptBudget::new(1, 3));
        assert_eq!(report.mean_fact_confidence, 0.0);
    }

    #[test]
    fn test_reading_level_is_advisory() {
        let draft = "Institutional interoperability necessitates comprehensive organizational transformation [1].";
        let claims = vec![claim(
            "Institutional interoperability necessitates comprehensive organizational transformation",
            0.9,
        )];
        let report = CitationEvaluator::default().evaluate(draft, &sources(1), &claims, AttemptBudget::new(1, 3));
        assert!(report.reading_level < 50.0);
        assert_eq!(report.verdict, Verdict::Pass);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_retag_uncited_claims() {
        let draft = "Rust is fast [1]. Rust is popular with developers.";
        let mut popular = claim("Rust is popular with developers", 0.8);
        popular.tag = ClaimTag::Cited;
        let mut fast = claim("Rust is fast", 0.9);
        fast.tag = ClaimTag::Cited;

        let rulings = CitationEvaluator::default().retag_claims(draft, &sources(1), &[fast, popular.clone()]);
        assert_eq!(rulings.len(), 1);
        assert_eq!(rulings[0].key, popular.key());
        assert_eq!(rulings[0].tag, ClaimTag::Unsupported);
    }

    #[test]
    fn test_custom_classifier() {
        struct NothingStructural;
        impl SentenceClassifier for NothingStructural {
            fn is_structural(&self, _: &Sentence) -> bool {
                false
            }
        }

        let draft = "# Heading\n\nRust is fast [1].";
        let claims = vec![claim("Rust is fast", 0.9)];
        let report = CitationEvaluator::default()
            .with_classifier(Box::new(NothingStructural))
            .evaluate(draft, &sources(1), &claims, AttemptBudget::new(1, 3));
        assert_eq!(report.factual_sentences, 2);
        assert_eq!(report.citation_coverage, 0.5);
    }
}
