//! Draft quality scoring
//!
//! - [`citation`] - sentence segmentation and citation markers
//! - [`readability`] - Flesch reading ease
//! - [`evaluator`] - the quality gate producing [`crate::types::QualityReport`]

pub mod citation;
pub mod evaluator;
pub mod readability;

pub use citation::{parse_sentences, BlockKind, Sentence, COMMON_MARKER};
pub use evaluator::{
    decide_verdict, AttemptBudget, CitationEvaluator, QualityThresholds, SentenceClassifier,
    StructuralClassifier,
};
