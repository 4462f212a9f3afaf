//! Sentence segmentation and citation marker detection
//!
//! Drafts are markdown. Headings and list items are their own units; consecutive
//! paragraph lines are joined and split on `.`, `!` and `?`. Citation markers
//! (`[1]`, `[1, 3]`, `[2][4]`) and the common-knowledge tag (`[COMMON]`) that
//! follow a terminator are pulled back onto the sentence they close.

use regex::Regex;
use std::sync::LazyLock;

/// Tag marking a sentence as common knowledge.
pub const COMMON_MARKER: &str = "[COMMON]";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(\d+(?:\s*,\s*\d+)*|common)\]").expect("citation marker pattern is valid")
});

static LEADING_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\[(?:\d+(?:\s*,\s*\d+)*|common)\]\s*)+[.!?]?")
        .expect("leading marker pattern is valid")
});

/// Markdown block a sentence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading,
    ListItem,
    Paragraph,
}

/// One sentence-level unit of a draft.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    /// Sentence as written, markers included
    pub text: String,
    /// Sentence with markers removed and whitespace collapsed
    pub clean: String,
    /// 1-based source indices cited, deduplicated and sorted; 0 marks an unparseable index
    pub markers: Vec<usize>,
    pub common: bool,
    pub block: BlockKind,
}

impl Sentence {
    fn new(text: &str, block: BlockKind) -> Self {
        let (markers, common) = extract_markers(text);
        Self {
            text: text.trim().to_string(),
            clean: strip_markers(text),
            markers,
            common,
            block,
        }
    }

    pub fn has_any_marker(&self) -> bool {
        self.common || !self.markers.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.clean.split_whitespace().count()
    }
}

/// Citation indices and common-knowledge flag found in `text`.
pub fn extract_markers(text: &str) -> (Vec<usize>, bool) {
    let mut indices = Vec::new();
    let mut common = false;
    for cap in MARKER_RE.captures_iter(text) {
        let body = &cap[1];
        if body.eq_ignore_ascii_case("common") {
            common = true;
            continue;
        }
        for part in body.split(',') {
            indices.push(part.trim().parse::<usize>().unwrap_or(0));
        }
    }
    indices.sort_unstable();
    indices.dedup();
    (indices, common)
}

/// Remove every marker and collapse whitespace.
pub fn strip_markers(text: &str) -> String {
    let without = MARKER_RE.replace_all(text, "");
    let collapsed = without.split_whitespace().collect::<Vec<_>>().join(" ");
    // "claim [1]." leaves "claim ." behind
    collapsed
        .replace(" .", ".")
        .replace(" ,", ",")
        .replace(" !", "!")
        .replace(" ?", "?")
}

/// Every distinct marker (numeric and common) appearing in a text, as written.
pub fn marker_set(text: &str) -> Vec<String> {
    let mut markers: Vec<String> = Vec::new();
    let (indices, common) = extract_markers(text);
    markers.extend(indices.iter().map(|i| format!("[{}]", i)));
    if common {
        markers.push(COMMON_MARKER.to_string());
    }
    markers
}

/// Split a markdown draft into sentence units.
pub fn parse_sentences(draft: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut paragraph = String::new();

    let flush = |paragraph: &mut String, sentences: &mut Vec<Sentence>| {
        if !paragraph.trim().is_empty() {
            for text in split_paragraph(paragraph) {
                sentences.push(Sentence::new(&text, BlockKind::Paragraph));
            }
        }
        paragraph.clear();
    };

    for line in draft.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_rule(trimmed) {
            flush(&mut paragraph, &mut sentences);
            continue;
        }
        if trimmed.starts_with('#') {
            flush(&mut paragraph, &mut sentences);
            let heading = trimmed.trim_start_matches('#').trim();
            if !heading.is_empty() {
                sentences.push(Sentence::new(heading, BlockKind::Heading));
            }
            continue;
        }
        if let Some(item) = list_item_body(trimmed) {
            flush(&mut paragraph, &mut sentences);
            for text in split_paragraph(item) {
                sentences.push(Sentence::new(&text, BlockKind::ListItem));
            }
            continue;
        }
        if !paragraph.is_empty() {
            paragraph.push(' ');
        }
        paragraph.push_str(trimmed);
    }
    flush(&mut paragraph, &mut sentences);

    sentences
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '-' || c == '*' || c == '_')
}

fn list_item_body(line: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

/// Split on terminators followed by whitespace, keeping decimals ("3.5") intact
/// and re-attaching markers that trail the terminator.
fn split_paragraph(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            // absorb runs like "?!" or "..."
            while i + 1 < chars.len() && matches!(chars[i + 1], '.' | '!' | '?') {
                i += 1;
                current.push(chars[i]);
            }
            let at_end = i + 1 >= chars.len();
            let followed_by_space = !at_end && chars[i + 1].is_whitespace();
            if at_end || followed_by_space {
                let rest: String = chars[i + 1..].iter().collect();
                let consumed = match LEADING_MARKER_RE.find(&rest) {
                    Some(m) => {
                        current.push(' ');
                        current.push_str(m.as_str().trim());
                        m.as_str().chars().count()
                    }
                    None => 0,
                };
                push_sentence(&mut sentences, &mut current);
                i += consumed;
            }
        }
        i += 1;
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        // A fragment of only markers belongs to the sentence before it
        if strip_markers(trimmed).trim_matches(['.', '!', '?']).trim().is_empty() {
            if let Some(last) = sentences.last_mut() {
                last.push(' ');
                last.push_str(trimmed);
                current.clear();
                return;
            }
        }
        sentences.push(trimmed.to_string());
    }
    current.clear();
}
