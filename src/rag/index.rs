use std::collections::{HashMap, HashSet};

/// BM25 ranking over passages held in memory.
#[derive(Debug, Default, Clone)]
pub struct Bm25Index {
    /// Passage position -> term frequencies
    term_freqs: Vec<HashMap<String, usize>>,
    /// Passage position -> token count
    lengths: Vec<usize>,
    /// Term -> passages containing it
    postings: HashMap<String, HashSet<usize>>,
    avg_length: f32,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::with_params(1.2, 0.75)
    }

    pub fn with_params(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            ..Default::default()
        }
    }

    /// Lowercase alphanumeric terms longer than one character.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    /// Add a passage; returns its position.
    pub fn add(&mut self, text: &str) -> usize {
        let position = self.lengths.len();
        let tokens = Self::tokenize(text);

        let mut freqs: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for term in freqs.keys() {
            self.postings.entry(term.clone()).or_default().insert(position);
        }

        self.lengths.push(tokens.len());
        self.term_freqs.push(freqs);
        let total: usize = self.lengths.iter().sum();
        self.avg_length = total as f32 / self.lengths.len() as f32;
        position
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.postings.get(term).map(|p| p.len()).unwrap_or(0) as f32;
        let n = self.lengths.len() as f32;
        if df == 0.0 || n == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, position: usize, query_terms: &[String]) -> f32 {
        let freqs = &self.term_freqs[position];
        let length = self.lengths[position] as f32;
        let norm = if self.avg_length > 0.0 {
            1.0 - self.b + self.b * length / self.avg_length
        } else {
            1.0
        };

        query_terms
            .iter()
            .map(|term| {
                let tf = freqs.get(term).copied().unwrap_or(0) as f32;
                if tf == 0.0 {
                    return 0.0;
                }
                self.idf(term) * tf * (self.k1 + 1.0) / (tf + self.k1 * norm)
            })
            .sum()
    }

    /// Top `k` passage positions with positive score, best first.
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f32)> {
        let mut query_terms = Self::tokenize(query);
        query_terms.sort();
        query_terms.dedup();
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let candidates: HashSet<usize> = query_terms
            .iter()
            .filter_map(|t| self.postings.get(t))
            .flat_map(|p| p.iter().copied())
            .collect();

        let mut results: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|p| (p, self.score(p, &query_terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> Bm25Index {
        let mut index = Bm25Index::new();
        index.add("Rust ownership prevents data races at compile time.");
        index.add("Garbage collectors pause programs to reclaim memory.");
        index.add("The borrow checker enforces ownership and borrowing rules in Rust.");
        index
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(Bm25Index::tokenize("Hello, a World-42!"), vec!["hello", "world", "42"]);
    }

    #[test]
    fn test_search_ranks_relevant_first() {
        let results = index().search("rust ownership", 3);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(p, _)| *p == 0 || *p == 2));
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn test_search_respects_k() {
        assert_eq!(index().search("rust ownership", 1).len(), 1);
        assert!(index().search("rust", 0).is_empty());
    }

    #[test]
    fn test_search_unknown_terms() {
        assert!(index().search("quantum chromodynamics", 5).is_empty());
        assert!(Bm25Index::new().search("rust", 5).is_empty());
    }
}
