//! Okapi BM25 over a per-session corpus of memory-atom summaries.
//!
//! The corpus is append-only; statistics are rebuilt incrementally on
//! each added document. Queries score every document, which is fine at
//! the scale of one session's atoms.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

#[derive(Default)]
pub struct Bm25Index {
    documents: Vec<String>,
    doc_tokens: Vec<Vec<String>>,
    doc_frequencies: HashMap<String, usize>,
    total_token_count: usize,
}

/// One scored document: `(index into the corpus, score)`.
pub type Bm25Hit = (usize, f64);

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document(&self, index: usize) -> Option<&str> {
        self.documents.get(index).map(String::as_str)
    }

    pub fn add_document(&mut self, text: &str) {
        let tokens = tokenize(text);
        let mut seen = std::collections::HashSet::new();
        for token in &tokens {
            if seen.insert(token.clone()) {
                *self.doc_frequencies.entry(token.clone()).or_insert(0) += 1;
            }
        }
        self.total_token_count += tokens.len();
        self.documents.push(text.to_string());
        self.doc_tokens.push(tokens);
    }

    fn avgdl(&self) -> f64 {
        if self.documents.is_empty() {
            0.0
        } else {
            self.total_token_count as f64 / self.documents.len() as f64
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.documents.len() as f64;
        let df = *self.doc_frequencies.get(term).unwrap_or(&0) as f64;
        // Okapi IDF with the +1 inside the log to keep it non-negative.
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document against the query, returning the top `k`
    /// positive-scoring hits in descending score order.
    pub fn search(&self, query: &str, k: usize) -> Vec<Bm25Hit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }
        let avgdl = self.avgdl();

        let mut scored: Vec<Bm25Hit> = self
            .doc_tokens
            .iter()
            .enumerate()
            .map(|(idx, tokens)| {
                let dl = tokens.len() as f64;
                let mut term_counts: HashMap<&str, usize> = HashMap::new();
                for t in tokens {
                    *term_counts.entry(t.as_str()).or_insert(0) += 1;
                }

                let score: f64 = query_tokens
                    .iter()
                    .map(|q| {
                        let tf = *term_counts.get(q.as_str()).unwrap_or(&0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let norm = K1 * (1.0 - B + B * dl / avgdl);
                        self.idf(q) * (tf * (K1 + 1.0)) / (tf + norm)
                    })
                    .sum();
                (idx, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(docs: &[&str]) -> Bm25Index {
        let mut idx = Bm25Index::new();
        for d in docs {
            idx.add_document(d);
        }
        idx
    }

    #[test]
    fn empty_index_returns_nothing() {
        let idx = Bm25Index::new();
        assert!(idx.search("anything", 5).is_empty());
    }

    #[test]
    fn exact_term_match_ranks_first() {
        let idx = index(&[
            "the user installed numpy and pandas",
            "discussion about weather patterns",
            "numpy arrays are fast",
        ]);
        let hits = idx.search("numpy", 3);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(i, _)| *i == 0 || *i == 2));
    }

    #[test]
    fn rarer_terms_weigh_more() {
        let idx = index(&[
            "common common common rareword",
            "common common common",
            "common common common",
        ]);
        let hits = idx.search("rareword common", 3);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn zero_scoring_documents_filtered() {
        let idx = index(&["alpha beta", "gamma delta"]);
        let hits = idx.search("epsilon", 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn tokenization_lowercases_and_strips_punctuation() {
        let idx = index(&["The User's REPORT, final."]);
        let hits = idx.search("report", 5);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn document_accessor_roundtrips() {
        let idx = index(&["first doc", "second doc"]);
        assert_eq!(idx.document(1), Some("second doc"));
        assert_eq!(idx.len(), 2);
    }
}
