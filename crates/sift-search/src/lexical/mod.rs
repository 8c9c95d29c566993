//! Lexical relevance over one request's candidate set.
//!
//! The vector index has no lexical counterpart, so lexical evidence is
//! computed on the fly: BM25 across the retrieved candidates only, then
//! normalized by the maximum so the strongest candidate scores 1.0.

mod bm25;
mod tokenize;

pub use bm25::{Bm25Scorer, normalize_by_max};
pub use tokenize::Tokenizer;

/// Tokenizer plus BM25 parameters for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LexicalScorer {
    tokenizer: Tokenizer,
    bm25: Bm25Scorer,
}

impl LexicalScorer {
    #[must_use]
    pub const fn new(tokenizer: Tokenizer, bm25: Bm25Scorer) -> Self {
        Self { tokenizer, bm25 }
    }

    /// Normalized score per document, in document order.
    ///
    /// Returns `None` when the query has no indexable tokens: there is no
    /// lexical evidence, which fusion treats as an unavailable lexical
    /// signal. An empty document set yields `Some(vec![])`.
    #[must_use]
    pub fn score(&self, query: &str, documents: &[&str]) -> Option<Vec<f64>> {
        if documents.is_empty() {
            return Some(Vec::new());
        }

        let query_terms = self.tokenizer.tokenize(query);
        if query_terms.is_empty() {
            tracing::debug!("query has no lexical tokens");
            return None;
        }

        let tokenized: Vec<Vec<String>> = documents
            .iter()
            .map(|doc| self.tokenizer.tokenize(doc))
            .collect();

        let mut scores = self.bm25.score(&query_terms, &tokenized);
        normalize_by_max(&mut scores);
        Some(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_match_normalizes_to_one() {
        let scorer = LexicalScorer::default();
        let scores = scorer
            .score(
                "remote work stipend",
                &[
                    "The remote work stipend is paid quarterly.",
                    "Office hours are nine to five.",
                    "Remote employees may expense a chair.",
                ],
            )
            .expect("query has tokens");

        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 1.0).abs() < 1e-12);
        assert!(scores[1].abs() < f64::EPSILON);
        assert!(scores[2] > 0.0 && scores[2] < 1.0);
    }

    #[test]
    fn stop_word_only_query_has_no_lexical_evidence() {
        let scorer = LexicalScorer::default();
        assert!(scorer.score("what is the", &["anything"]).is_none());
    }

    #[test]
    fn empty_documents_yield_empty_scores() {
        let scorer = LexicalScorer::default();
        assert_eq!(scorer.score("leave", &[]), Some(Vec::new()));
    }

    #[test]
    fn no_matches_stay_zero_after_normalization() {
        let scorer = LexicalScorer::default();
        let scores = scorer
            .score("payroll", &["holiday calendar", "badge access"])
            .expect("query has tokens");
        assert!(scores.iter().all(|s| s.abs() < f64::EPSILON));
    }
}
