use std::collections::{BTreeMap, BTreeSet};

/// Okapi BM25 over a fixed document set.
///
/// Document frequencies and average length are computed from the documents
/// passed to [`Bm25Scorer::score`], not from a corpus-wide index: the scorer
/// only ever sees one request's candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Scorer {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization strength.
    pub b: f64,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Scorer {
    /// Raw BM25 score of each document (same order as `documents`).
    ///
    /// Duplicate query terms count once. Terms are summed in sorted order so
    /// documents with equal term statistics score bit-identically. Returns an
    /// empty vector for an empty document set.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, query_terms: &[String], documents: &[Vec<String>]) -> Vec<f64> {
        if documents.is_empty() {
            return Vec::new();
        }

        let n_docs = documents.len() as f64;
        let total_len: usize = documents.iter().map(Vec::len).sum();
        let avg_len = (total_len as f64 / n_docs).max(1.0);

        let terms: BTreeSet<&str> = query_terms.iter().map(String::as_str).collect();

        let term_freqs: Vec<BTreeMap<&str, usize>> = documents
            .iter()
            .map(|doc| {
                let mut tf: BTreeMap<&str, usize> = BTreeMap::new();
                for token in doc {
                    if terms.contains(token.as_str()) {
                        *tf.entry(token.as_str()).or_insert(0) += 1;
                    }
                }
                tf
            })
            .collect();

        let idf: BTreeMap<&str, f64> = terms
            .iter()
            .map(|term| {
                let df = term_freqs.iter().filter(|tf| tf.contains_key(term)).count() as f64;
                (*term, (1.0 + (n_docs - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        documents
            .iter()
            .zip(&term_freqs)
            .map(|(doc, tf)| {
                let len_norm = 1.0 - self.b + self.b * (doc.len() as f64 / avg_len);
                tf.iter()
                    .map(|(term, &count)| {
                        let f = count as f64;
                        idf[term] * (f * (self.k1 + 1.0)) / (self.k1.mul_add(len_norm, f))
                    })
                    .sum::<f64>()
            })
            .collect()
    }
}

/// Divide every score by the maximum; a zero (or negative) maximum divides by 1.0.
pub fn normalize_by_max(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(0.0_f64, f64::max);
    let divisor = if max > 0.0 { max } else { 1.0 };
    for score in scores.iter_mut() {
        *score /= divisor;
    }
}
