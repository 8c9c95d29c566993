//! Fusion of semantic and lexical relevance into one candidate ordering.
//!
//! This module merges the vector index's similarity ranking with the
//! per-request BM25 ranking using weighted Reciprocal Rank Fusion (RRF), then
//! truncates to the pool the relevance evaluator will score.

pub mod scoring;

pub use scoring::{FusionOutcome, RRF_K, fuse, ranks_by_distance_asc, ranks_by_score_desc, rrf};
