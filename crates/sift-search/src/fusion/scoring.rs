//! Weighted Reciprocal Rank Fusion (RRF) of semantic and lexical rankings.
//!
//! # Algorithm Overview
//!
//! Vector distance and BM25 scores live on unrelated scales, so they are
//! merged by *rank*, never by magnitude:
//!
//! ```text
//! rrf(rank)   = 1 / (K + rank)                 K = 60, rank is 0-based
//! fused_score = (1 - w) * rrf(semantic_rank) + w * rrf(lexical_rank)
//! ```
//!
//! - Semantic rank orders by ascending distance.
//! - Lexical rank orders by descending normalized BM25 score.
//! - Ties in either ranking, and in the fused score, keep retrieval order.
//!
//! Positive rescaling of either raw score vector leaves the fused order
//! unchanged.
//!
//! # Degradation
//!
//! Without lexical scores the stage passes the semantic ranking through
//! (`fused_score = rrf(semantic_rank)`) and reports
//! [`FusionOutcome::lexical_degraded`]. This is not an error.

use sift_core::model::Candidate;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

/// Reciprocal rank contribution of a 0-based `rank`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rrf(rank: usize) -> f64 {
    1.0 / (RRF_K + rank as f64)
}

/// 0-based rank of each element when ordered by `cmp`, ties by position.
///
/// `ranks[i]` is the rank of element `i`.
fn ranks_by<T>(values: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| cmp(&values[a], &values[b]));

    let mut ranks = vec![0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = rank;
    }
    ranks
}

/// Ranks by descending score; NaN sorts last.
#[must_use]
pub fn ranks_by_score_desc(scores: &[f64]) -> Vec<usize> {
    ranks_by(scores, |a, b| descending(*a, *b))
}

/// Ranks by ascending distance; NaN sorts last.
#[must_use]
pub fn ranks_by_distance_asc(distances: &[f64]) -> Vec<usize> {
    ranks_by(distances, |a, b| ascending(*a, *b))
}

fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

fn ascending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Result of the fusion stage.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    /// Candidates in fused order, truncated to the requested limit.
    pub candidates: Vec<Candidate>,
    /// Lexical evidence was missing and the semantic order passed through.
    pub lexical_degraded: bool,
}

/// Fuse semantic and lexical rankings and keep the best `limit` candidates.
///
/// `candidates` must be in retrieval order; `lexical_scores[i]`, when given,
/// belongs to `candidates[i]`. A length mismatch is treated as missing
/// lexical evidence. `lexical_weight` is clamped to `[0, 1]`.
#[must_use]
pub fn fuse(
    mut candidates: Vec<Candidate>,
    lexical_scores: Option<&[f64]>,
    lexical_weight: f64,
    limit: usize,
) -> FusionOutcome {
    let distances: Vec<f64> = candidates.iter().map(|c| c.semantic_distance).collect();
    for (cand, rank) in candidates
        .iter_mut()
        .zip(ranks_by_distance_asc(&distances))
    {
        cand.semantic_rank = rank;
    }

    let lexical = match lexical_scores {
        Some(scores) if scores.len() == candidates.len() => Some(scores),
        Some(scores) => {
            warn!(
                scores = scores.len(),
                candidates = candidates.len(),
                "lexical score count mismatch; passing semantic ranking through"
            );
            None
        }
        None => None,
    };

    let lexical_degraded = lexical.is_none();
    match lexical {
        Some(scores) => {
            let weight = lexical_weight.clamp(0.0, 1.0);
            let lexical_ranks = ranks_by_score_desc(scores);
            for ((cand, &score), rank) in candidates.iter_mut().zip(scores).zip(lexical_ranks) {
                cand.lexical_score = Some(score);
                cand.lexical_rank = Some(rank);
                cand.fused_score =
                    Some((1.0 - weight) * rrf(cand.semantic_rank) + weight * rrf(rank));
            }
        }
        None => {
            debug!("fusion degraded to semantic pass-through");
            for cand in &mut candidates {
                cand.fused_score = Some(rrf(cand.semantic_rank));
            }
        }
    }

    // Stable sort: equal fused scores keep retrieval order.
    candidates.sort_by(|a, b| {
        descending(
            a.fused_score.unwrap_or(f64::NAN),
            b.fused_score.unwrap_or(f64::NAN),
        )
    });
    candidates.truncate(limit);

    FusionOutcome {
        candidates,
        lexical_degraded,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
