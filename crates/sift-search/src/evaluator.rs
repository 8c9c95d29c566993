//! Corrective relevance filtering (CRAG) over the fused candidate pool.
//!
//! One cross-encoder call scores every candidate on a 0–10 scale. The
//! decision rule is deliberately asymmetric, because a false reject costs
//! less than a confident wrong answer:
//!
//! | Condition                       | Action                              |
//! |---------------------------------|-------------------------------------|
//! | `max >= accept` (3.0)           | Accept: keep everything             |
//! | `max <  reject` (1.0)           | Reject: keep nothing                |
//! | otherwise                       | Filter: keep `score >= filter` (2.0)|
//!
//! An empty filter result is demoted to Reject.
//!
//! # Failure policy
//!
//! When the cross-encoder call fails the evaluator cannot score anything.
//! With `fail_open` (the default) it accepts the unfiltered pool at a fixed
//! moderate confidence and flags the verdict; with `fail_open = false` it
//! rejects. Either way the verdict carries the error string.

use sift_core::config::EvaluationConfig;
use sift_core::model::{Action, Candidate, EvaluationVerdict, RELEVANCE_SCALE_MAX, Thresholds};
use sift_core::service::{RerankScore, Reranker};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// What to do when relevance scores cannot be obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationPolicy {
    pub fail_open: bool,
    pub fail_open_confidence: f64,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self::from(&EvaluationConfig::default())
    }
}

impl From<&EvaluationConfig> for EvaluationPolicy {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            fail_open: config.fail_open,
            fail_open_confidence: config.fail_open_confidence.clamp(0.0, 1.0),
        }
    }
}

/// Verdict plus every evaluated candidate in post-evaluation order.
///
/// Retained candidates have `is_retained = true` and always come first.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: EvaluationVerdict,
    pub evaluated: Vec<Candidate>,
}

impl Evaluation {
    pub fn retained(&self) -> impl Iterator<Item = &Candidate> {
        self.evaluated.iter().filter(|c| c.is_retained)
    }

    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained().count()
    }

    /// Consume the evaluation, keeping only retained candidates.
    #[must_use]
    pub fn into_retained(self) -> Vec<Candidate> {
        self.evaluated.into_iter().filter(|c| c.is_retained).collect()
    }
}

/// Scores candidates with a cross-encoder and decides accept/filter/reject.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluator {
    policy: EvaluationPolicy,
}

impl Evaluator {
    #[must_use]
    pub const fn new(policy: EvaluationPolicy) -> Self {
        Self { policy }
    }

    /// Evaluate `candidates` (in fused order) against `query`.
    ///
    /// Makes exactly one rerank call, or none for an empty pool. Never fails:
    /// a rerank error is resolved by the failure policy.
    pub fn evaluate(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        thresholds: &Thresholds,
        reranker: &dyn Reranker,
    ) -> Evaluation {
        if candidates.is_empty() {
            debug!("empty candidate pool; rejecting without rerank");
            return Evaluation {
                verdict: EvaluationVerdict {
                    action: Action::Reject,
                    confidence: 1.0,
                    average_score: 0.0,
                    max_score: 0.0,
                    thresholds_used: *thresholds,
                    error: None,
                },
                evaluated: candidates,
            };
        }

        let documents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let scores = match reranker.rerank(query, &documents) {
            Ok(scores) => scores,
            Err(err) => return self.on_failure(candidates, thresholds, &err.to_string()),
        };

        apply_scores(&mut candidates, &scores);
        let sorted: Vec<f64> = candidates
            .iter()
            .map(|c| c.relevance_score.unwrap_or(0.0))
            .collect();
        let (verdict, keep) = judge(&sorted, thresholds);

        for (idx, cand) in candidates.iter_mut().enumerate() {
            cand.is_retained = idx < keep;
        }

        info!(
            action = %verdict.action,
            confidence = verdict.confidence,
            max_score = verdict.max_score,
            retained = keep,
            evaluated = candidates.len(),
            "relevance evaluation complete"
        );

        Evaluation {
            verdict,
            evaluated: candidates,
        }
    }

    fn on_failure(
        &self,
        mut candidates: Vec<Candidate>,
        thresholds: &Thresholds,
        error: &str,
    ) -> Evaluation {
        let (action, confidence) = if self.policy.fail_open {
            warn!(error, "cross-encoder unavailable; failing open over unfiltered pool");
            (Action::Accept, self.policy.fail_open_confidence)
        } else {
            warn!(error, "cross-encoder unavailable; failing closed");
            (Action::Reject, self.policy.fail_open_confidence)
        };

        for cand in &mut candidates {
            cand.is_retained = action == Action::Accept;
        }

        Evaluation {
            verdict: EvaluationVerdict {
                action,
                confidence,
                average_score: 0.0,
                max_score: 0.0,
                thresholds_used: *thresholds,
                error: Some(error.to_string()),
            },
            evaluated: candidates,
        }
    }
}

/// Attach relevance scores and re-sort descending by them.
///
/// Out-of-range indices are ignored, the first score for an index wins,
/// non-finite scores count as 0, and everything is clamped to the 0–10
/// scale. Candidates without a score get 0. Ties keep fused order.
pub fn apply_scores(candidates: &mut [Candidate], scores: &[RerankScore]) {
    for score in scores {
        let Some(cand) = candidates.get_mut(score.index) else {
            debug!(index = score.index, "ignoring out-of-range rerank index");
            continue;
        };
        if cand.relevance_score.is_none() {
            cand.relevance_score = Some(clamp_relevance(score.relevance_score));
        }
    }

    for cand in candidates.iter_mut() {
        cand.relevance_score.get_or_insert(0.0);
    }

    candidates.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
}

fn clamp_relevance(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, RELEVANCE_SCALE_MAX)
    } else {
        0.0
    }
}

/// Apply the decision rule to scores sorted descending.
///
/// Returns the verdict and how many leading candidates are retained.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn judge(sorted_scores: &[f64], thresholds: &Thresholds) -> (EvaluationVerdict, usize) {
    let max_score = sorted_scores.first().copied().unwrap_or(0.0);
    let average_score = if sorted_scores.is_empty() {
        0.0
    } else {
        sorted_scores.iter().sum::<f64>() / sorted_scores.len() as f64
    };

    let (action, keep) = if sorted_scores.is_empty() || max_score < thresholds.reject {
        (Action::Reject, 0)
    } else if max_score >= thresholds.accept {
        (Action::Accept, sorted_scores.len())
    } else {
        let keep = sorted_scores
            .iter()
            .take_while(|&&s| s >= thresholds.filter)
            .count();
        if keep == 0 {
            (Action::Reject, 0)
        } else {
            (Action::Filter, keep)
        }
    };

    let confidence = match action {
        Action::Accept => max_score / RELEVANCE_SCALE_MAX,
        Action::Reject => 1.0 - max_score / RELEVANCE_SCALE_MAX,
        Action::Filter => {
            let kept = &sorted_scores[..keep];
            kept.iter().sum::<f64>() / kept.len() as f64 / RELEVANCE_SCALE_MAX
        }
    }
    .clamp(0.0, 1.0);

    (
        EvaluationVerdict {
            action,
            confidence,
            average_score,
            max_score,
            thresholds_used: *thresholds,
            error: None,
        },
        keep,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::error::{ServiceError, ServiceKind};
    use sift_core::model::RetrievedPassage;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FixedReranker {
        scores: Vec<f64>,
        calls: Mutex<usize>,
    }

    impl FixedReranker {
        fn new(scores: &[f64]) -> Self {
            Self {
                scores: scores.to_vec(),
                calls: Mutex::new(0),
            }
        }
    }

    impl Reranker for FixedReranker {
        fn rerank(
            &self,
            _query: &str,
            documents: &[&str],
        ) -> Result<Vec<RerankScore>, ServiceError> {
            *self.calls.lock().expect("lock") += 1;
            Ok(self
                .scores
                .iter()
                .take(documents.len())
                .enumerate()
                .map(|(index, &relevance_score)| RerankScore {
                    index,
                    relevance_score,
                })
                .collect())
        }
    }

    struct DownReranker;

    impl Reranker for DownReranker {
        fn rerank(
            &self,
            _query: &str,
            _documents: &[&str],
        ) -> Result<Vec<RerankScore>, ServiceError> {
            Err(ServiceError::Transport {
                service: ServiceKind::Rerank,
                message: "connection refused".into(),
            })
        }
    }

    fn pool(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                Candidate::from_retrieved(
                    RetrievedPassage {
                        id: format!("c{i}"),
                        content: format!("passage {i}"),
                        metadata: BTreeMap::new(),
                        distance: 0.1,
                    },
                    i,
                )
            })
            .collect()
    }

    fn evaluate(scores: &[f64]) -> Evaluation {
        Evaluator::default().evaluate(
            "q",
            pool(scores.len()),
            &Thresholds::default(),
            &FixedReranker::new(scores),
        )
    }

    #[test]
    fn high_max_accepts_everything() {
        let eval = evaluate(&[0.5, 5.0, 1.2]);
        assert_eq!(eval.verdict.action, Action::Accept);
        assert_eq!(eval.retained_count(), 3);
        assert_eq!(eval.evaluated[0].id, "c1");
        assert!((eval.verdict.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn low_max_rejects_everything() {
        let eval = evaluate(&[0.2, 0.9, 0.4]);
        assert_eq!(eval.verdict.action, Action::Reject);
        assert_eq!(eval.retained_count(), 0);
        assert!(eval.into_retained().is_empty());
    }

    #[test]
    fn middle_band_filters() {
        let eval = evaluate(&[2.5, 1.1, 2.0, 1.9]);
        assert_eq!(eval.verdict.action, Action::Filter);
        let kept: Vec<_> = eval.retained().map(|c| c.id.as_str()).collect();
        assert_eq!(kept, vec!["c0", "c2"]);
    }

    #[test]
    fn empty_filter_is_demoted_to_reject() {
        // max is in [reject, accept) but below the filter threshold.
        let eval = evaluate(&[1.5, 1.2]);
        assert_eq!(eval.verdict.action, Action::Reject);
        assert_eq!(eval.retained_count(), 0);
    }

    #[test]
    fn boundaries_are_inclusive_where_specified() {
        assert_eq!(evaluate(&[3.0]).verdict.action, Action::Accept);
        assert_eq!(evaluate(&[2.0]).verdict.action, Action::Filter);
        assert_eq!(evaluate(&[1.0]).verdict.action, Action::Reject);
        assert_eq!(evaluate(&[0.999]).verdict.action, Action::Reject);
    }

    #[test]
    fn empty_pool_rejects_without_calling_reranker() {
        let reranker = FixedReranker::new(&[]);
        let eval =
            Evaluator::default().evaluate("q", Vec::new(), &Thresholds::default(), &reranker);
        assert_eq!(eval.verdict.action, Action::Reject);
        assert_eq!(*reranker.calls.lock().expect("lock"), 0);
    }

    #[test]
    fn reranker_called_once() {
        let reranker = FixedReranker::new(&[4.0, 3.0]);
        let _ = Evaluator::default().evaluate("q", pool(2), &Thresholds::default(), &reranker);
        assert_eq!(*reranker.calls.lock().expect("lock"), 1);
    }

    #[test]
    fn failure_fails_open_by_default() {
        let eval =
            Evaluator::default().evaluate("q", pool(3), &Thresholds::default(), &DownReranker);
        assert_eq!(eval.verdict.action, Action::Accept);
        assert!(eval.verdict.is_degraded());
        assert!((eval.verdict.confidence - 0.5).abs() < 1e-12);
        assert_eq!(eval.retained_count(), 3);
        assert!(eval.evaluated.iter().all(|c| c.relevance_score.is_none()));
        let ids: Vec<_> = eval.evaluated.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
    }

    #[test]
    fn failure_can_fail_closed() {
        let evaluator = Evaluator::new(EvaluationPolicy {
            fail_open: false,
            fail_open_confidence: 0.5,
        });
        let eval = evaluator.evaluate("q", pool(3), &Thresholds::default(), &DownReranker);
        assert_eq!(eval.verdict.action, Action::Reject);
        assert!(eval.verdict.error.is_some());
        assert_eq!(eval.retained_count(), 0);
    }

    #[test]
    fn scores_are_clamped_and_missing_default_to_zero() {
        let mut cands = pool(3);
        apply_scores(
            &mut cands,
            &[
                RerankScore {
                    index: 0,
                    relevance_score: 42.0,
                },
                RerankScore {
                    index: 7,
                    relevance_score: 9.0,
                },
                RerankScore {
                    index: 2,
                    relevance_score: f64::NAN,
                },
            ],
        );
        assert_eq!(cands[0].relevance_score, Some(10.0));
        assert_eq!(cands[1].relevance_score, Some(0.0));
        assert_eq!(cands[2].relevance_score, Some(0.0));
        assert_eq!(cands[1].id, "c1");
    }

    #[test]
    fn custom_thresholds_are_recorded() {
        let thresholds = Thresholds {
            accept: 6.0,
            filter: 4.0,
            reject: 2.0,
        };
        let eval = Evaluator::default().evaluate(
            "q",
            pool(2),
            &thresholds,
            &FixedReranker::new(&[5.0, 3.0]),
        );
        assert_eq!(eval.verdict.action, Action::Filter);
        assert_eq!(eval.verdict.thresholds_used, thresholds);
        assert_eq!(eval.retained_count(), 1);
    }
}
