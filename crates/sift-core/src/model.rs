//! Request-scoped data model for one answering run.
//!
//! Everything here is built fresh per request and dropped when the
//! [`PipelineResult`] is returned. Nothing is persisted.
//!
//! Stage annotations on [`Candidate`] are `Option`s so that "not yet
//! computed" is distinguishable from a computed zero: `fused_score` is only
//! set by fusion, `relevance_score` only by evaluation.

use crate::error::{FailureKind, QueryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Upper bound of the cross-encoder relevance scale.
pub const RELEVANCE_SCALE_MAX: f64 = 10.0;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One prior exchange in the conversation, oldest first in [`Query::history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Cross-encoder score thresholds on the 0–10 relevance scale.
///
/// The defaults are empirical tuning constants, not verified optima.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// `max_score >= accept` keeps every evaluated candidate (default 3.0).
    #[serde(default = "default_accept_threshold")]
    pub accept: f64,
    /// In the middle band, keep candidates scoring `>= filter` (default 2.0).
    #[serde(default = "default_filter_threshold")]
    pub filter: f64,
    /// `max_score < reject` rejects the whole set (default 1.0).
    #[serde(default = "default_reject_threshold")]
    pub reject: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            accept: default_accept_threshold(),
            filter: default_filter_threshold(),
            reject: default_reject_threshold(),
        }
    }
}

impl Thresholds {
    /// Check that thresholds lie on the relevance scale and are ordered
    /// `reject <= filter <= accept`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidThresholds`] describing the first violation.
    pub fn validate(&self) -> Result<(), QueryError> {
        for (name, value) in [
            ("accept", self.accept),
            ("filter", self.filter),
            ("reject", self.reject),
        ] {
            if !value.is_finite() || !(0.0..=RELEVANCE_SCALE_MAX).contains(&value) {
                return Err(QueryError::InvalidThresholds(format!(
                    "{name} threshold {value} is outside 0..={RELEVANCE_SCALE_MAX}"
                )));
            }
        }

        if self.reject > self.filter || self.filter > self.accept {
            return Err(QueryError::InvalidThresholds(format!(
                "expected reject <= filter <= accept, got {} / {} / {}",
                self.reject, self.filter, self.accept
            )));
        }

        Ok(())
    }
}

const fn default_accept_threshold() -> f64 {
    3.0
}

const fn default_filter_threshold() -> f64 {
    2.0
}

const fn default_reject_threshold() -> f64 {
    1.0
}

/// A user question plus the per-request knobs that shape ranking and filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Names the content collection to answer from.
    pub scope: String,
    /// Final number of sources passed to drafting.
    pub top_k: usize,
    /// Weight of the lexical signal in fusion, in `[0, 1]`.
    pub lexical_weight: f64,
    pub thresholds: Thresholds,
    /// Oldest turn first.
    pub history: Vec<ConversationTurn>,
}

impl Query {
    /// Default number of sources kept for drafting.
    pub const DEFAULT_TOP_K: usize = 5;
    /// Default lexical weight in fusion.
    pub const DEFAULT_LEXICAL_WEIGHT: f64 = 0.3;

    #[must_use]
    pub fn new(text: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            scope: scope.into(),
            top_k: Self::DEFAULT_TOP_K,
            lexical_weight: Self::DEFAULT_LEXICAL_WEIGHT,
            thresholds: Thresholds::default(),
            history: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub const fn with_lexical_weight(mut self, weight: f64) -> Self {
        self.lexical_weight = weight;
        self
    }

    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    /// Validate the query before any downstream call is made.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] for blank text or scope, a zero `top_k`, a
    /// lexical weight outside `[0, 1]`, or malformed thresholds.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.text.trim().is_empty() {
            return Err(QueryError::EmptyText);
        }
        if self.scope.trim().is_empty() {
            return Err(QueryError::EmptyScope);
        }
        if self.top_k == 0 {
            return Err(QueryError::ZeroTopK);
        }
        if !self.lexical_weight.is_finite() || !(0.0..=1.0).contains(&self.lexical_weight) {
            return Err(QueryError::InvalidLexicalWeight(self.lexical_weight));
        }
        self.thresholds.validate()
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One passage exactly as the vector index returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub distance: f64,
}

/// A retrieved passage under consideration as grounding evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub content: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub semantic_distance: f64,
    /// 0-based rank by similarity; ties keep retrieval order.
    pub semantic_rank: usize,
    pub lexical_score: Option<f64>,
    pub lexical_rank: Option<usize>,
    pub fused_score: Option<f64>,
    pub relevance_score: Option<f64>,
    pub is_retained: bool,
}

impl Candidate {
    /// Build an unannotated candidate; `semantic_rank` starts as the
    /// retrieval position and is recomputed by fusion.
    #[must_use]
    pub fn from_retrieved(passage: RetrievedPassage, position: usize) -> Self {
        Self {
            id: passage.id,
            content: passage.content,
            metadata: passage.metadata,
            semantic_distance: passage.distance,
            semantic_rank: position,
            lexical_score: None,
            lexical_rank: None,
            fused_score: None,
            relevance_score: None,
            is_retained: false,
        }
    }

    /// Similarity derived from the index distance: `max(0, 1 - distance)`.
    #[must_use]
    pub fn similarity(&self) -> f64 {
        (1.0 - self.semantic_distance).max(0.0)
    }

    /// Human-readable origin for citations: `source`, then `title`, then the id.
    #[must_use]
    pub fn source(&self) -> &str {
        ["source", "title"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(serde_json::Value::as_str))
            .unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// What the relevance evaluator decided to do with the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Keep every evaluated candidate.
    Accept,
    /// Keep only candidates above the filter threshold.
    Filter,
    /// Nothing is relevant enough; answer out-of-scope.
    Reject,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Filter => f.write_str("filter"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// The evaluator's decision, derived once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub action: Action,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Mean relevance over every evaluated candidate.
    pub average_score: f64,
    pub max_score: f64,
    pub thresholds_used: Thresholds,
    /// Set when the cross-encoder failed and a policy decision stood in for a
    /// scored one.
    pub error: Option<String>,
}

impl EvaluationVerdict {
    /// Whether this verdict came from the failure policy instead of scores.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Drafts and correction
// ---------------------------------------------------------------------------

/// A generated answer and, once audited, the verifier's findings on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    pub is_consistent: bool,
    pub issues: Vec<String>,
    pub corrected_text: Option<String>,
}

impl Draft {
    /// A fresh, unaudited draft.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_consistent: true,
            issues: Vec::new(),
            corrected_text: None,
        }
    }

    /// Record the verifier's findings on this draft.
    #[must_use]
    pub fn audited(
        mut self,
        is_consistent: bool,
        issues: Vec<String>,
        corrected_text: Option<String>,
    ) -> Self {
        self.is_consistent = is_consistent;
        self.issues = issues;
        self.corrected_text = corrected_text;
        self
    }
}

/// How the verification pass concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// The verifier found the draft consistent with context.
    Verified,
    /// The verifier supplied a correction that replaced the draft.
    Corrected,
    /// The verdict was unusable; the safe fallback message replaced the draft.
    Fallback,
    /// The applicability gate did not admit this draft.
    Skipped,
    /// The verification call failed; the draft is returned unaudited.
    Unverified,
}

/// Correction metadata attached to every result that produced a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionInfo {
    pub original_answer: String,
    pub issues: Vec<String>,
    pub was_corrected: bool,
    pub status: VerificationStatus,
}

// ---------------------------------------------------------------------------
// Pipeline result
// ---------------------------------------------------------------------------

/// States of one answering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieving,
    Fusing,
    Evaluating,
    Rejected,
    Drafting,
    Verifying,
    Done,
}

impl Stage {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Retrieving` and `Drafting` may jump straight to `Done` on a fatal
    /// failure or an empty retained set; `Retrieving` may reject an
    /// invalid query outright.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Retrieving, Self::Fusing | Self::Rejected | Self::Done)
                | (Self::Fusing, Self::Evaluating)
                | (Self::Evaluating, Self::Rejected | Self::Drafting)
                | (Self::Drafting, Self::Verifying | Self::Done)
                | (Self::Verifying, Self::Done)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Retrieving => "retrieving",
            Self::Fusing => "fusing",
            Self::Evaluating => "evaluating",
            Self::Rejected => "rejected",
            Self::Drafting => "drafting",
            Self::Verifying => "verifying",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Degradation and decision details carried on every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// `None` when the run ended before evaluation.
    pub action: Option<Action>,
    pub confidence: Option<f64>,
    /// The cross-encoder failed and the failure policy decided.
    pub evaluation_degraded: bool,
    /// Fusion passed the semantic ranking through unchanged.
    pub lexical_degraded: bool,
    /// The most significant failure hit during the run, recovered or not.
    pub failure: Option<FailureKind>,
    /// Every state visited, in order.
    pub stages: Vec<Stage>,
}

impl Diagnostics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            action: None,
            confidence: None,
            evaluation_degraded: false,
            lexical_degraded: false,
            failure: None,
            stages: Vec::new(),
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// The externally visible output of one answering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub answer: String,
    /// Retained candidates the answer was grounded on.
    pub sources: Vec<Candidate>,
    pub correction: Option<CorrectionInfo>,
    /// The initial draft and, when a correction replaced it, the corrected
    /// draft. Empty when no draft was generated.
    #[serde(default)]
    pub drafts: Vec<Draft>,
    pub diagnostics: Diagnostics,
}

impl PipelineResult {
    /// Whether the run ended in a user-visible failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.diagnostics.failure.is_some_and(FailureKind::is_fatal)
    }
}
