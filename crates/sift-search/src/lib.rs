#![forbid(unsafe_code)]
//! sift-search library.
//!
//! Candidate ranking for the answering pipeline: per-request BM25
//! ([`lexical`]), weighted reciprocal rank fusion ([`fusion`]), and the
//! cross-encoder relevance gate ([`evaluator`]).
//!
//! # Conventions
//!
//! - **Errors**: Stages here never fail. Missing evidence degrades the
//!   stage and is reported in its outcome.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod evaluator;
pub mod fusion;
pub mod lexical;

pub use evaluator::{Evaluation, EvaluationPolicy, Evaluator};
pub use fusion::{FusionOutcome, fuse};
pub use lexical::LexicalScorer;
