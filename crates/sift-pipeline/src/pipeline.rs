//! Answering orchestration: retrieval, fusion, evaluation, drafting, verification.
//!
//! The orchestrator degrades instead of failing wherever it can:
//! - lexical evidence is optional; fusion passes the semantic order through
//! - a failed cross-encoder call is resolved by the evaluation policy
//! - a failed verification call returns the unverified draft
//!
//! Only an invalid query, unavailable retrieval, or a failed draft call end
//! the run early, and even those produce a complete [`PipelineResult`].

use crate::drafter::{DraftOutcome, Drafter};
use crate::verifier::Verifier;
use sift_core::collection::collection_name;
use sift_core::config::SiftConfig;
use sift_core::error::{FailureKind, ServiceError, ServiceKind};
use sift_core::model::{Candidate, Diagnostics, PipelineResult, Query, RetrievedPassage, Stage};
use sift_core::service::{Embedder, Generator, Reranker, Retriever};
use sift_search::evaluator::{EvaluationPolicy, Evaluator};
use sift_search::fusion::fuse;
use sift_search::lexical::{Bm25Scorer, LexicalScorer, Tokenizer};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The external collaborators one pipeline talks to.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Arc<dyn Retriever>,
    pub reranker: Arc<dyn Reranker>,
    pub generator: Arc<dyn Generator>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Stateless per request; safe to share across threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: SiftConfig,
    services: Services,
    lexical: LexicalScorer,
    evaluator: Evaluator,
    drafter: Drafter,
    verifier: Verifier,
}

/// Visited stages of one run plus the diagnostics being assembled.
struct Run {
    diagnostics: Diagnostics,
}

impl Run {
    fn start() -> Self {
        let mut diagnostics = Diagnostics::new();
        diagnostics.stages.push(Stage::Retrieving);
        Self { diagnostics }
    }

    fn current(&self) -> Stage {
        self.diagnostics
            .stages
            .last()
            .copied()
            .unwrap_or(Stage::Retrieving)
    }

    fn advance(&mut self, next: Stage) {
        let from = self.current();
        if !from.can_advance_to(next) {
            warn!(%from, to = %next, "unexpected stage transition");
        }
        debug!(%from, to = %next, "stage transition");
        self.diagnostics.stages.push(next);
    }

    /// Fatal failures replace recovered ones; the first recovered one sticks.
    fn record_failure(&mut self, kind: FailureKind) {
        let replace = match self.diagnostics.failure {
            None => true,
            Some(existing) => kind.is_fatal() && !existing.is_fatal(),
        };
        if replace {
            self.diagnostics.failure = Some(kind);
        }
    }

    fn finish(
        mut self,
        terminal: Stage,
        answer: String,
        sources: Vec<Candidate>,
    ) -> PipelineResult {
        self.advance(terminal);
        PipelineResult {
            answer,
            sources,
            correction: None,
            drafts: Vec::new(),
            diagnostics: self.diagnostics,
        }
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(config: SiftConfig, services: Services) -> Self {
        let lexical = LexicalScorer::new(
            Tokenizer::new(config.language, config.fusion.stop_words),
            Bm25Scorer::default(),
        );
        let evaluator = Evaluator::new(EvaluationPolicy::from(&config.evaluation));
        let drafter = Drafter::new(&config);
        let verifier = Verifier::new(&config);
        Self {
            config,
            services,
            lexical,
            evaluator,
            drafter,
            verifier,
        }
    }

    /// Answer `query`. Never fails: every exit path yields a full result.
    #[instrument(skip(self, query), fields(scope = %query.scope, top_k = query.top_k))]
    pub fn answer_query(&self, query: &Query) -> PipelineResult {
        let mut run = Run::start();
        let messages = &self.config.messages;

        if let Err(err) = query.validate() {
            warn!(error = %err, "invalid query");
            run.record_failure(FailureKind::InvalidQuery);
            return run.finish(Stage::Rejected, messages.out_of_scope.clone(), Vec::new());
        }

        // Retrieving
        let pool_size = self.config.retrieval.pool_size(query.top_k);
        let passages = match self.retrieve(query, pool_size) {
            Ok(passages) => passages,
            Err(err) => {
                warn!(error = %err, "retrieval unavailable");
                run.record_failure(FailureKind::RetrievalUnavailable);
                return run.finish(
                    Stage::Done,
                    messages.retrieval_unavailable.clone(),
                    Vec::new(),
                );
            }
        };
        let candidates: Vec<Candidate> = passages
            .into_iter()
            .enumerate()
            .map(|(position, passage)| Candidate::from_retrieved(passage, position))
            .collect();
        info!(retrieved = candidates.len(), pool_size, "retrieval complete");

        // Fusing
        run.advance(Stage::Fusing);
        let lexical_scores = if self.config.fusion.lexical_enabled {
            let documents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
            self.lexical.score(&query.text, &documents)
        } else {
            None
        };
        let fusion = fuse(
            candidates,
            lexical_scores.as_deref(),
            query.lexical_weight,
            pool_size,
        );
        if fusion.lexical_degraded {
            warn!("lexical evidence unavailable; using semantic order");
        }
        run.diagnostics.lexical_degraded = fusion.lexical_degraded;

        // Evaluating
        run.advance(Stage::Evaluating);
        let evaluation = self.evaluator.evaluate(
            &query.text,
            fusion.candidates,
            &query.thresholds,
            self.services.reranker.as_ref(),
        );
        let verdict = &evaluation.verdict;
        run.diagnostics.action = Some(verdict.action);
        run.diagnostics.confidence = Some(verdict.confidence);
        run.diagnostics.evaluation_degraded = verdict.is_degraded();
        if verdict.is_degraded() {
            run.record_failure(FailureKind::EvaluationUnavailable);
        }

        if evaluation.retained_count() == 0 {
            info!(action = %verdict.action, "question rejected as out of scope");
            return run.finish(Stage::Rejected, messages.out_of_scope.clone(), Vec::new());
        }

        let mut retained = evaluation.into_retained();
        retained.truncate(query.top_k);

        // Drafting
        run.advance(Stage::Drafting);
        let generator = self.services.generator.as_ref();
        let (draft, context) = match self.drafter.draft(query, &retained, generator) {
            Ok(DraftOutcome::Drafted { draft, context }) => (draft, context),
            Ok(DraftOutcome::NoContext(message)) => {
                return run.finish(Stage::Done, message, retained);
            }
            Err(err) => {
                warn!(error = %err, "draft generation unavailable");
                run.record_failure(FailureKind::DraftGenerationUnavailable);
                return run.finish(
                    Stage::Done,
                    messages.generation_unavailable.clone(),
                    Vec::new(),
                );
            }
        };

        // Verifying
        run.advance(Stage::Verifying);
        let outcome = self
            .verifier
            .verify(&query.text, &context, &draft.text, generator);
        if let Some(kind) = outcome.failure {
            run.record_failure(kind);
        }
        let correction = outcome.correction_info(&draft.text);

        info!(
            status = ?outcome.status,
            sources = retained.len(),
            "answer complete"
        );

        let drafts = outcome.audit(draft);
        let mut result = run.finish(Stage::Done, outcome.answer, retained);
        result.correction = Some(correction);
        result.drafts = drafts;
        result
    }

    /// Embed the query and fetch `k` nearest passages from the scope's collection.
    fn retrieve(&self, query: &Query, k: usize) -> Result<Vec<RetrievedPassage>, ServiceError> {
        let collection = collection_name(&query.scope);
        debug!(%collection, k, "retrieving");

        let embedding = self
            .services
            .embedder
            .embed(&[query.text.as_str()], &self.config.services.embedding_model)?
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or(ServiceError::EmptyResponse {
                service: ServiceKind::Embedding,
            })?;

        self.services.retriever.retrieve(&collection, &embedding, k)
    }
}
