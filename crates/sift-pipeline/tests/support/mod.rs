//! Scripted service doubles that record every call.

#![allow(dead_code)]

use sift_core::error::{ServiceError, ServiceKind};
use sift_core::model::RetrievedPassage;
use sift_core::service::{
    Embedder, GenerationRequest, Generator, RerankScore, Reranker, Retriever,
};
use sift_pipeline::Services;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

pub fn transport(service: ServiceKind) -> ServiceError {
    ServiceError::Transport {
        service,
        message: "connection refused".into(),
    }
}

pub fn passage(id: &str, content: &str, distance: f64) -> RetrievedPassage {
    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), serde_json::json!(format!("{id}.md")));
    RetrievedPassage {
        id: id.to_string(),
        content: content.to_string(),
        metadata,
        distance,
    }
}

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeEmbedder {
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl Embedder for FakeEmbedder {
    fn embed(&self, texts: &[&str], _model: &str) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls
            .lock()
            .expect("lock")
            .extend(texts.iter().map(ToString::to_string));
        if self.fail {
            return Err(transport(ServiceKind::Embedding));
        }
        Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

pub struct FakeRetriever {
    pub passages: Result<Vec<RetrievedPassage>, ServiceError>,
    /// `(collection, k)` per call.
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl FakeRetriever {
    pub fn returning(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages: Ok(passages),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            passages: Err(ServiceError::Timeout {
                service: ServiceKind::Retrieval,
                after: std::time::Duration::from_secs(30),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Retriever for FakeRetriever {
    fn retrieve(
        &self,
        collection: &str,
        _embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, ServiceError> {
        self.calls
            .lock()
            .expect("lock")
            .push((collection.to_string(), k));
        self.passages
            .clone()
            .map(|all| all.into_iter().take(k).collect())
    }
}

// ---------------------------------------------------------------------------
// Reranker
// ---------------------------------------------------------------------------

/// Scores documents by content lookup; unknown content scores 0.
pub struct FakeReranker {
    pub scores: Result<BTreeMap<String, f64>, ServiceError>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl FakeReranker {
    pub fn by_content(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: Ok(scores
                .iter()
                .map(|(content, score)| ((*content).to_string(), *score))
                .collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            scores: Err(transport(ServiceKind::Rerank)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }
}

impl Reranker for FakeReranker {
    fn rerank(&self, _query: &str, documents: &[&str]) -> Result<Vec<RerankScore>, ServiceError> {
        self.calls
            .lock()
            .expect("lock")
            .push(documents.iter().map(ToString::to_string).collect());
        let scores = self.scores.clone()?;
        Ok(documents
            .iter()
            .enumerate()
            .map(|(index, doc)| RerankScore {
                index,
                relevance_score: scores.get(*doc).copied().unwrap_or(0.0),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Replies from a queue, one entry per call.
pub struct FakeGenerator {
    pub replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub schema: bool,
}

impl FakeGenerator {
    pub fn scripted(replies: Vec<Result<String, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            schema: false,
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::scripted(replies.iter().map(|r| Ok((*r).to_string())).collect())
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl Generator for FakeGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        self.requests.lock().expect("lock").push(request.clone());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::EmptyResponse {
                service: ServiceKind::Generation,
            }))
    }

    fn supports_schema(&self) -> bool {
        self.schema
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

pub struct Doubles {
    pub embedder: Arc<FakeEmbedder>,
    pub retriever: Arc<FakeRetriever>,
    pub reranker: Arc<FakeReranker>,
    pub generator: Arc<FakeGenerator>,
}

impl Doubles {
    pub fn new(retriever: FakeRetriever, reranker: FakeReranker, generator: FakeGenerator) -> Self {
        Self {
            embedder: Arc::new(FakeEmbedder::default()),
            retriever: Arc::new(retriever),
            reranker: Arc::new(reranker),
            generator: Arc::new(generator),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            embedder: self.embedder.clone(),
            retriever: self.retriever.clone(),
            reranker: self.reranker.clone(),
            generator: self.generator.clone(),
        }
    }
}
