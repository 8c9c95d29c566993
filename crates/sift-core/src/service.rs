//! Seams to the external collaborators the pipeline consumes.
//!
//! Implementations own their transport and must enforce their own per-call
//! timeout; a call that exceeds it returns [`ServiceError::Timeout`].
//! All traits require `Send + Sync` so one set of clients can serve
//! concurrent requests.

use crate::error::ServiceError;
use crate::model::RetrievedPassage;
use serde::{Deserialize, Serialize};

/// Computes embedding vectors. Used once per request, for the query text.
pub trait Embedder: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ServiceError`] when the embedding service fails.
    fn embed(&self, texts: &[&str], model: &str) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Nearest-neighbour lookup in one vector collection.
pub trait Retriever: Send + Sync {
    /// Passages closest to `embedding`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] when the index cannot be queried.
    fn retrieve(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, ServiceError>;
}

/// One cross-encoder score; `index` points into the submitted documents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    /// On the 0–10 relevance scale.
    #[serde(alias = "score")]
    pub relevance_score: f64,
}

/// Cross-encoder relevance scoring of documents against a query.
pub trait Reranker: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ServiceError`] when the rerank service fails.
    fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<RerankScore>, ServiceError>;
}

/// Parameters of one text generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// JSON Schema constraining the output, for generators that support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

/// Language-model text generation.
pub trait Generator: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ServiceError`] when generation fails or times out.
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;

    /// Whether [`GenerationRequest::response_schema`] is honoured.
    fn supports_schema(&self) -> bool {
        false
    }
}
