use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Machine-readable failure kinds surfaced in result diagnostics.
///
/// Only fatal kinds replace the answer with a failure message; the rest are
/// recovered and appear only in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidQuery,
    RetrievalUnavailable,
    EvaluationUnavailable,
    DraftGenerationUnavailable,
    VerificationGenerationUnavailable,
    MalformedVerifierOutput,
}

impl FailureKind {
    /// Stable code identifier (`S####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidQuery => "S1001",
            Self::RetrievalUnavailable => "S2001",
            Self::EvaluationUnavailable => "S3001",
            Self::DraftGenerationUnavailable => "S4001",
            Self::VerificationGenerationUnavailable => "S5001",
            Self::MalformedVerifierOutput => "S5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidQuery => "Query failed validation",
            Self::RetrievalUnavailable => "Retrieval service unavailable",
            Self::EvaluationUnavailable => "Relevance evaluation unavailable",
            Self::DraftGenerationUnavailable => "Answer generation unavailable",
            Self::VerificationGenerationUnavailable => "Answer verification unavailable",
            Self::MalformedVerifierOutput => "Verifier output could not be parsed",
        }
    }

    /// Whether this failure leaves the request without a usable answer.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InvalidQuery | Self::RetrievalUnavailable | Self::DraftGenerationUnavailable
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Reasons a [`Query`](crate::model::Query) is refused before any service call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("query text is empty")]
    EmptyText,

    #[error("query scope is empty")]
    EmptyScope,

    #[error("top_k must be at least 1")]
    ZeroTopK,

    #[error("lexical weight {0} is outside [0, 1]")]
    InvalidLexicalWeight(f64),

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),
}

/// Configuration values that parsed but make no sense together.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid [{section}] config: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            section,
            message: message.into(),
        }
    }
}

/// Which downstream collaborator a [`ServiceError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Embedding,
    Retrieval,
    Rerank,
    Generation,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embedding => "embedding",
            Self::Retrieval => "retrieval",
            Self::Rerank => "rerank",
            Self::Generation => "generation",
        };
        f.write_str(name)
    }
}

/// Failure of a call to a service this crate does not control.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} call timed out after {after:?}")]
    Timeout { service: ServiceKind, after: Duration },

    #[error("{service} transport error: {message}")]
    Transport {
        service: ServiceKind,
        message: String,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: ServiceKind,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: ServiceKind,
        message: String,
    },

    #[error("{service} returned an empty response")]
    EmptyResponse { service: ServiceKind },

    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl ServiceError {
    /// The service responsible, when the error names one.
    #[must_use]
    pub const fn service(&self) -> Option<ServiceKind> {
        match self {
            Self::Timeout { service, .. }
            | Self::Transport { service, .. }
            | Self::Status { service, .. }
            | Self::Decode { service, .. }
            | Self::EmptyResponse { service } => Some(*service),
            Self::RateLimited { .. } => None,
        }
    }
}
