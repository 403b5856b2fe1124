//! Pipeline error taxonomy.
//!
//! Every failure surfaced by [`AnswerService`](crate::service::AnswerService)
//! is one of five kinds. Each kind has a stable machine-readable code that
//! transports map to a user-facing status.
//!
//! | Kind | Code | HTTP |
//! |------|------|------|
//! | [`PipelineError::InvalidRequest`] | `invalid_request` | 400 |
//! | [`PipelineError::IndexNotReady`] | `index_not_ready` | 409 |
//! | [`PipelineError::EmbeddingFailure`] | `embedding_failure` | 502 |
//! | [`PipelineError::GenerationFailure`] | `generation_failure` | 502 |
//! | [`PipelineError::PersistenceFailure`] | `persistence_failure` | 500 |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty or missing question, malformed upload. Nothing was mutated.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A question was asked before any document was ingested.
    #[error("index not ready: {0}")]
    IndexNotReady(String),

    /// Embedding could not produce vectors. Ingestion is aborted wholesale.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// The language model failed or returned unusable output. The user turn
    /// appended before the call stays in history.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// A durable write or read failed.
    #[error("persistence failed: {0}")]
    PersistenceFailure(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::IndexNotReady(_) => "index_not_ready",
            PipelineError::EmbeddingFailure(_) => "embedding_failure",
            PipelineError::GenerationFailure(_) => "generation_failure",
            PipelineError::PersistenceFailure(_) => "persistence_failure",
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            PipelineError::InvalidRequest(m)
            | PipelineError::IndexNotReady(m)
            | PipelineError::EmbeddingFailure(m)
            | PipelineError::GenerationFailure(m)
            | PipelineError::PersistenceFailure(m) => m,
        }
    }

    pub fn embedding(err: anyhow::Error) -> Self {
        PipelineError::EmbeddingFailure(format!("{:#}", err))
    }

    pub fn generation(err: anyhow::Error) -> Self {
        PipelineError::GenerationFailure(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::PersistenceFailure(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::PersistenceFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let cases = [
            (PipelineError::InvalidRequest("x".into()), "invalid_request"),
            (PipelineError::IndexNotReady("x".into()), "index_not_ready"),
            (PipelineError::EmbeddingFailure("x".into()), "embedding_failure"),
            (
                PipelineError::GenerationFailure("x".into()),
                "generation_failure",
            ),
            (
                PipelineError::PersistenceFailure("x".into()),
                "persistence_failure",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.message(), "x");
        }
    }

    #[test]
    fn io_errors_are_persistence_failures() {
        let err: PipelineError = std::io::Error::other("disk full").into();
        assert_eq!(err.code(), "persistence_failure");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn anyhow_chain_is_kept() {
        let err = anyhow::anyhow!("connection refused").context("calling model");
        let msg = PipelineError::generation(err).to_string();
        assert!(msg.contains("calling model"));
        assert!(msg.contains("connection refused"));
    }
}
