//! Domain error taxonomy.
//!
//! Pipelines and activities use `anyhow` internally; these variants are the
//! boundary errors that API handlers translate to HTTP responses. Per-file
//! and per-chunk failures during ingestion are absorbed as warnings and never
//! reach this type.

use thiserror::Error;
use uuid::Uuid;

use crate::models::CodebaseStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected at admission; not logged as a fault.
    #[error("{0}")]
    Validation(String),

    #[error("codebase {0} not found")]
    CodebaseNotFound(Uuid),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {0} has expired")]
    SessionExpired(Uuid),

    /// Session presented with a codebase it does not belong to.
    #[error("session {session_id} is bound to a different codebase")]
    SessionCodebaseMismatch { session_id: Uuid },

    /// Query admission limit reached; the caller retries later.
    #[error("query service at capacity")]
    Capacity,

    /// Queries require a completed ingestion.
    #[error("codebase is {0} and cannot serve queries")]
    CodebaseNotReady(CodebaseStatus),

    /// Anything unexpected below the boundary.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let id = Uuid::nil();
        assert_eq!(
            EngineError::CodebaseNotFound(id).to_string(),
            format!("codebase {id} not found")
        );
        assert_eq!(
            EngineError::CodebaseNotReady(CodebaseStatus::Failed).to_string(),
            "codebase is failed and cannot serve queries"
        );
        assert_eq!(
            EngineError::validation("bad input").to_string(),
            "bad input"
        );
    }
}
