//! HTTP surface: codebase CRUD and the SSE query stream.

pub mod chat;
pub mod codebases;

use axum::http::StatusCode;

use crate::error::EngineError;

/// Map domain errors onto HTTP responses. Validation problems are client
/// errors; anything internal is a 500 with a generic body.
pub fn error_response(err: EngineError) -> (StatusCode, String) {
    let status = match &err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::CodebaseNotFound(_) | EngineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::SessionExpired(_) => StatusCode::GONE,
        EngineError::SessionCodebaseMismatch { .. } => StatusCode::BAD_REQUEST,
        EngineError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::CodebaseNotReady(_) => StatusCode::CONFLICT,
        EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match &err {
        EngineError::Internal(inner) => {
            tracing::error!("internal error: {inner:#}");
            "internal error".to_string()
        }
        other => other.to_string(),
    };

    (status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_response(EngineError::validation("bad")).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(EngineError::CodebaseNotFound(Uuid::new_v4())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(EngineError::Capacity).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(EngineError::CodebaseNotReady(
                crate::models::CodebaseStatus::Failed
            ))
            .0,
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_internal_error_body_is_generic() {
        let (_, body) = error_response(EngineError::Internal(anyhow::anyhow!(
            "secret connection string"
        )));
        assert_eq!(body, "internal error");
    }
}
