//! Codebase management endpoints: upload, register, list, status, delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error_response;
use crate::error::EngineError;
use crate::ingest::{staging, staging_dir_for};
use crate::models::{
    AddCodebaseRequest, Codebase, SourceKind, StatusProjection, UploadResponse,
};
use crate::state::AppState;

type ApiError = (StatusCode, String);

/// GET /api/codebases - list all codebases, newest first.
pub async fn list_codebases(State(state): State<AppState>) -> Json<Vec<Codebase>> {
    Json(state.registry.list())
}

/// POST /api/codebases - register a remote-clone codebase and start ingestion.
pub async fn add_codebase(
    State(state): State<AppState>,
    Json(req): Json<AddCodebaseRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(error_response(EngineError::validation(
            "name must be 1-100 characters",
        )));
    }
    staging::validate_remote_url(&req.repository_url)
        .map_err(|e| error_response(EngineError::validation(e.to_string())))?;

    let mut codebase = Codebase::new(name.to_string(), req.description, SourceKind::RemoteUrl);
    codebase.source_ref = Some(req.repository_url);
    let codebase_id = codebase.id;
    let status = codebase.status;
    state.registry.insert(codebase);

    let workflow_id = state.ingest.launch(codebase_id);
    tracing::info!("registered remote codebase {codebase_id} ({workflow_id})");

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            codebase_id,
            status,
            workflow_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: String,
    pub description: Option<String>,
}

/// POST /api/codebases/upload - upload a ZIP archive body and start
/// ingestion. Exactly `max_upload_bytes` is accepted; one byte more is not.
pub async fn upload_codebase(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let name = params.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(error_response(EngineError::validation(
            "name must be 1-100 characters",
        )));
    }
    let max = state.config.max_upload_bytes;
    if body.len() as u64 > max {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("upload exceeds {max} bytes"),
        ));
    }
    if body.is_empty() {
        return Err(error_response(EngineError::validation("empty upload body")));
    }

    let mut codebase = Codebase::new(name.to_string(), params.description, SourceKind::Archive);
    codebase.size_bytes = body.len() as u64;
    codebase.source_ref = Some(staging::UPLOAD_NAME.to_string());
    let codebase_id = codebase.id;
    let status = codebase.status;

    // Persist the archive into the content-addressed staging area before the
    // workflow can observe the record.
    let staging_dir = staging_dir_for(&state.config, codebase_id);
    std::fs::create_dir_all(&staging_dir)
        .map_err(|e| error_response(EngineError::Internal(e.into())))?;
    std::fs::write(staging_dir.join(staging::UPLOAD_NAME), &body)
        .map_err(|e| error_response(EngineError::Internal(e.into())))?;

    state.registry.insert(codebase);
    let workflow_id = state.ingest.launch(codebase_id);
    tracing::info!(
        "accepted archive upload for {codebase_id} ({} bytes)",
        body.len()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            codebase_id,
            status,
            workflow_id,
        }),
    ))
}

/// GET /api/codebases/{id}/status - the ingestion status projection.
pub async fn codebase_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusProjection>, ApiError> {
    state
        .registry
        .status_projection(id)
        .map(Json)
        .ok_or_else(|| error_response(EngineError::CodebaseNotFound(id)))
}

/// DELETE /api/codebases/{id} - cancel any running ingestion and cascade:
/// vectors, sessions, staging, then the record itself.
pub async fn delete_codebase(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.registry.get(id).is_none() {
        return Err(error_response(EngineError::CodebaseNotFound(id)));
    }

    state.ingest.cancel(id);

    let chunks_removed = state.vectors.delete_by_codebase(id);
    let sessions_removed = state.sessions.delete_by_codebase(id);
    staging::remove_staging(&staging_dir_for(&state.config, id));
    state.registry.remove(id);

    tracing::info!(
        "deleted codebase {id}: {chunks_removed} chunk(s), {sessions_removed} session(s)"
    );
    Ok(StatusCode::NO_CONTENT)
}
