//! The query endpoint: runs the agent pipeline and streams events over SSE.
//!
//! Event order on the wire: `session_id` (when a new session was allocated),
//! zero or more `chunk` frames, one `sources` frame, then `done` - or a
//! terminal `error` frame instead. Admission is bounded; excess queries fail
//! fast instead of queueing.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::agent;
use crate::api::error_response;
use crate::error::EngineError;
use crate::models::{CodebaseStatus, Message, QueryEvent, QueryRequest};
use crate::state::AppState;

const MAX_QUERY_CHARS: usize = 4000;

/// POST /api/query - stream an answer for one codebase question.
pub async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    // ── Admission checks ──────────────────────────────────
    let question = req.query.trim().to_string();
    if question.is_empty() {
        return Err(error_response(EngineError::validation("query is required")));
    }
    if question.len() > MAX_QUERY_CHARS {
        return Err(error_response(EngineError::validation(format!(
            "query longer than {MAX_QUERY_CHARS} characters"
        ))));
    }

    let codebase = state
        .registry
        .get(req.codebase_id)
        .ok_or_else(|| error_response(EngineError::CodebaseNotFound(req.codebase_id)))?;
    // A failed (or still ingesting) codebase yields a domain error, not a stream.
    if codebase.status != CodebaseStatus::Completed {
        return Err(error_response(EngineError::CodebaseNotReady(codebase.status)));
    }

    // Sessions are bound to one codebase; reuse requires a match.
    let (session_id, new_session) = match req.session_id {
        Some(session_id) => {
            let owner = state
                .sessions
                .codebase_of(session_id)
                .ok_or_else(|| error_response(EngineError::SessionNotFound(session_id)))?;
            if owner != req.codebase_id {
                return Err(error_response(EngineError::SessionCodebaseMismatch {
                    session_id,
                }));
            }
            (session_id, false)
        }
        None => (state.sessions.create(req.codebase_id), true),
    };

    // Bounded concurrency: fail fast when at capacity.
    let permit = state
        .query_semaphore
        .clone()
        .try_acquire_owned()
        .map_err(|_| error_response(EngineError::Capacity))?;

    // ── Drive the agent off-request, streaming through a 1-slot channel ──
    let (tx, rx) = mpsc::channel::<QueryEvent>(1);
    let agent_deps = state.agent.clone();
    let sessions = state.sessions.clone();
    let codebase_id = req.codebase_id;

    tokio::spawn(async move {
        let _permit = permit;

        if new_session {
            if tx.send(QueryEvent::SessionId { session_id }).await.is_err() {
                return;
            }
        }

        let outcome =
            agent::run_query(&agent_deps, codebase_id, session_id, &question, &tx).await;

        // Persist the turn for session continuity, error or not.
        if let Err(e) = sessions.append(session_id, Message::user(question.clone())).await {
            tracing::warn!("failed to persist user message: {e}");
        }
        let assistant_content = match &outcome.error {
            Some(error) if outcome.response.is_empty() => error.clone(),
            _ => outcome.response.clone(),
        };
        let assistant = Message::assistant(
            assistant_content,
            outcome.citations.clone(),
            outcome.retrieved_chunk_ids.clone(),
        );
        if let Err(e) = sessions.append(session_id, assistant).await {
            tracing::warn!("failed to persist assistant message: {e}");
        }
    });

    let event_stream = ReceiverStream::new(rx).map(|event| {
        let sse_event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{\"type\":\"error\",\"error\":\"encode\"}"));
        Ok::<_, Infallible>(sse_event)
    });

    Ok(Sse::new(event_stream))
}
