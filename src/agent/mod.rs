//! Staged query pipeline.
//!
//! A typed state struct flows through an explicit stage sequence:
//! analyse → retrieve → contextualise → generate → validate. The stage
//! switch is the whole "framework" - no dynamic dispatch. Generation tokens
//! stream through a single-element channel so the producer backpressures
//! when the consumer is slow, and a dropped consumer cancels generation at
//! the next send.

pub mod citations;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chunking::estimate_tokens;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Citation, QueryEvent, Role};
use crate::retrieval::{RetrievalEngine, RetrievalFilters, ScoredChunk};
use crate::store::SessionStore;
use futures_util::StreamExt;

const SYSTEM_PROMPT: &str = "You are an expert code documentation assistant. You help developers \
understand a codebase by analysing the provided code context.\n\
Rules:\n\
1. Answer ONLY from the provided code context. Never use outside knowledge about other projects.\n\
2. Cite sources as `file_path:line_start-line_end` for every claim about the code.\n\
3. Explain technical concepts clearly and trace through execution for \"how does X work\" questions.\n\
4. If the context does not contain the answer, reply with: I don't see this in the provided code.";

const EMPTY_CONTEXT_NOTE: &str =
    "No relevant code was retrieved from this codebase for the question.";

pub struct AgentDeps {
    pub retrieval: Arc<RetrievalEngine>,
    pub chat: Arc<dyn ChatModel>,
    pub sessions: Arc<SessionStore>,
    /// History prefix length for the prompt.
    pub history_messages: usize,
    /// Token budget for the code context block.
    pub context_token_budget: usize,
}

/// State carried between stages.
#[derive(Debug, Default)]
pub struct AgentState {
    pub query: String,
    pub normalized_query: String,
    pub filters: RetrievalFilters,
    pub retrieved: Vec<ScoredChunk>,
    pub context: String,
    pub response: String,
    pub citations: Vec<Citation>,
    pub error: Option<String>,
}

/// What the transport layer persists after the stream ends.
#[derive(Debug)]
pub struct QueryOutcome {
    pub response: String,
    pub citations: Vec<Citation>,
    pub retrieved_chunk_ids: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Analyse,
    Retrieve,
    Contextualise,
    Generate,
    Validate,
    Done,
}

/// Drive the pipeline to completion, emitting `chunk`, `sources`, and a
/// terminal `done`/`error` frame on `tx`. The caller owns the `session_id`
/// frame and message persistence.
pub async fn run_query(
    deps: &AgentDeps,
    codebase_id: Uuid,
    session_id: Uuid,
    query: &str,
    tx: &mpsc::Sender<QueryEvent>,
) -> QueryOutcome {
    let mut state = AgentState {
        query: query.to_string(),
        ..AgentState::default()
    };

    let mut stage = Stage::Analyse;
    while stage != Stage::Done {
        let step: Result<Stage> = match stage {
            Stage::Analyse => {
                analyse(&mut state);
                Ok(Stage::Retrieve)
            }
            Stage::Retrieve => retrieve(deps, codebase_id, &mut state)
                .await
                .map(|()| Stage::Contextualise),
            Stage::Contextualise => {
                contextualise(deps.context_token_budget, &mut state);
                Ok(Stage::Generate)
            }
            Stage::Generate => generate(deps, session_id, &mut state, tx)
                .await
                .map(|()| Stage::Validate),
            Stage::Validate => {
                validate(&mut state);
                Ok(Stage::Done)
            }
            Stage::Done => unreachable!(),
        };

        match step {
            Ok(next) => stage = next,
            Err(err) => {
                // No implicit retry: the client re-asks.
                let message = format!("query failed at {stage:?}: {err:#}");
                tracing::error!("{message}");
                state.error = Some(message.clone());
                let _ = tx.send(QueryEvent::Error { error: message }).await;
                break;
            }
        }
    }

    if state.error.is_none() {
        let _ = tx
            .send(QueryEvent::Sources {
                sources: state.citations.clone(),
            })
            .await;
        let _ = tx.send(QueryEvent::Done).await;
    }

    QueryOutcome {
        response: state.response,
        citations: state.citations,
        retrieved_chunk_ids: state.retrieved.iter().map(|s| s.chunk.id.clone()).collect(),
        error: state.error,
    }
}

/// Query cues that become metadata pre-filters, checked in order.
const LANGUAGE_CUES: &[(&str, &str)] = &[
    ("python", "python"),
    ("javascript", "javascript"),
    ("typescript", "typescript"),
    ("golang", "go"),
    (" go ", "go"),
    ("java", "java"),
    ("rust", "rust"),
    ("c++", "cpp"),
    ("cpp", "cpp"),
];

/// Normalise the query and pull metadata filters out of natural-language
/// cues ("in Python", "in auth.py"). No external calls.
fn analyse(state: &mut AgentState) {
    state.normalized_query = state.query.split_whitespace().collect::<Vec<_>>().join(" ");

    let padded = format!(" {} ", state.normalized_query.to_lowercase());
    for (cue, language) in LANGUAGE_CUES {
        let mentioned = if cue.starts_with(' ') {
            padded.contains(cue)
        } else {
            padded.contains(&format!(" {cue} "))
                || padded.contains(&format!(" {cue},"))
                || padded.contains(&format!(" {cue}?"))
        };
        if mentioned {
            state.filters.language = Some((*language).to_string());
            break;
        }
    }

    let file_pattern = regex::Regex::new(
        r"([A-Za-z0-9_\-./]*[A-Za-z0-9_\-]+\.(?:py|pyi|js|jsx|mjs|cjs|ts|tsx|java|go|rs|c|cc|cpp|h|hpp))\b",
    )
    .expect("file pattern must compile");
    if let Some(caps) = file_pattern.captures(&state.normalized_query) {
        state.filters.file_path = Some(caps[1].to_string());
    }

    tracing::debug!(
        "query analysed: language={:?} file={:?}",
        state.filters.language,
        state.filters.file_path
    );
}

async fn retrieve(deps: &AgentDeps, codebase_id: Uuid, state: &mut AgentState) -> Result<()> {
    state.retrieved = deps
        .retrieval
        .retrieve(&state.normalized_query, codebase_id, &state.filters)
        .await
        .context("retrieval failed")?;

    // Over-constrained filters should not silence the whole answer: retry
    // once without them.
    if state.retrieved.is_empty() && state.filters != RetrievalFilters::default() {
        state.retrieved = deps
            .retrieval
            .retrieve(&state.normalized_query, codebase_id, &RetrievalFilters::default())
            .await
            .context("unfiltered retrieval failed")?;
    }

    tracing::info!("retrieved {} chunk(s)", state.retrieved.len());
    Ok(())
}

/// Format retrieved chunks into a bounded context block, best first. The
/// lowest-ranked chunks are dropped once the token budget is exceeded.
fn contextualise(token_budget: usize, state: &mut AgentState) {
    if state.retrieved.is_empty() {
        state.context = EMPTY_CONTEXT_NOTE.to_string();
        return;
    }

    let mut blocks: Vec<String> = Vec::new();
    let mut total_tokens = 0usize;

    for scored in &state.retrieved {
        let chunk = &scored.chunk;
        let block = format!(
            "{}:{}-{}\n```{}\n{}\n```",
            chunk.file_path, chunk.line_start, chunk.line_end, chunk.language, chunk.content
        );
        let tokens = estimate_tokens(&block);
        if !blocks.is_empty() && total_tokens + tokens > token_budget {
            tracing::debug!("context budget reached, truncating lower-ranked chunks");
            break;
        }
        total_tokens += tokens;
        blocks.push(block);
    }

    state.context = blocks.join("\n\n");
}

async fn generate(
    deps: &AgentDeps,
    session_id: Uuid,
    state: &mut AgentState,
    tx: &mpsc::Sender<QueryEvent>,
) -> Result<()> {
    let history = deps
        .sessions
        .recent(session_id, deps.history_messages)
        .await
        .unwrap_or_default();

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    for message in &history {
        match message.role {
            Role::User => messages.push(ChatMessage::user(message.content.clone())),
            Role::Assistant => messages.push(ChatMessage::assistant(message.content.clone())),
        }
    }
    // Context rides in the user message so smaller models attend to it.
    messages.push(ChatMessage::user(format!(
        "Here is code retrieved from the codebase:\n\n{}\n---\nQuestion: {}",
        state.context, state.normalized_query
    )));

    let mut stream = deps
        .chat
        .stream_chat(messages)
        .await
        .context("chat stream failed to start")?;

    while let Some(delta) = stream.next().await {
        let token = delta.context("chat stream error")?;
        state.response.push_str(&token);
        if tx.send(QueryEvent::Chunk { content: token }).await.is_err() {
            // Consumer gone: the client disconnected. Abort at this
            // suspension point; downstream work stops with the stream drop.
            tracing::info!("client disconnected, aborting generation");
            state.error = Some("client disconnected".to_string());
            return Ok(());
        }
    }

    Ok(())
}

/// Match parsed citations against the retrieval set and keep the survivors.
fn validate(state: &mut AgentState) {
    let candidates = citations::extract_citations(&state.response);
    state.citations = citations::validate_citations(candidates, &state.retrieved);
    tracing::info!("{} citation(s) validated", state.citations.len());
}
