use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::QueryRequest;
use crate::services::{DatasetSnapshot, QueryPipeline};
use crate::storage::InteractionStore;

/// Longest question accepted over HTTP
const MAX_QUESTION_CHARS: usize = 500;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QueryPipeline>,
    pub snapshot: Arc<DatasetSnapshot>,
    pub store: Arc<InteractionStore>,
}

/// Answer a natural-language question against the loaded snapshot.
///
/// Pipeline failures come back as an error envelope with status 200; only
/// malformed requests are HTTP errors.
pub async fn run_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("Question cannot be empty".to_string()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(AppError::Validation(format!(
            "Question is longer than {} characters",
            MAX_QUESTION_CHARS
        )));
    }

    let outcome = state.pipeline.run(question, &state.snapshot).await;

    // The log is a side channel; a failed write never changes the answer
    if let Err(e) = state.store.log_interaction(&outcome.trace).await {
        tracing::warn!("Failed to log interaction {}: {}", outcome.trace.id, e);
    }

    Ok(Json(serde_json::json!({
        "envelope": outcome.envelope,
        "trace": outcome.trace,
    })))
}
