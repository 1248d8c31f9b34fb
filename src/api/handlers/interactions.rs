use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::api::handlers::query::AppState;
use crate::api::middleware::AppError;
use crate::models::InteractionListParams;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

/// Most recent interactions, newest first
pub async fn list_interactions(
    State(state): State<AppState>,
    Query(params): Query<InteractionListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let interactions = state.store.recent_interactions(limit).await?;

    Ok(Json(serde_json::json!({
        "interactions": interactions,
        "count": interactions.len(),
    })))
}

pub async fn get_interaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let interaction = state
        .store
        .get_interaction(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Interaction {} not found", id)))?;

    Ok(Json(serde_json::json!({
        "interaction": interaction,
    })))
}
