use axum::{extract::State, Json};

use crate::api::handlers::query::AppState;
use crate::api::middleware::AppError;
use crate::models::SubjectKind;

/// Schema registry of the loaded snapshot
pub async fn get_schema(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let registry = state.snapshot.registry();
    let entities: Vec<_> = registry.entities().collect();

    Ok(Json(serde_json::json!({
        "dataset_version": state.snapshot.version(),
        "entities": entities,
        "players": registry.subjects(SubjectKind::Player).count(),
        "teams": registry.subjects(SubjectKind::Team).count(),
        "latest_season": registry.latest_season(),
    })))
}
