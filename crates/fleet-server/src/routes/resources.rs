use axum::extract::{Path, State};
use axum::Json;
use fleet_core::{Resource, ResourceKey};

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/agents/{id}/resources — every resource with its operation state.
pub async fn list_resources(
    State(app): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<Resource>>, AppError> {
    Ok(Json(app.orchestrator.resources(&agent_id).await?))
}

/// POST /api/agents/{id}/refresh — overwrite local rows with the agent's report.
pub async fn refresh(
    State(app): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = app.orchestrator.refresh(&agent_id).await?;
    Ok(Json(serde_json::json!({
        "volumes": report.volumes,
        "mesh": report.mesh,
        "written": report.written(),
    })))
}

/// DELETE /api/agents/{id}/resources/{key}/operation — clear a stuck operation.
pub async fn clear_operation(
    State(app): State<AppState>,
    Path((agent_id, key)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key: ResourceKey = key.parse()?;
    let previous = app.orchestrator.clear_operation(&agent_id, &key).await?;
    Ok(Json(serde_json::json!({
        "agent_id": agent_id,
        "resource": key,
        "previous": previous,
    })))
}
