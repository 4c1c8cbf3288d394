use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use fleet_core::{MeshAction, Resource};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MeshBody {
    #[serde(default)]
    pub profile: Option<String>,
}

/// POST /api/agents/{id}/mesh/{action} — install, register, connect, etc.
pub async fn mesh_action(
    State(app): State<AppState>,
    Path((agent_id, action)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Resource>, AppError> {
    let action = MeshAction::ALL
        .into_iter()
        .find(|a| a.slug() == action)
        .ok_or_else(|| AppError::bad_request(format!("unknown mesh action '{action}'")))?;
    let body: MeshBody = super::optional_body(&body)?;

    let resource = app
        .orchestrator
        .mesh_action(&agent_id, action, body.profile.as_deref())
        .await?;
    Ok(Json(resource))
}
