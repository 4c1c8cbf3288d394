use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use fleet_core::{Resource, VolumeAction};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VolumeBody {
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// POST /api/agents/{id}/volumes/{drive}/{action} — run one disk-encryption action.
pub async fn volume_action(
    State(app): State<AppState>,
    Path((agent_id, drive, action)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Resource>, AppError> {
    let action = VolumeAction::ALL
        .into_iter()
        .filter(|a| *a != VolumeAction::Status)
        .find(|a| a.slug() == action)
        .ok_or_else(|| AppError::bad_request(format!("unknown volume action '{action}'")))?;
    let body: VolumeBody = super::optional_body(&body)?;

    let resource = app
        .orchestrator
        .volume_action(&agent_id, &drive, action, body.passphrase.as_deref())
        .await?;
    Ok(Json(resource))
}
