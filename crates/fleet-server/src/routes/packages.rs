use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use fleet_core::command::PackageSpec;
use fleet_core::{PackageAction, Resource};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeployBody {
    pub action: PackageAction,
    #[serde(flatten)]
    pub spec: PackageSpec,
}

/// POST /api/agents/{id}/packages — publish a package install/update/uninstall.
///
/// Answers 202: the outcome arrives later on the package result subject.
pub async fn deploy_package(
    State(app): State<AppState>,
    Path(agent_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Resource>), AppError> {
    let body: DeployBody = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))?;
    let resource = app
        .orchestrator
        .deploy_package(&agent_id, body.action, &body.spec)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(resource)))
}
