use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use fleet_core::AgentAction;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SessionBody {
    #[serde(default)]
    pub notify_user: bool,
}

/// POST /api/agents/{id}/{action} — enable, disable, admit, force-report,
/// start-remote-session, stop-remote-session.
pub async fn agent_action(
    State(app): State<AppState>,
    Path((agent_id, action)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let action = AgentAction::ALL
        .into_iter()
        .find(|a| a.slug() == action)
        .ok_or_else(|| AppError::bad_request(format!("unknown agent action '{action}'")))?;
    let orch = &app.orchestrator;

    let value = match action {
        AgentAction::Enable => serde_json::to_value(orch.enable_agent(&agent_id).await?)?,
        AgentAction::Disable => serde_json::to_value(orch.disable_agent(&agent_id).await?)?,
        AgentAction::Admit => serde_json::to_value(orch.admit_agent(&agent_id).await?)?,
        AgentAction::ForceReport => serde_json::to_value(orch.force_report(&agent_id).await?)?,
        AgentAction::StartRemoteSession => {
            let body: SessionBody = super::optional_body(&body)?;
            serde_json::to_value(
                orch.start_remote_session(&agent_id, body.notify_user)
                    .await?,
            )?
        }
        AgentAction::StopRemoteSession => {
            serde_json::to_value(orch.stop_remote_session(&agent_id).await?)?
        }
    };
    Ok(Json(value))
}
