//! Agent-level commands.
//!
//! These target the agent itself rather than a resource, so they take no
//! guard: a short request/reply whose error is surfaced directly.

use bytes::Bytes;
use fleet_core::command::{decode_reply, AgentReply, Reply, SessionRequest};
use fleet_core::{Action, Agent, AgentAction, AgentStatus, FleetError, Operation, Result};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{bus_failure, Orchestrator};

/// Digits in a generated remote-session PIN.
const SESSION_PIN_DIGITS: u32 = 6;

/// A remote-control session the agent accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteSession {
    pub agent_id: String,
    pub pin: String,
}

fn generate_pin() -> String {
    let upper = 10u32.pow(SESSION_PIN_DIGITS);
    let n = rand::thread_rng().gen_range(0..upper);
    format!("{n:0width$}", width = SESSION_PIN_DIGITS as usize)
}

impl Orchestrator {
    /// Send one agent-level command and wait for its acknowledgement.
    async fn agent_command(
        &self,
        agent_id: &str,
        action: AgentAction,
        session: Option<SessionRequest>,
    ) -> Result<Agent> {
        let agent = self.resolve_agent(agent_id).await?;
        let op = Operation::agent(&agent, action, session)?;
        let encoded = op.encode()?;
        let timeout = self.timeouts.for_class(encoded.latency);
        let op_id = Uuid::new_v4();
        info!(
            %op_id,
            agent_id,
            action = %op.action,
            subject = %encoded.subject,
            "sending agent command"
        );

        let payload = self
            .transport
            .request(&encoded.subject, Bytes::from(encoded.payload), timeout)
            .await
            .map_err(|e| {
                warn!(%op_id, agent_id, action = %op.action, error = %e, "agent command failed");
                bus_failure(agent_id, Action::Agent(action), &e)
            })?;
        let reply: AgentReply = decode_reply(&payload)?;
        if let Some(message) = reply.remote_error() {
            return Err(FleetError::Remote {
                agent_id: agent_id.to_string(),
                message: message.to_string(),
            });
        }

        let status = match action {
            AgentAction::Enable | AgentAction::Admit => Some(AgentStatus::Enabled),
            AgentAction::Disable => Some(AgentStatus::Disabled),
            _ => None,
        };
        match status {
            Some(status) => {
                let agent = self.set_agent_status(agent_id, status).await?;
                info!(%op_id, agent_id, %status, "agent status updated");
                Ok(agent)
            }
            None => Ok(agent),
        }
    }

    pub async fn enable_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agent_command(agent_id, AgentAction::Enable, None).await
    }

    pub async fn disable_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agent_command(agent_id, AgentAction::Disable, None).await
    }

    /// Accept an agent that is waiting for admission.
    pub async fn admit_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agent_command(agent_id, AgentAction::Admit, None).await
    }

    /// Ask the agent to send a fresh inventory report.
    pub async fn force_report(&self, agent_id: &str) -> Result<Agent> {
        self.agent_command(agent_id, AgentAction::ForceReport, None)
            .await
    }

    /// Start a remote-control session protected by a generated PIN.
    pub async fn start_remote_session(
        &self,
        agent_id: &str,
        notify_user: bool,
    ) -> Result<RemoteSession> {
        let pin = generate_pin();
        let session = SessionRequest {
            pin: pin.clone(),
            notify_user,
        };
        let agent = self
            .agent_command(agent_id, AgentAction::StartRemoteSession, Some(session))
            .await?;
        Ok(RemoteSession {
            agent_id: agent.id,
            pin,
        })
    }

    pub async fn stop_remote_session(&self, agent_id: &str) -> Result<Agent> {
        self.agent_command(agent_id, AgentAction::StopRemoteSession, None)
            .await
    }
}
