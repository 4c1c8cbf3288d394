//! Reconciliation with what agents actually report.
//!
//! A refresh asks the agent for its current state and overwrites the local
//! rows unconditionally: any `Pending` or `Stalled` marker and any stored
//! error are dropped. Rows carry no refresh timestamp, so refreshing an
//! unchanged agent leaves the stored bytes identical.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fleet_core::command::{check_mesh_settings, decode_reply, MeshReply, Reply, VolumeReply};
use fleet_core::config::StallSweepConfig;
use fleet_core::{Agent, Encoded, FleetError, Operation, Resource, ResourceKey, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{bus_failure, Orchestrator};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Volume rows written.
    pub volumes: usize,
    /// Whether the mesh row was written; `false` when the tenant has no mesh.
    pub mesh: bool,
}

impl RefreshReport {
    pub fn written(&self) -> usize {
        self.volumes + usize::from(self.mesh)
    }
}

impl Orchestrator {
    async fn report_request<R>(&self, agent: &Agent, op: &Operation, encoded: Encoded) -> Result<R>
    where
        R: Reply + serde::de::DeserializeOwned + Default,
    {
        let timeout = self.timeouts.for_class(encoded.latency);
        debug!(agent_id = %agent.id, subject = %encoded.subject, "requesting report");
        let payload = self
            .transport
            .request(&encoded.subject, Bytes::from(encoded.payload), timeout)
            .await
            .map_err(|e| {
                warn!(
                    agent_id = %agent.id,
                    action = %op.action,
                    error = %e,
                    "report request failed"
                );
                bus_failure(&agent.id, op.action, &e)
            })?;
        let reply: R = decode_reply(&payload)?;
        if let Some(message) = reply.remote_error() {
            return Err(FleetError::Remote {
                agent_id: agent.id.clone(),
                message: message.to_string(),
            });
        }
        Ok(reply)
    }

    /// Overwrite every volume row with the agent's report. Returns the number
    /// of rows written.
    ///
    /// Rows for volumes missing from the report are kept: a removable drive
    /// that is unplugged comes back with its console-held passphrase.
    pub async fn refresh_volumes(&self, agent_id: &str) -> Result<usize> {
        let agent = self.resolve_agent(agent_id).await?;
        let op = Operation::volume_status(&agent.id);
        let encoded = op.encode()?;
        let reply: VolumeReply = self.report_request(&agent, &op, encoded).await?;

        let id = agent.id.clone();
        let written = self
            .store(move |db| {
                let mut written = 0;
                for report in reply.volumes {
                    let key = ResourceKey::Volume(report.volume.clone());
                    let held = db
                        .get_resource(&id, &key)?
                        .and_then(|r| r.volume_state().and_then(|v| v.passphrase.clone()));
                    let drive = report.volume.clone();
                    db.put_resource(&Resource::volume(id.clone(), drive, report.into_state(held)))?;
                    written += 1;
                }
                Ok(written)
            })
            .await?;
        info!(agent_id, volumes = written, "volumes refreshed");
        Ok(written)
    }

    /// Overwrite the mesh row with the agent's peer status.
    pub async fn refresh_mesh(&self, agent_id: &str) -> Result<Resource> {
        let agent = self.resolve_agent(agent_id).await?;
        let settings = self.mesh_settings(&agent.tenant).await?;
        let op = Operation::mesh(
            &agent.id,
            fleet_core::MeshAction::Refresh,
            settings.as_ref(),
            None,
            None,
        )?;
        let encoded = op.encode()?;
        let reply: MeshReply = self.report_request(&agent, &op, encoded).await?;

        let row = Resource::mesh(agent.id.clone(), reply.into_state());
        let stored = row.clone();
        self.store(move |db| db.put_resource(&stored)).await?;
        info!(agent_id, "mesh peer refreshed");
        Ok(row)
    }

    /// Refresh volumes, then the mesh peer if the tenant has mesh settings.
    pub async fn refresh(&self, agent_id: &str) -> Result<RefreshReport> {
        let agent = self.resolve_agent(agent_id).await?;
        let volumes = self.refresh_volumes(&agent.id).await?;

        let settings = self.mesh_settings(&agent.tenant).await?;
        let mesh = if check_mesh_settings(settings.as_ref()).is_ok() {
            self.refresh_mesh(&agent.id).await?;
            true
        } else {
            debug!(agent_id, tenant = %agent.tenant, "no mesh settings; mesh refresh skipped");
            false
        };
        Ok(RefreshReport { volumes, mesh })
    }

    /// Demote every `Pending` operation older than `max_age` to `Stalled`.
    pub async fn sweep_stalled(&self, max_age: Duration) -> Result<u32> {
        let demoted = self.store(move |db| db.demote_aged(max_age)).await?;
        if demoted > 0 {
            warn!(demoted, max_age_secs = max_age.as_secs(), "aged operations marked stalled");
        }
        Ok(demoted)
    }

    /// Run [`Self::sweep_stalled`] periodically when enabled.
    pub fn spawn_stall_sweep(
        self: &Arc<Self>,
        config: &StallSweepConfig,
    ) -> Option<JoinHandle<()>> {
        if !config.enabled || config.interval_secs == 0 {
            return None;
        }
        let orchestrator = Arc::clone(self);
        let interval = Duration::from_secs(config.interval_secs);
        let max_age = Duration::from_secs(config.max_age_secs);
        info!(
            interval_secs = config.interval_secs,
            max_age_secs = config.max_age_secs,
            "stall sweep enabled"
        );
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = orchestrator.sweep_stalled(max_age).await {
                    warn!(error = %e, "stall sweep failed");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_counts_mesh_once() {
        let report = RefreshReport {
            volumes: 2,
            mesh: true,
        };
        assert_eq!(report.written(), 3);
        assert_eq!(RefreshReport::default().written(), 0);
    }
}
