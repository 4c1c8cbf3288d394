//! Software package deployment.
//!
//! Deployment may span a reboot of the agent, so the command is published
//! without waiting. The guard stays `Pending` until the agent reports the
//! outcome on `agent.package.result.<agent_id>`.

use std::sync::Arc;

use bytes::Bytes;
use fleet_bus::subject;
use fleet_core::action::PACKAGE_RESULT_WILDCARD;
use fleet_core::command::{PackageResult, PackageSpec, Reply};
use fleet_core::types::PackageState;
use fleet_core::{
    Action, FleetError, Operation, PackageAction, Resource, ResourceKey, ResourceState, Result,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Orchestrator;

impl Orchestrator {
    /// Publish an install, update or uninstall. Returns the resource with
    /// its operation still `Pending`.
    pub async fn deploy_package(
        &self,
        agent_id: &str,
        action: PackageAction,
        spec: &PackageSpec,
    ) -> Result<Resource> {
        let agent = self.resolve_agent(agent_id).await?;
        let op = Operation::package(&agent.id, action, spec)?;
        let key = super::target(&op)?;

        let row = Resource::new(
            agent.id.clone(),
            key.clone(),
            ResourceState::Package(PackageState {
                name: spec.package_name.trim().to_string(),
                repository: spec.repository.trim().to_string(),
                installed: false,
                last_action: None,
            }),
        );
        self.store(move |db| db.ensure_resource(&row)).await?;
        self.begin(&agent.id, &key, op.action).await?;

        let encoded = match op.encode() {
            Ok(e) => e,
            Err(e) => {
                self.record_error(&agent.id, &key, &e.to_string()).await?;
                return Err(e);
            }
        };
        let op_id = Uuid::new_v4();
        info!(
            %op_id,
            agent_id = %agent.id,
            resource = %key,
            action = %op.action,
            subject = %encoded.subject,
            "publishing package command"
        );
        if let Err(err) = self
            .transport
            .publish(&encoded.subject, Bytes::from(encoded.payload))
            .await
        {
            warn!(%op_id, agent_id = %agent.id, resource = %key, error = %err, "publish failed");
            return Err(self.settle_failure(&agent.id, &key, op.action, err).await);
        }

        self.load_resource(&agent.id, &key).await
    }

    /// Apply one completion report from an agent.
    ///
    /// A report is applied only while the row is `Pending` or `Stalled` on
    /// the same package action; anything else is stale or unsolicited and
    /// is rejected with `Conflict`, leaving the row untouched.
    pub async fn handle_package_result(&self, result: PackageResult) -> Result<Resource> {
        let key = ResourceKey::Package(result.package_id.clone());
        let agent_id = result.agent_id.clone();
        let reported = Action::Package(result.action);
        let (a, k) = (agent_id.clone(), key.clone());

        let resource = self
            .store(move |db| {
                let mut resource = db.get_resource(&a, &k)?.ok_or_else(|| {
                    FleetError::ResourceNotFound {
                        agent_id: a.clone(),
                        resource: k.to_string(),
                    }
                })?;
                if resource.operation.in_progress() != Some(reported) {
                    return Ok(Err(resource.operation.in_progress()));
                }
                if let Some(message) = result.remote_error() {
                    db.save_error(&a, &k, message)?;
                    resource.last_error = Some(message.to_string());
                } else {
                    if let ResourceState::Package(pkg) = &mut resource.state {
                        pkg.installed = result.action != PackageAction::Uninstall;
                        pkg.last_action = Some(result.action);
                    }
                    db.save_result(&a, &k, resource.state.clone())?;
                    resource.last_error = None;
                }
                resource.operation = Default::default();
                Ok(Ok(resource))
            })
            .await?;

        let resource = match resource {
            Ok(r) => r,
            Err(in_progress) => {
                let current = in_progress.map_or_else(|| "idle".to_string(), |a| a.to_string());
                warn!(
                    %agent_id,
                    resource = %key,
                    %reported,
                    in_progress = %current,
                    "package result does not match the pending operation; dropped"
                );
                return Err(FleetError::Conflict {
                    agent_id,
                    resource: key.to_string(),
                    action: current,
                });
            }
        };

        match &resource.last_error {
            Some(e) => {
                warn!(%agent_id, resource = %key, error = %e, "package action failed on agent")
            }
            None => info!(%agent_id, resource = %key, "package action confirmed"),
        }
        Ok(resource)
    }

    /// Subscribe to package completion reports and apply each as it arrives.
    pub async fn spawn_package_listener(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut inbox = self
            .transport
            .subscribe(PACKAGE_RESULT_WILDCARD)
            .await
            .map_err(|e| FleetError::Transport(e.to_string()))?;
        let orchestrator = Arc::clone(self);

        Ok(tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let result: PackageResult = match serde_json::from_slice(&message.payload) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(subject = %message.subject, error = %e, "unreadable package result");
                        continue;
                    }
                };
                if subject::agent_id(&message.subject) != Some(result.agent_id.as_str()) {
                    warn!(
                        subject = %message.subject,
                        agent_id = %result.agent_id,
                        "package result subject does not match its agent"
                    );
                    continue;
                }
                if let Err(e) = orchestrator.handle_package_result(result).await {
                    warn!(subject = %message.subject, error = %e, "could not apply package result");
                }
            }
            debug!("package result subscription closed");
        }))
    }
}
