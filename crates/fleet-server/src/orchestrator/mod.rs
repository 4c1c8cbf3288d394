//! Remote operation orchestration.
//!
//! Every guarded entrypoint follows the same sequence:
//!
//! 1. resolve the agent through the inventory;
//! 2. load the resource and check the action's preconditions;
//! 3. take the per-resource guard (`Idle → Pending`);
//! 4. encode and send with the action's latency-class timeout;
//! 5. settle the guard according to how the send ended.
//!
//! | send outcome      | resource afterwards                      |
//! |-------------------|------------------------------------------|
//! | reply, no error   | result persisted, `Idle`                 |
//! | agent offline     | `Idle`                                   |
//! | encode / publish  | `Idle` (+ `last_error` for installs)     |
//! | timeout           | `Stalled`                                |
//! | remote error      | `Stalled`                                |
//!
//! Store calls are synchronous redb transactions and run on the blocking
//! pool; the only awaited waits are bus round-trips.

mod agent;
mod mesh;
mod package;
mod reconcile;
mod volume;

pub use agent::RemoteSession;
pub use reconcile::RefreshReport;

use std::sync::Arc;

use bytes::Bytes;
use fleet_bus::{BusError, Transport};
use fleet_core::command::{decode_reply, Reply};
use fleet_core::config::TimeoutConfig;
use fleet_core::types::MeshSettings;
use fleet_core::{
    Action, Agent, AgentStatus, FleetError, Inventory, LatencyClass, Operation, OperationState,
    Resource, ResourceDb, ResourceKey, ResourceState, Result, SettingsProvider,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use crate::mesh_api::{NetbirdApi, SetupKeyIssuer};

pub struct Orchestrator {
    db: Arc<ResourceDb>,
    inventory: Arc<dyn Inventory>,
    settings: Arc<dyn SettingsProvider>,
    transport: Arc<dyn Transport>,
    keys: Arc<dyn SetupKeyIssuer>,
    timeouts: TimeoutConfig,
}

impl Orchestrator {
    /// Inventory and tenant settings default to the tables in `db`.
    pub fn new(db: Arc<ResourceDb>, transport: Arc<dyn Transport>) -> Self {
        Self {
            inventory: db.clone(),
            settings: db.clone(),
            db,
            transport,
            keys: Arc::new(NetbirdApi::new()),
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_key_issuer(mut self, keys: Arc<dyn SetupKeyIssuer>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn db(&self) -> &Arc<ResourceDb> {
        &self.db
    }

    /// Every resource of one agent.
    pub async fn resources(&self, agent_id: &str) -> Result<Vec<Resource>> {
        self.resolve_agent(agent_id).await?;
        let id = agent_id.to_string();
        self.store(move |db| db.list_resources(&id)).await
    }

    /// Operator escape hatch: reset a resource's operation to `Idle`
    /// whatever its state. Returns the state it replaced.
    pub async fn clear_operation(
        &self,
        agent_id: &str,
        key: &ResourceKey,
    ) -> Result<OperationState> {
        let (a, k) = (agent_id.to_string(), key.clone());
        let previous = self.store(move |db| db.clear_operation(&a, &k)).await?;
        match previous.in_progress() {
            Some(action) => {
                info!(agent_id, resource = %key, %action, "operation cleared by operator")
            }
            None => info!(agent_id, resource = %key, "clear requested on idle resource"),
        }
        Ok(previous)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Run a synchronous store call on the blocking pool.
    async fn store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ResourceDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(join_err)?
    }

    async fn resolve_agent(&self, agent_id: &str) -> Result<Agent> {
        let inventory = Arc::clone(&self.inventory);
        let id = agent_id.to_string();
        tokio::task::spawn_blocking(move || inventory.agent(&id))
            .await
            .map_err(join_err)??
            .ok_or_else(|| FleetError::AgentNotFound(agent_id.to_string()))
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent> {
        let inventory = Arc::clone(&self.inventory);
        let id = agent_id.to_string();
        tokio::task::spawn_blocking(move || inventory.set_status(&id, status))
            .await
            .map_err(join_err)?
    }

    async fn mesh_settings(&self, tenant: &str) -> Result<Option<MeshSettings>> {
        let settings = Arc::clone(&self.settings);
        let tenant = tenant.to_string();
        tokio::task::spawn_blocking(move || settings.mesh_settings(&tenant))
            .await
            .map_err(join_err)?
    }

    async fn load_resource(&self, agent_id: &str, key: &ResourceKey) -> Result<Resource> {
        let (a, k) = (agent_id.to_string(), key.clone());
        self.store(move |db| db.get_resource(&a, &k))
            .await?
            .ok_or_else(|| FleetError::ResourceNotFound {
                agent_id: agent_id.to_string(),
                resource: key.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Guard
    // -----------------------------------------------------------------------

    /// Take the guard on `key`, or fail with `Conflict` naming the action
    /// that holds it.
    async fn begin(&self, agent_id: &str, key: &ResourceKey, action: Action) -> Result<()> {
        let (a, k) = (agent_id.to_string(), key.clone());
        let holder = self
            .store(move |db| {
                if db.try_begin_operation(&a, &k, action)? {
                    return Ok(None);
                }
                let current = db
                    .get_resource(&a, &k)?
                    .and_then(|r| r.operation.in_progress());
                Ok(Some(current.unwrap_or(action)))
            })
            .await?;

        match holder {
            None => Ok(()),
            Some(current) => {
                warn!(
                    agent_id,
                    resource = %key,
                    %action,
                    in_progress = %current,
                    "operation rejected: resource busy"
                );
                Err(FleetError::Conflict {
                    agent_id: agent_id.to_string(),
                    resource: key.to_string(),
                    action: current.to_string(),
                })
            }
        }
    }

    async fn release(&self, agent_id: &str, key: &ResourceKey) -> Result<()> {
        let (a, k) = (agent_id.to_string(), key.clone());
        self.store(move |db| db.release_operation(&a, &k)).await
    }

    async fn stall(&self, agent_id: &str, key: &ResourceKey, reason: &str) -> Result<()> {
        let (a, k, r) = (agent_id.to_string(), key.clone(), reason.to_string());
        self.store(move |db| db.mark_stalled(&a, &k, &r)).await
    }

    async fn record_error(&self, agent_id: &str, key: &ResourceKey, message: &str) -> Result<()> {
        let (a, k, m) = (agent_id.to_string(), key.clone(), message.to_string());
        self.store(move |db| db.save_error(&a, &k, &m)).await
    }

    /// Settle the guard after a send that produced no usable reply and
    /// return the error to surface.
    async fn settle_failure(
        &self,
        agent_id: &str,
        key: &ResourceKey,
        action: Action,
        err: BusError,
    ) -> FleetError {
        let failure = bus_failure(agent_id, action, &err);
        let settled = if err.maybe_delivered() {
            self.stall(agent_id, key, &err.to_string()).await
        } else if action.latency() == LatencyClass::Install {
            self.record_error(agent_id, key, &failure.to_string()).await
        } else {
            self.release(agent_id, key).await
        };
        if let Err(e) = settled {
            warn!(
                agent_id,
                resource = %key,
                %action,
                error = %e,
                "could not settle operation state"
            );
        }
        failure
    }

    // -----------------------------------------------------------------------
    // Send
    // -----------------------------------------------------------------------

    /// Guard, send and settle one request/reply operation on a resource.
    async fn execute<R, F>(&self, op: Operation, apply: F) -> Result<Resource>
    where
        R: Reply + DeserializeOwned + Default + Send + 'static,
        F: FnOnce(&mut ResourceState, R) + Send + 'static,
    {
        let key = target(&op)?;
        self.begin(&op.agent_id, &key, op.action).await?;
        self.dispatch(op, apply).await
    }

    /// Send an operation whose guard is already held and settle it.
    async fn dispatch<R, F>(&self, op: Operation, apply: F) -> Result<Resource>
    where
        R: Reply + DeserializeOwned + Default + Send + 'static,
        F: FnOnce(&mut ResourceState, R) + Send + 'static,
    {
        let key = target(&op)?;
        let agent_id = op.agent_id.clone();
        let action = op.action;
        let op_id = Uuid::new_v4();

        let encoded = match op.encode() {
            Ok(e) => e,
            Err(e) => {
                warn!(%op_id, %agent_id, resource = %key, %action, error = %e, "encode failed");
                self.release(&agent_id, &key).await?;
                return Err(e);
            }
        };
        let timeout = self.timeouts.for_class(encoded.latency);
        info!(
            %op_id,
            %agent_id,
            resource = %key,
            %action,
            subject = %encoded.subject,
            timeout_secs = timeout.as_secs(),
            "sending operation"
        );

        let payload = match self
            .transport
            .request(&encoded.subject, Bytes::from(encoded.payload), timeout)
            .await
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    %op_id,
                    %agent_id,
                    resource = %key,
                    %action,
                    error = %err,
                    "operation failed"
                );
                return Err(self.settle_failure(&agent_id, &key, action, err).await);
            }
        };

        let reply: R = match decode_reply(&payload) {
            Ok(r) => r,
            Err(e) => {
                let message = format!("unreadable reply: {e}");
                self.stall(&agent_id, &key, &message).await?;
                return Err(FleetError::Remote { agent_id, message });
            }
        };
        if let Some(message) = reply.remote_error() {
            let message = message.to_string();
            warn!(
                %op_id,
                %agent_id,
                resource = %key,
                %action,
                error = %message,
                "agent reported an error"
            );
            self.stall(&agent_id, &key, &message).await?;
            return Err(FleetError::Remote { agent_id, message });
        }

        let (a, k) = (agent_id.clone(), key.clone());
        let resource = self
            .store(move |db| {
                let mut resource = db.get_resource(&a, &k)?.ok_or_else(|| {
                    FleetError::ResourceNotFound {
                        agent_id: a.clone(),
                        resource: k.to_string(),
                    }
                })?;
                apply(&mut resource.state, reply);
                db.save_result(&a, &k, resource.state.clone())?;
                resource.operation = OperationState::Idle;
                resource.last_error = None;
                Ok(resource)
            })
            .await?;
        info!(%op_id, %agent_id, resource = %key, %action, "operation applied");
        Ok(resource)
    }
}

fn target(op: &Operation) -> Result<ResourceKey> {
    op.resource.clone().ok_or_else(|| {
        FleetError::validation(format!("{} does not target a resource", op.action))
    })
}

fn join_err(e: tokio::task::JoinError) -> FleetError {
    FleetError::Store(format!("task join error: {e}"))
}

/// Map a transport failure onto the error surfaced to the caller.
fn bus_failure(agent_id: &str, action: Action, err: &BusError) -> FleetError {
    match err {
        BusError::NoResponders(_) => FleetError::Offline(agent_id.to_string()),
        BusError::TimedOut { .. } => FleetError::Timeout {
            agent_id: agent_id.to_string(),
            action: action.to_string(),
        },
        other => FleetError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{MeshAction, VolumeAction};
    use std::time::Duration;

    #[test]
    fn no_responders_is_offline() {
        let err = bus_failure(
            "A1",
            Action::Volume(VolumeAction::Encrypt),
            &BusError::NoResponders("agent.bitlocker.A1".into()),
        );
        assert!(matches!(err, FleetError::Offline(ref id) if id == "A1"));
        assert_eq!(err.to_string(), "agent A1 is offline");
    }

    #[test]
    fn timed_out_is_timeout() {
        let err = bus_failure(
            "A1",
            Action::Mesh(MeshAction::Install),
            &BusError::TimedOut {
                subject: "agent.netbird.install.A1".into(),
                after: Duration::from_secs(600),
            },
        );
        assert!(matches!(err, FleetError::Timeout { ref action, .. } if action == "mesh.install"));
    }

    #[test]
    fn connection_loss_is_transport() {
        let err = bus_failure(
            "A1",
            Action::Mesh(MeshAction::Connect),
            &BusError::Connection("closed".into()),
        );
        assert!(matches!(err, FleetError::Transport(_)));
    }
}
