//! System-of-record storage for agents, resources and tenant settings, using redb.
//!
//! # Table design
//!
//! `RESOURCES` is keyed by `"<agent_id>/<resource_key>"`:
//! ```text
//! 3f0c…a1/volume:C:
//! 3f0c…a1/mesh
//! 3f0c…a1/package:Mozilla.Firefox
//! ```
//! All rows of one agent are therefore contiguous and a single range scan
//! `"<agent_id>/".."<agent_id>0"` lists them (`'0'` is the byte after `'/'`).
//!
//! Values are JSON. Every mutation of a resource happens inside one write
//! transaction; redb admits a single writer at a time, which is what makes
//! [`ResourceDb::try_begin_operation`] an atomic conditional update.

use std::{path::Path, time::Duration};

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};

use crate::action::Action;
use crate::error::{FleetError, Result};
use crate::types::{
    Agent, AgentStatus, MeshSettings, OperationState, Resource, ResourceKey, ResourceState,
};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");
const AGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");
const MESH_SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("mesh_settings");

fn resource_key(agent_id: &str, key: &ResourceKey) -> String {
    format!("{agent_id}/{key}")
}

fn store_err(e: impl std::fmt::Display) -> FleetError {
    FleetError::Store(e.to_string())
}

fn not_found(agent_id: &str, key: &ResourceKey) -> FleetError {
    FleetError::ResourceNotFound {
        agent_id: agent_id.to_string(),
        resource: key.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ResourceDb
// ---------------------------------------------------------------------------

pub struct ResourceDb {
    db: Database,
}

impl ResourceDb {
    /// Open or create the redb database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(RESOURCES).map_err(store_err)?;
        wt.open_table(AGENTS).map_err(store_err)?;
        wt.open_table(MESH_SETTINGS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub fn put_agent(&self, agent: &Agent) -> Result<()> {
        let value = serde_json::to_vec(agent)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(AGENTS).map_err(store_err)?;
            table
                .insert(agent.id.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(AGENTS).map_err(store_err)?;
        match table.get(agent_id).map_err(store_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(AGENTS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    pub fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let agent = {
            let mut table = wt.open_table(AGENTS).map_err(store_err)?;
            let mut agent: Agent = match table.get(agent_id).map_err(store_err)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(FleetError::AgentNotFound(agent_id.to_string())),
            };
            agent.status = status;
            let value = serde_json::to_vec(&agent)?;
            table.insert(agent_id, value.as_slice()).map_err(store_err)?;
            agent
        };
        wt.commit().map_err(store_err)?;
        Ok(agent)
    }

    // -----------------------------------------------------------------------
    // Tenant settings
    // -----------------------------------------------------------------------

    pub fn put_mesh_settings(&self, tenant: &str, settings: &MeshSettings) -> Result<()> {
        let value = serde_json::to_vec(settings)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(MESH_SETTINGS).map_err(store_err)?;
            table.insert(tenant, value.as_slice()).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get_mesh_settings(&self, tenant: &str) -> Result<Option<MeshSettings>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(MESH_SETTINGS).map_err(store_err)?;
        match table.get(tenant).map_err(store_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    /// Insert or overwrite a resource row unconditionally.
    pub fn put_resource(&self, resource: &Resource) -> Result<()> {
        let key = resource_key(&resource.agent_id, &resource.key);
        let value = serde_json::to_vec(resource)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(RESOURCES).map_err(store_err)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Insert `resource` unless a row already exists under its key.
    ///
    /// Returns `true` when the row was created. An existing row, including
    /// its operation marker, is never touched.
    pub fn ensure_resource(&self, resource: &Resource) -> Result<bool> {
        let key = resource_key(&resource.agent_id, &resource.key);
        let wt = self.db.begin_write().map_err(store_err)?;
        let created = {
            let mut table = wt.open_table(RESOURCES).map_err(store_err)?;
            let exists = table.get(key.as_str()).map_err(store_err)?.is_some();
            if !exists {
                let value = serde_json::to_vec(resource)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(store_err)?;
            }
            !exists
        };
        wt.commit().map_err(store_err)?;
        Ok(created)
    }

    pub fn get_resource(&self, agent_id: &str, key: &ResourceKey) -> Result<Option<Resource>> {
        Ok(match self.get_raw(agent_id, key)? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        })
    }

    /// The stored bytes of one resource row.
    pub fn get_raw(&self, agent_id: &str, key: &ResourceKey) -> Result<Option<Vec<u8>>> {
        let k = resource_key(agent_id, key);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(RESOURCES).map_err(store_err)?;
        let value = table
            .get(k.as_str())
            .map_err(store_err)?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    /// All resources of one agent, in key order.
    pub fn list_resources(&self, agent_id: &str) -> Result<Vec<Resource>> {
        let start = format!("{agent_id}/");
        let end = format!("{agent_id}0");
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(RESOURCES).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(store_err)?
        {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Every resource that is not `Idle`.
    pub fn list_busy(&self) -> Result<Vec<Resource>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(RESOURCES).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let resource: Resource = serde_json::from_slice(v.value())?;
            if !resource.operation.is_idle() {
                result.push(resource);
            }
        }
        Ok(result)
    }

    /// Read-modify-write one resource inside a single write transaction.
    ///
    /// The row is rewritten only when `f` actually changed it.
    fn update_resource<T>(
        &self,
        agent_id: &str,
        key: &ResourceKey,
        f: impl FnOnce(&mut Resource) -> T,
    ) -> Result<T> {
        let k = resource_key(agent_id, key);
        let wt = self.db.begin_write().map_err(store_err)?;
        let out = {
            let mut table = wt.open_table(RESOURCES).map_err(store_err)?;
            let before = match table.get(k.as_str()).map_err(store_err)? {
                Some(v) => v.value().to_vec(),
                None => return Err(not_found(agent_id, key)),
            };
            let mut resource: Resource = serde_json::from_slice(&before)?;
            let out = f(&mut resource);
            let after = serde_json::to_vec(&resource)?;
            if after != before {
                table
                    .insert(k.as_str(), after.as_slice())
                    .map_err(store_err)?;
            }
            out
        };
        wt.commit().map_err(store_err)?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Operation guard
    // -----------------------------------------------------------------------

    /// Mark `action` in progress if, and only if, nothing else is.
    ///
    /// Returns `false` when another operation holds the resource; in that
    /// case nothing is written.
    pub fn try_begin_operation(
        &self,
        agent_id: &str,
        key: &ResourceKey,
        action: Action,
    ) -> Result<bool> {
        self.update_resource(agent_id, key, |r| {
            if !r.operation.is_idle() {
                return false;
            }
            r.operation = OperationState::Pending {
                action,
                started_at: Utc::now(),
            };
            true
        })
    }

    /// Overwrite the operation state, returning the previous one.
    pub fn save_operation_state(
        &self,
        agent_id: &str,
        key: &ResourceKey,
        state: OperationState,
    ) -> Result<OperationState> {
        self.update_resource(agent_id, key, |r| std::mem::replace(&mut r.operation, state))
    }

    /// Return a resource to `Idle` after a send that certainly did not reach the agent.
    pub fn release_operation(&self, agent_id: &str, key: &ResourceKey) -> Result<()> {
        self.save_operation_state(agent_id, key, OperationState::Idle)?;
        Ok(())
    }

    /// Demote a `Pending` operation to `Stalled`. Other states are left alone.
    pub fn mark_stalled(&self, agent_id: &str, key: &ResourceKey, reason: &str) -> Result<()> {
        self.update_resource(agent_id, key, |r| {
            if let OperationState::Pending { action, started_at } = r.operation {
                r.operation = OperationState::Stalled {
                    action,
                    started_at,
                    reason: reason.to_string(),
                };
            }
        })
    }

    /// Persist the domain result of a completed operation and clear the guard.
    pub fn save_result(
        &self,
        agent_id: &str,
        key: &ResourceKey,
        state: ResourceState,
    ) -> Result<()> {
        self.update_resource(agent_id, key, |r| {
            r.state = state;
            r.operation = OperationState::Idle;
            r.last_error = None;
        })
    }

    /// Clear the guard and leave an error annotation for the next page load.
    pub fn save_error(&self, agent_id: &str, key: &ResourceKey, message: &str) -> Result<()> {
        self.update_resource(agent_id, key, |r| {
            r.operation = OperationState::Idle;
            r.last_error = Some(message.to_string());
        })
    }

    /// Operator escape hatch: reset the operation state unconditionally.
    pub fn clear_operation(&self, agent_id: &str, key: &ResourceKey) -> Result<OperationState> {
        self.save_operation_state(agent_id, key, OperationState::Idle)
    }

    /// Demote every `Pending` operation older than `max_age` to `Stalled`.
    ///
    /// Returns the number of resources demoted.
    pub fn demote_aged(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).map_err(store_err)?;
        let reason = format!("no reply after {}s", max_age.as_secs());

        let wt = self.db.begin_write().map_err(store_err)?;
        let count = {
            let mut table = wt.open_table(RESOURCES).map_err(store_err)?;
            let mut aged = Vec::new();
            for entry in table.iter().map_err(store_err)? {
                let (k, v) = entry.map_err(store_err)?;
                let resource: Resource = serde_json::from_slice(v.value())?;
                if let OperationState::Pending { started_at, .. } = resource.operation {
                    if started_at < cutoff {
                        aged.push((k.value().to_string(), resource));
                    }
                }
            }
            let count = aged.len() as u32;
            for (k, mut resource) in aged {
                if let OperationState::Pending { action, started_at } = resource.operation {
                    resource.operation = OperationState::Stalled {
                        action,
                        started_at,
                        reason: reason.clone(),
                    };
                }
                let value = serde_json::to_vec(&resource)?;
                table.insert(k.as_str(), value.as_slice()).map_err(store_err)?;
            }
            count
        };
        wt.commit().map_err(store_err)?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{MeshAction, VolumeAction};
    use crate::types::{PeerState, VolumeState, VolumeType};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, ResourceDb) {
        let dir = TempDir::new().unwrap();
        let db = ResourceDb::open(&dir.path().join("test.redb")).unwrap();
        (dir, db)
    }

    fn drive(d: &str) -> ResourceKey {
        ResourceKey::Volume(d.into())
    }

    const ENCRYPT: Action = Action::Volume(VolumeAction::Encrypt);
    const DECRYPT: Action = Action::Volume(VolumeAction::Decrypt);

    fn seed_volume(db: &ResourceDb, agent: &str, d: &str) {
        db.put_resource(&Resource::volume(agent, d, VolumeState::new(VolumeType::Fixed)))
            .unwrap();
    }

    #[test]
    fn begin_then_conflict() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");

        assert!(db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap());
        assert!(!db.try_begin_operation("A1", &drive("D:"), DECRYPT).unwrap());

        let r = db.get_resource("A1", &drive("D:")).unwrap().unwrap();
        assert_eq!(r.operation.in_progress(), Some(ENCRYPT));
    }

    #[test]
    fn conflict_writes_nothing() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");
        db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap();
        let before = db.get_raw("A1", &drive("D:")).unwrap();
        db.try_begin_operation("A1", &drive("D:"), DECRYPT).unwrap();
        assert_eq!(db.get_raw("A1", &drive("D:")).unwrap(), before);
    }

    #[test]
    fn begin_on_missing_resource_is_not_found() {
        let (_dir, db) = open_tmp();
        let err = db
            .try_begin_operation("A1", &drive("Z:"), ENCRYPT)
            .unwrap_err();
        assert!(matches!(err, FleetError::ResourceNotFound { .. }));
    }

    #[test]
    fn concurrent_begins_admit_exactly_one() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");
        let db = Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    db.try_begin_operation("A1", &ResourceKey::Volume("D:".into()), ENCRYPT)
                        .unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn stalled_blocks_until_cleared() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");
        db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap();
        db.mark_stalled("A1", &drive("D:"), "timed out").unwrap();

        let r = db.get_resource("A1", &drive("D:")).unwrap().unwrap();
        assert!(matches!(
            r.operation,
            OperationState::Stalled { ref reason, .. } if reason == "timed out"
        ));
        assert!(!db.try_begin_operation("A1", &drive("D:"), DECRYPT).unwrap());

        let previous = db.clear_operation("A1", &drive("D:")).unwrap();
        assert_eq!(previous.in_progress(), Some(ENCRYPT));
        assert!(db.try_begin_operation("A1", &drive("D:"), DECRYPT).unwrap());
    }

    #[test]
    fn mark_stalled_ignores_idle() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");
        db.mark_stalled("A1", &drive("D:"), "late").unwrap();
        let r = db.get_resource("A1", &drive("D:")).unwrap().unwrap();
        assert!(r.operation.is_idle());
    }

    #[test]
    fn save_result_clears_guard_and_error() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");
        db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap();
        db.save_error("A1", &drive("D:"), "boom").unwrap();
        db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap();

        let mut state = VolumeState::new(VolumeType::Fixed);
        state.passphrase = Some("Secr3tPass!".into());
        db.save_result("A1", &drive("D:"), ResourceState::Volume(state.clone()))
            .unwrap();

        let r = db.get_resource("A1", &drive("D:")).unwrap().unwrap();
        assert!(r.operation.is_idle());
        assert!(r.last_error.is_none());
        assert_eq!(r.volume_state(), Some(&state));
    }

    #[test]
    fn ensure_resource_keeps_existing_row() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "D:");
        db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap();

        let fresh = Resource::volume("A1", "D:", VolumeState::new(VolumeType::Fixed));
        assert!(!db.ensure_resource(&fresh).unwrap());
        let r = db.get_resource("A1", &drive("D:")).unwrap().unwrap();
        assert_eq!(r.operation.in_progress(), Some(ENCRYPT));

        let mesh = Resource::mesh("A1", PeerState::default());
        assert!(db.ensure_resource(&mesh).unwrap());
        assert!(db.get_resource("A1", &ResourceKey::Mesh).unwrap().is_some());
    }

    #[test]
    fn list_resources_is_scoped_to_agent() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "C:");
        seed_volume(&db, "A1", "D:");
        seed_volume(&db, "A10", "C:");
        db.put_resource(&Resource::mesh("A1", PeerState::default()))
            .unwrap();

        let a1 = db.list_resources("A1").unwrap();
        assert_eq!(a1.len(), 3);
        assert!(a1.iter().all(|r| r.agent_id == "A1"));
        assert_eq!(db.list_resources("A10").unwrap().len(), 1);
    }

    #[test]
    fn demote_aged_only_touches_old_pending() {
        let (_dir, db) = open_tmp();
        seed_volume(&db, "A1", "C:");
        seed_volume(&db, "A1", "D:");
        db.put_resource(&Resource::mesh("A1", PeerState::default()))
            .unwrap();

        db.save_operation_state(
            "A1",
            &drive("C:"),
            OperationState::Pending {
                action: ENCRYPT,
                started_at: Utc::now() - chrono::Duration::minutes(30),
            },
        )
        .unwrap();
        db.try_begin_operation("A1", &drive("D:"), ENCRYPT).unwrap();
        db.try_begin_operation("A1", &ResourceKey::Mesh, Action::Mesh(MeshAction::Connect))
            .unwrap();

        let n = db.demote_aged(Duration::from_secs(600)).unwrap();
        assert_eq!(n, 1);

        let c = db.get_resource("A1", &drive("C:")).unwrap().unwrap();
        assert!(matches!(c.operation, OperationState::Stalled { .. }));
        let d = db.get_resource("A1", &drive("D:")).unwrap().unwrap();
        assert!(matches!(d.operation, OperationState::Pending { .. }));
        assert_eq!(db.list_busy().unwrap().len(), 3);
    }

    #[test]
    fn demote_aged_on_empty_db_returns_zero() {
        let (_dir, db) = open_tmp();
        assert_eq!(db.demote_aged(Duration::from_secs(60)).unwrap(), 0);
    }

    #[test]
    fn agent_status_update() {
        let (_dir, db) = open_tmp();
        db.put_agent(&Agent::new("A1", "default", "10.0.0.5")).unwrap();
        let agent = db.set_agent_status("A1", AgentStatus::Enabled).unwrap();
        assert_eq!(agent.status, AgentStatus::Enabled);
        assert_eq!(
            db.get_agent("A1").unwrap().unwrap().status,
            AgentStatus::Enabled
        );
        assert!(matches!(
            db.set_agent_status("nope", AgentStatus::Enabled),
            Err(FleetError::AgentNotFound(_))
        ));
    }

    #[test]
    fn mesh_settings_round_trip() {
        let (_dir, db) = open_tmp();
        assert!(db.get_mesh_settings("acme").unwrap().is_none());
        let s = MeshSettings {
            management_url: "https://mesh.acme.io".into(),
            access_token: "nbp_x".into(),
        };
        db.put_mesh_settings("acme", &s).unwrap();
        assert_eq!(db.get_mesh_settings("acme").unwrap(), Some(s));
    }
}
