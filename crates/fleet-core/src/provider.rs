//! Read-side seams onto the inventory and tenant-settings subsystems.

use std::collections::HashMap;

use crate::error::Result;
use crate::store::ResourceDb;
use crate::types::{Agent, AgentStatus, MeshSettings};

/// Agent lookup and the one inventory write the orchestrator performs.
pub trait Inventory: Send + Sync {
    fn agent(&self, agent_id: &str) -> Result<Option<Agent>>;

    fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent>;
}

/// Per-tenant credentials used when building mesh requests.
pub trait SettingsProvider: Send + Sync {
    fn mesh_settings(&self, tenant: &str) -> Result<Option<MeshSettings>>;
}

impl Inventory for ResourceDb {
    fn agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.get_agent(agent_id)
    }

    fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent> {
        self.set_agent_status(agent_id, status)
    }
}

impl SettingsProvider for ResourceDb {
    fn mesh_settings(&self, tenant: &str) -> Result<Option<MeshSettings>> {
        self.get_mesh_settings(tenant)
    }
}

/// Fixed settings keyed by tenant.
impl SettingsProvider for HashMap<String, MeshSettings> {
    fn mesh_settings(&self, tenant: &str) -> Result<Option<MeshSettings>> {
        Ok(self.get(tenant).cloned())
    }
}
