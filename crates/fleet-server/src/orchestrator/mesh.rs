//! Mesh-network peer lifecycle on one agent.

use fleet_core::command::{check_mesh_settings, MeshReply, MeshRequest, Parameters};
use fleet_core::types::PeerState;
use fleet_core::{
    Action, FleetError, MeshAction, Operation, Resource, ResourceKey, ResourceState, Result,
};
use tracing::{info, warn};

use super::Orchestrator;

impl Orchestrator {
    /// Run any mesh action. `profile` is read only by switch-profile.
    pub async fn mesh_action(
        &self,
        agent_id: &str,
        action: MeshAction,
        profile: Option<&str>,
    ) -> Result<Resource> {
        match action {
            MeshAction::Refresh => return self.refresh_mesh(agent_id).await,
            MeshAction::Register => return self.mesh_register(agent_id).await,
            _ => {}
        }

        let agent = self.resolve_agent(agent_id).await?;
        let settings = self.mesh_settings(&agent.tenant).await?;
        let op = Operation::mesh(&agent.id, action, settings.as_ref(), None, profile)?;
        if action == MeshAction::Install {
            // The peer does not exist on the agent before install.
            let id = agent.id.clone();
            let created = self
                .store(move |db| db.ensure_resource(&Resource::mesh(id, PeerState::default())))
                .await?;
            if created {
                info!(agent_id = %agent.id, "mesh resource created for install");
            }
        }
        self.load_resource(&agent.id, &ResourceKey::Mesh).await?;
        self.execute_mesh(op, action).await
    }

    pub async fn mesh_install(&self, agent_id: &str) -> Result<Resource> {
        self.mesh_action(agent_id, MeshAction::Install, None).await
    }

    /// Register the peer with the management server using a freshly issued
    /// one-off setup key.
    pub async fn mesh_register(&self, agent_id: &str) -> Result<Resource> {
        let agent = self.resolve_agent(agent_id).await?;
        let settings = self.mesh_settings(&agent.tenant).await?;
        let settings = check_mesh_settings(settings.as_ref())?.clone();
        if settings.management_url.trim().is_empty() {
            return Err(FleetError::validation(
                "mesh management URL is not configured for this tenant",
            ));
        }
        let key = ResourceKey::Mesh;
        self.load_resource(&agent.id, &key).await?;

        let action = Action::Mesh(MeshAction::Register);
        self.begin(&agent.id, &key, action).await?;

        let name = format!("fleet-{}", agent.id);
        let setup_key = match self.keys.issue_one_off_key(&settings, &name).await {
            Ok(k) => k,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "could not obtain a setup key");
                self.release(&agent.id, &key).await?;
                return Err(e);
            }
        };
        let op = match Operation::mesh(
            &agent.id,
            MeshAction::Register,
            Some(&settings),
            Some(&setup_key),
            None,
        ) {
            Ok(op) => op,
            Err(e) => {
                self.release(&agent.id, &key).await?;
                return Err(e);
            }
        };

        let request = mesh_request(&op)?;
        self.dispatch(op, move |state, reply: MeshReply| {
            if let ResourceState::Mesh(peer) = state {
                apply_mesh_reply(peer, MeshAction::Register, &request, reply);
            }
        })
        .await
    }

    pub async fn mesh_connect(&self, agent_id: &str) -> Result<Resource> {
        self.mesh_action(agent_id, MeshAction::Connect, None).await
    }

    pub async fn mesh_disconnect(&self, agent_id: &str) -> Result<Resource> {
        self.mesh_action(agent_id, MeshAction::Disconnect, None).await
    }

    pub async fn mesh_switch_profile(&self, agent_id: &str, profile: &str) -> Result<Resource> {
        self.mesh_action(agent_id, MeshAction::SwitchProfile, Some(profile))
            .await
    }

    pub async fn mesh_delete_peer(&self, agent_id: &str) -> Result<Resource> {
        self.mesh_action(agent_id, MeshAction::DeletePeer, None)
            .await
    }

    async fn execute_mesh(&self, op: Operation, action: MeshAction) -> Result<Resource> {
        let request = mesh_request(&op)?;
        self.execute(op, move |state, reply: MeshReply| {
            if let ResourceState::Mesh(peer) = state {
                apply_mesh_reply(peer, action, &request, reply);
            }
        })
        .await
    }
}

fn mesh_request(op: &Operation) -> Result<MeshRequest> {
    match &op.params {
        Parameters::Mesh(r) => Ok(r.clone()),
        _ => Err(FleetError::validation("mesh operation without mesh parameters")),
    }
}

/// Fold a mesh reply into the stored peer.
///
/// Agents normally answer with their full peer status, which replaces the
/// stored one. A bare acknowledgement falls back to the action's expected
/// effect.
fn apply_mesh_reply(
    peer: &mut PeerState,
    action: MeshAction,
    request: &MeshRequest,
    reply: MeshReply,
) {
    if reply != MeshReply::default() {
        *peer = reply.into_state();
        return;
    }
    match action {
        MeshAction::Install => {
            peer.installed = true;
            if request.management_url.is_some() {
                peer.management_url = request.management_url.clone();
            }
        }
        MeshAction::Register => {
            peer.installed = true;
            peer.connected = true;
            peer.management_url = request.management_url.clone();
        }
        MeshAction::Connect => peer.connected = true,
        MeshAction::Disconnect => peer.connected = false,
        MeshAction::SwitchProfile => {
            if let Some(profile) = &request.profile {
                if !peer.profiles.contains(profile) {
                    peer.profiles.push(profile.clone());
                }
                peer.profile = Some(profile.clone());
            }
        }
        MeshAction::DeletePeer => *peer = PeerState::default(),
        MeshAction::Refresh => {}
    }
}
