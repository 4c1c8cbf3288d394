//! Disk-encryption operations on one volume.

use fleet_core::command::{apply_volume_reply, Parameters, VolumeReply};
use fleet_core::{FleetError, Operation, Resource, ResourceKey, ResourceState, Result, VolumeAction};

use super::Orchestrator;

impl Orchestrator {
    /// Run any per-volume action. `passphrase` is read only by the actions
    /// that take one.
    pub async fn volume_action(
        &self,
        agent_id: &str,
        drive: &str,
        action: VolumeAction,
        passphrase: Option<&str>,
    ) -> Result<Resource> {
        if action == VolumeAction::Status {
            return Err(FleetError::validation(
                "status is reported through refresh, not sent per volume",
            ));
        }
        let agent = self.resolve_agent(agent_id).await?;
        let key = ResourceKey::Volume(drive.to_string());
        let resource = self.load_resource(&agent.id, &key).await?;
        let volume = resource.volume_state().ok_or_else(|| {
            FleetError::validation(format!("{key} is not a volume"))
        })?;

        let op = Operation::volume(&agent.id, drive, volume, action, passphrase)?;
        let Parameters::Volume(request) = op.params.clone() else {
            return Err(FleetError::validation("volume operation without volume parameters"));
        };

        self.execute(op, move |state, reply: VolumeReply| {
            if let ResourceState::Volume(volume) = state {
                apply_volume_reply(volume, &request, &reply);
            }
        })
        .await
    }

    pub async fn encrypt(
        &self,
        agent_id: &str,
        drive: &str,
        passphrase: Option<&str>,
    ) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::Encrypt, passphrase)
            .await
    }

    pub async fn decrypt(&self, agent_id: &str, drive: &str) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::Decrypt, None)
            .await
    }

    pub async fn resume_protection(&self, agent_id: &str, drive: &str) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::ResumeProtection, None)
            .await
    }

    pub async fn suspend_protection(&self, agent_id: &str, drive: &str) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::SuspendProtection, None)
            .await
    }

    pub async fn enable_auto_unlock(&self, agent_id: &str, drive: &str) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::EnableAutoUnlock, None)
            .await
    }

    pub async fn disable_auto_unlock(&self, agent_id: &str, drive: &str) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::DisableAutoUnlock, None)
            .await
    }

    pub async fn change_passphrase(
        &self,
        agent_id: &str,
        drive: &str,
        passphrase: &str,
    ) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::ChangePassphrase, Some(passphrase))
            .await
    }

    pub async fn add_passphrase(
        &self,
        agent_id: &str,
        drive: &str,
        passphrase: &str,
    ) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::AddPassphrase, Some(passphrase))
            .await
    }

    pub async fn delete_passphrase(&self, agent_id: &str, drive: &str) -> Result<Resource> {
        self.volume_action(agent_id, drive, VolumeAction::DeletePassphrase, None)
            .await
    }

    pub async fn unlock_with_passphrase(
        &self,
        agent_id: &str,
        drive: &str,
        passphrase: &str,
    ) -> Result<Resource> {
        self.volume_action(
            agent_id,
            drive,
            VolumeAction::UnlockWithPassphrase,
            Some(passphrase),
        )
        .await
    }
}
