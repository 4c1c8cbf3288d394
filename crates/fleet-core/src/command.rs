//! Operation descriptors and their wire encoding.
//!
//! An [`Operation`] can only be built through the per-domain constructors,
//! each of which checks the action's preconditions first. A descriptor that
//! exists has therefore already passed validation; [`Operation::encode`]
//! turns it into a subject and a JSON payload, and [`Operation::decode`]
//! reverses that the way a remote agent reads it.

use crate::action::{Action, AgentAction, LatencyClass, MeshAction, PackageAction, VolumeAction};
use crate::error::{FleetError, Result};
use crate::types::{
    Agent, AgentStatus, EncryptionStatus, MeshSettings, PeerState, ProtectionStatus, ResourceKey,
    VolumeState, VolumeType,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Passphrase bounds for TPM-protected volumes (everything but fixed data drives).
pub const TPM_PASSPHRASE_LEN: RangeInclusive<usize> = 6..=20;
/// Passphrase bounds for fixed data volumes; BitLocker wants at least 8.
pub const DATA_PASSPHRASE_LEN: RangeInclusive<usize> = 8..=20;

// ---------------------------------------------------------------------------
// Wire requests
// ---------------------------------------------------------------------------

/// Payload of `agent.bitlocker.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    #[serde(rename = "Operation")]
    pub operation: VolumeAction,
    #[serde(rename = "Volume", default)]
    pub volume: String,
    #[serde(rename = "Passphrase", default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(
        rename = "ExternalKeyVolumeKeyProtectorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_key_protector_id: Option<String>,
    #[serde(
        rename = "PassphraseVolumeKeyProtectorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub passphrase_protector_id: Option<String>,
}

/// Payload of `agent.netbird.<verb>.<id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshRequest {
    #[serde(rename = "ManagementURL", default, skip_serializing_if = "Option::is_none")]
    pub management_url: Option<String>,
    #[serde(rename = "OneOffKey", default, skip_serializing_if = "Option::is_none")]
    pub one_off_key: Option<String>,
    #[serde(rename = "Profile", default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Payload of `agent.startvnc.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    #[serde(rename = "PIN")]
    pub pin: String,
    #[serde(rename = "NotifyUser", default)]
    pub notify_user: bool,
}

/// Payload published on `agent.<verb>package.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    #[serde(rename = "AgentId")]
    pub agent_id: String,
    #[serde(rename = "PackageId")]
    pub package_id: String,
    #[serde(rename = "PackageName")]
    pub package_name: String,
    #[serde(rename = "Repository", default)]
    pub repository: String,
    #[serde(rename = "Action")]
    pub action: PackageAction,
}

/// Operator input for a package deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub package_id: String,
    pub package_name: String,
    #[serde(default)]
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameters {
    Empty,
    Volume(VolumeRequest),
    Mesh(MeshRequest),
    Session(SessionRequest),
    Package(PackageRequest),
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub agent_id: String,
    /// `None` for agent-level actions and whole-agent reports.
    pub resource: Option<ResourceKey>,
    pub action: Action,
    pub params: Parameters,
}

/// An operation ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub subject: String,
    pub payload: Vec<u8>,
    pub latency: LatencyClass,
    pub publish_only: bool,
}

impl Operation {
    /// Build a disk-encryption command for `drive`, whose current state is `volume`.
    pub fn volume(
        agent_id: &str,
        drive: &str,
        volume: &VolumeState,
        action: VolumeAction,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        validate_volume(action, volume, passphrase)?;

        let passphrase = match action {
            VolumeAction::Encrypt
            | VolumeAction::ChangePassphrase
            | VolumeAction::AddPassphrase
            | VolumeAction::UnlockWithPassphrase => {
                passphrase.filter(|p| !p.is_empty()).map(str::to_string)
            }
            _ => None,
        };
        let external_key_protector_id = match action {
            VolumeAction::DisableAutoUnlock => volume.external_key_protector_id.clone(),
            _ => None,
        };
        let passphrase_protector_id = match action {
            VolumeAction::ChangePassphrase | VolumeAction::DeletePassphrase => {
                volume.passphrase_protector_id.clone()
            }
            _ => None,
        };

        Ok(Self {
            agent_id: agent_id.to_string(),
            resource: Some(ResourceKey::Volume(drive.to_string())),
            action: Action::Volume(action),
            params: Parameters::Volume(VolumeRequest {
                operation: action,
                volume: drive.to_string(),
                passphrase,
                external_key_protector_id,
                passphrase_protector_id,
            }),
        })
    }

    /// Ask the agent to report every volume.
    pub fn volume_status(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            resource: None,
            action: Action::Volume(VolumeAction::Status),
            params: Parameters::Volume(VolumeRequest {
                operation: VolumeAction::Status,
                volume: String::new(),
                passphrase: None,
                external_key_protector_id: None,
                passphrase_protector_id: None,
            }),
        }
    }

    /// Build a mesh-network command. `settings` are the tenant's mesh credentials.
    pub fn mesh(
        agent_id: &str,
        action: MeshAction,
        settings: Option<&MeshSettings>,
        one_off_key: Option<&str>,
        profile: Option<&str>,
    ) -> Result<Self> {
        let settings = check_mesh_settings(settings)?;
        let management_url =
            Some(settings.management_url.trim().to_string()).filter(|u| !u.is_empty());

        let request = match action {
            MeshAction::Install => MeshRequest {
                management_url,
                ..Default::default()
            },
            MeshAction::Register => {
                if management_url.is_none() {
                    return Err(FleetError::validation(
                        "mesh management URL is not configured for this tenant",
                    ));
                }
                let key = one_off_key.map(str::trim).unwrap_or_default();
                if key.is_empty() {
                    return Err(FleetError::validation(
                        "a one-off setup key is required to register a peer",
                    ));
                }
                MeshRequest {
                    management_url,
                    one_off_key: Some(key.to_string()),
                    profile: None,
                }
            }
            MeshAction::SwitchProfile => {
                let profile = profile.map(str::trim).unwrap_or_default();
                if profile.is_empty() {
                    return Err(FleetError::validation("a profile name is required"));
                }
                MeshRequest {
                    profile: Some(profile.to_string()),
                    ..Default::default()
                }
            }
            MeshAction::Connect
            | MeshAction::Disconnect
            | MeshAction::DeletePeer
            | MeshAction::Refresh => MeshRequest::default(),
        };

        Ok(Self {
            agent_id: agent_id.to_string(),
            resource: Some(ResourceKey::Mesh),
            action: Action::Mesh(action),
            params: Parameters::Mesh(request),
        })
    }

    /// Build an agent-level command. `session` is required to start a remote session.
    pub fn agent(
        agent: &Agent,
        action: AgentAction,
        session: Option<SessionRequest>,
    ) -> Result<Self> {
        let params = match action {
            AgentAction::Admit if agent.status != AgentStatus::WaitingForAdmission => {
                return Err(FleetError::validation(format!(
                    "agent {} is not waiting for admission",
                    agent.id
                )));
            }
            AgentAction::StartRemoteSession => {
                let session = session.ok_or_else(|| {
                    FleetError::validation("a session PIN is required to start a remote session")
                })?;
                if session.pin.is_empty() || !session.pin.chars().all(|c| c.is_ascii_digit()) {
                    return Err(FleetError::validation("session PIN must be numeric"));
                }
                Parameters::Session(session)
            }
            _ => Parameters::Empty,
        };

        Ok(Self {
            agent_id: agent.id.clone(),
            resource: None,
            action: Action::Agent(action),
            params,
        })
    }

    /// Build a package deployment command.
    pub fn package(agent_id: &str, action: PackageAction, spec: &PackageSpec) -> Result<Self> {
        let package_id = spec.package_id.trim();
        let package_name = spec.package_name.trim();
        if package_id.is_empty() || package_name.is_empty() {
            return Err(FleetError::validation("package id and name are required"));
        }

        Ok(Self {
            agent_id: agent_id.to_string(),
            resource: Some(ResourceKey::Package(package_id.to_string())),
            action: Action::Package(action),
            params: Parameters::Package(PackageRequest {
                agent_id: agent_id.to_string(),
                package_id: package_id.to_string(),
                package_name: package_name.to_string(),
                repository: spec.repository.trim().to_string(),
                action,
            }),
        })
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Encoded> {
        let payload = match (&self.action, &self.params) {
            (Action::Volume(_), Parameters::Volume(r)) => serde_json::to_vec(r)?,
            (Action::Mesh(_), Parameters::Mesh(r)) => serde_json::to_vec(r)?,
            (Action::Agent(AgentAction::StartRemoteSession), Parameters::Session(r)) => {
                serde_json::to_vec(r)?
            }
            (Action::Agent(_), Parameters::Empty) => Vec::new(),
            (Action::Package(_), Parameters::Package(r)) => serde_json::to_vec(r)?,
            (action, _) => {
                return Err(FleetError::validation(format!(
                    "parameters do not match action {action}"
                )));
            }
        };

        Ok(Encoded {
            subject: self.action.subject(&self.agent_id),
            payload,
            latency: self.action.latency(),
            publish_only: self.action.is_publish_only(),
        })
    }

    /// Read a command the way the agent receives it.
    pub fn decode(subject: &str, payload: &[u8]) -> Result<Self> {
        let parts: Vec<&str> = subject.split('.').collect();
        match parts.as_slice() {
            ["agent", "bitlocker", agent_id] => {
                let request: VolumeRequest = serde_json::from_slice(payload)?;
                let resource = match request.operation {
                    VolumeAction::Status => None,
                    _ => Some(ResourceKey::Volume(request.volume.clone())),
                };
                Ok(Self {
                    agent_id: agent_id.to_string(),
                    resource,
                    action: Action::Volume(request.operation),
                    params: Parameters::Volume(request),
                })
            }
            ["agent", "netbird", verb, agent_id] => {
                let action = MeshAction::ALL
                    .into_iter()
                    .find(|a| a.verb() == *verb)
                    .ok_or_else(|| FleetError::Decode(subject.to_string()))?;
                Ok(Self {
                    agent_id: agent_id.to_string(),
                    resource: Some(ResourceKey::Mesh),
                    action: Action::Mesh(action),
                    params: Parameters::Mesh(decode_reply(payload)?),
                })
            }
            ["agent", verb, agent_id] => {
                if let Some(action) = PackageAction::ALL.into_iter().find(|a| a.verb() == *verb) {
                    let request: PackageRequest = serde_json::from_slice(payload)?;
                    return Ok(Self {
                        agent_id: agent_id.to_string(),
                        resource: Some(ResourceKey::Package(request.package_id.clone())),
                        action: Action::Package(action),
                        params: Parameters::Package(request),
                    });
                }
                // Admission travels as `enable`, so it decodes as Enable.
                let action = AgentAction::ALL
                    .into_iter()
                    .find(|a| a.verb() == *verb)
                    .ok_or_else(|| FleetError::Decode(subject.to_string()))?;
                let params = match action {
                    AgentAction::StartRemoteSession => {
                        Parameters::Session(serde_json::from_slice(payload)?)
                    }
                    _ => Parameters::Empty,
                };
                Ok(Self {
                    agent_id: agent_id.to_string(),
                    resource: None,
                    action: Action::Agent(action),
                    params,
                })
            }
            _ => Err(FleetError::Decode(subject.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

fn validate_volume(
    action: VolumeAction,
    volume: &VolumeState,
    passphrase: Option<&str>,
) -> Result<()> {
    match action {
        VolumeAction::ResumeProtection | VolumeAction::SuspendProtection => {
            if !volume.is_system() {
                return Err(FleetError::validation("invalid device"));
            }
        }
        VolumeAction::EnableAutoUnlock => {
            if volume.is_system() {
                return Err(FleetError::validation(
                    "auto-unlock is not available for the system volume",
                ));
            }
        }
        VolumeAction::DisableAutoUnlock => {
            if volume.is_system() {
                return Err(FleetError::validation(
                    "auto-unlock is not available for the system volume",
                ));
            }
            if volume.external_key_protector_id.is_none() {
                return Err(FleetError::validation(
                    "volume has no external key protector to remove",
                ));
            }
        }
        VolumeAction::Encrypt => match passphrase.filter(|p| !p.is_empty()) {
            Some(p) => check_passphrase(volume.volume_type, p)?,
            // The system volume may be protected by the TPM alone.
            None if volume.is_system() => {}
            None => return Err(FleetError::validation("a passphrase is required")),
        },
        VolumeAction::ChangePassphrase
        | VolumeAction::AddPassphrase
        | VolumeAction::UnlockWithPassphrase => match passphrase.filter(|p| !p.is_empty()) {
            Some(p) => check_passphrase(volume.volume_type, p)?,
            None => return Err(FleetError::validation("a passphrase is required")),
        },
        VolumeAction::DeletePassphrase => {
            if volume.passphrase_protector_id.is_none() {
                return Err(FleetError::validation(
                    "volume has no passphrase protector to delete",
                ));
            }
        }
        VolumeAction::Decrypt | VolumeAction::Status => {}
    }
    Ok(())
}

fn check_passphrase(volume_type: VolumeType, passphrase: &str) -> Result<()> {
    let bounds = match volume_type {
        VolumeType::Fixed => DATA_PASSPHRASE_LEN,
        VolumeType::System | VolumeType::Removable => TPM_PASSPHRASE_LEN,
    };
    if !bounds.contains(&passphrase.chars().count()) {
        return Err(FleetError::validation(format!(
            "passphrase must be between {} and {} characters",
            bounds.start(),
            bounds.end()
        )));
    }
    Ok(())
}

/// Mesh actions need an access token configured for the tenant.
pub fn check_mesh_settings(settings: Option<&MeshSettings>) -> Result<&MeshSettings> {
    match settings {
        Some(s) if !s.access_token.trim().is_empty() => Ok(s),
        _ => Err(FleetError::validation(
            "mesh access token is not configured for this tenant",
        )),
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Common shape of every agent reply: an `Error` field that is empty on success.
pub trait Reply {
    fn error_text(&self) -> &str;

    fn remote_error(&self) -> Option<&str> {
        Some(self.error_text().trim()).filter(|e| !e.is_empty())
    }
}

/// Decode a JSON reply; an empty payload decodes to the default value.
pub fn decode_reply<T: DeserializeOwned + Default>(payload: &[u8]) -> Result<T> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReport {
    #[serde(rename = "Volume")]
    pub volume: String,
    #[serde(rename = "VolumeType")]
    pub volume_type: VolumeType,
    #[serde(rename = "EncryptionStatus", default)]
    pub encryption: EncryptionStatus,
    #[serde(rename = "ProtectionStatus", default)]
    pub protection: ProtectionStatus,
    #[serde(rename = "Locked", default)]
    pub locked: bool,
    #[serde(rename = "AutoUnlock", default)]
    pub auto_unlock: bool,
    #[serde(
        rename = "ExternalKeyVolumeKeyProtectorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_key_protector_id: Option<String>,
    #[serde(
        rename = "PassphraseVolumeKeyProtectorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub passphrase_protector_id: Option<String>,
}

impl VolumeReport {
    /// Remote state as reported. `passphrase` is the console-held secret,
    /// kept only while the agent still reports a passphrase protector.
    pub fn into_state(self, passphrase: Option<String>) -> VolumeState {
        let passphrase = passphrase.filter(|_| self.passphrase_protector_id.is_some());
        VolumeState {
            volume_type: self.volume_type,
            encryption: self.encryption,
            protection: self.protection,
            locked: self.locked,
            auto_unlock: self.auto_unlock,
            passphrase,
            external_key_protector_id: self.external_key_protector_id,
            passphrase_protector_id: self.passphrase_protector_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReply {
    #[serde(rename = "Operation", default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<VolumeAction>,
    #[serde(rename = "Volume", default)]
    pub volume: String,
    #[serde(rename = "Error", default)]
    pub error: String,
    #[serde(
        rename = "ExternalKeyVolumeKeyProtectorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_key_protector_id: Option<String>,
    #[serde(
        rename = "PassphraseVolumeKeyProtectorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub passphrase_protector_id: Option<String>,
    #[serde(rename = "Volumes", default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeReport>,
}

impl Reply for VolumeReply {
    fn error_text(&self) -> &str {
        &self.error
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshReply {
    #[serde(rename = "Error", default)]
    pub error: String,
    #[serde(rename = "Installed", default)]
    pub installed: bool,
    #[serde(rename = "Connected", default)]
    pub connected: bool,
    #[serde(rename = "IP", default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "Profile", default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(rename = "Profiles", default)]
    pub profiles: Vec<String>,
    #[serde(rename = "ManagementURL", default, skip_serializing_if = "Option::is_none")]
    pub management_url: Option<String>,
}

impl MeshReply {
    pub fn into_state(self) -> PeerState {
        PeerState {
            installed: self.installed,
            connected: self.connected,
            ip: self.ip,
            version: self.version,
            profile: self.profile,
            profiles: self.profiles,
            management_url: self.management_url,
        }
    }
}

impl Reply for MeshReply {
    fn error_text(&self) -> &str {
        &self.error
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl Reply for AgentReply {
    fn error_text(&self) -> &str {
        &self.error
    }
}

/// Completion report agents publish on `agent.package.result.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageResult {
    #[serde(rename = "AgentId")]
    pub agent_id: String,
    #[serde(rename = "PackageId")]
    pub package_id: String,
    #[serde(rename = "Action")]
    pub action: PackageAction,
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl Reply for PackageResult {
    fn error_text(&self) -> &str {
        &self.error
    }
}

/// Fold a successful reply into the volume's stored state.
pub fn apply_volume_reply(state: &mut VolumeState, request: &VolumeRequest, reply: &VolumeReply) {
    match request.operation {
        VolumeAction::Encrypt => {
            state.encryption = EncryptionStatus::Encrypting;
            state.protection = ProtectionStatus::On;
            if request.passphrase.is_some() {
                state.passphrase = request.passphrase.clone();
                state.passphrase_protector_id = reply
                    .passphrase_protector_id
                    .clone()
                    .or(state.passphrase_protector_id.take());
            }
        }
        VolumeAction::Decrypt => {
            state.encryption = EncryptionStatus::Decrypting;
            state.protection = ProtectionStatus::Off;
            state.auto_unlock = false;
            state.passphrase = None;
            state.passphrase_protector_id = None;
            state.external_key_protector_id = None;
        }
        VolumeAction::ResumeProtection => state.protection = ProtectionStatus::On,
        VolumeAction::SuspendProtection => state.protection = ProtectionStatus::Off,
        VolumeAction::EnableAutoUnlock => {
            state.auto_unlock = true;
            state.external_key_protector_id = reply.external_key_protector_id.clone();
        }
        VolumeAction::DisableAutoUnlock => {
            state.auto_unlock = false;
            state.external_key_protector_id = None;
        }
        VolumeAction::ChangePassphrase | VolumeAction::AddPassphrase => {
            state.passphrase = request.passphrase.clone();
            state.passphrase_protector_id = reply
                .passphrase_protector_id
                .clone()
                .or(state.passphrase_protector_id.take());
        }
        VolumeAction::DeletePassphrase => {
            state.passphrase = None;
            state.passphrase_protector_id = None;
        }
        VolumeAction::UnlockWithPassphrase => state.locked = false,
        VolumeAction::Status => {}
    }
}
