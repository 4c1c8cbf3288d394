use crate::action::{Action, PackageAction};
use crate::error::FleetError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    WaitingForAdmission,
    Enabled,
    Disabled,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitingForAdmission => "waiting_for_admission",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// A managed endpoint as known to the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub tenant: String,
    pub address: String,
    #[serde(default)]
    pub online: bool,
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        tenant: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            address: address.into(),
            online: false,
            status: AgentStatus::WaitingForAdmission,
        }
    }
}

/// Mesh management credentials for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSettings {
    pub management_url: String,
    pub access_token: String,
}

// ---------------------------------------------------------------------------
// ResourceKey
// ---------------------------------------------------------------------------

/// Identifies a resource within one agent.
///
/// Rendered as `volume:<drive>`, `mesh` or `package:<package-id>`; that form
/// is used both in DB keys and in URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceKey {
    Volume(String),
    Mesh,
    Package(String),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume(drive) => write!(f, "volume:{drive}"),
            Self::Mesh => f.write_str("mesh"),
            Self::Package(id) => write!(f, "package:{id}"),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "mesh" {
            return Ok(Self::Mesh);
        }
        if let Some(drive) = s.strip_prefix("volume:") {
            if !drive.is_empty() {
                return Ok(Self::Volume(drive.to_string()));
            }
        }
        if let Some(id) = s.strip_prefix("package:") {
            if !id.is_empty() {
                return Ok(Self::Package(id.to_string()));
            }
        }
        Err(FleetError::validation(format!("invalid resource key '{s}'")))
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.to_string()
    }
}

// ---------------------------------------------------------------------------
// Volume state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// The operating-system volume; protected by the TPM.
    System,
    Fixed,
    Removable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionStatus {
    Decrypted,
    Encrypting,
    Encrypted,
    Decrypting,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionStatus {
    On,
    Off,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeState {
    pub volume_type: VolumeType,
    #[serde(default)]
    pub encryption: EncryptionStatus,
    #[serde(default)]
    pub protection: ProtectionStatus,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub auto_unlock: bool,
    /// Console-held secret; agents never report it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key_protector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_protector_id: Option<String>,
}

impl VolumeState {
    pub fn new(volume_type: VolumeType) -> Self {
        Self {
            volume_type,
            encryption: EncryptionStatus::Unknown,
            protection: ProtectionStatus::Unknown,
            locked: false,
            auto_unlock: false,
            passphrase: None,
            external_key_protector_id: None,
            passphrase_protector_id: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.volume_type == VolumeType::System
    }
}

// ---------------------------------------------------------------------------
// Mesh peer / package state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerState {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    pub name: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<PackageAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceState {
    Volume(VolumeState),
    Mesh(PeerState),
    Package(PackageState),
}

// ---------------------------------------------------------------------------
// OperationState
// ---------------------------------------------------------------------------

/// Per-resource operation marker.
///
/// Transitions: `Idle → Pending → Idle` (reply persisted) or
/// `Pending → Stalled` (timeout / remote error). `Stalled` leaves only via
/// an explicit clear or a refresh overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    Pending {
        action: Action,
        started_at: DateTime<Utc>,
    },
    Stalled {
        action: Action,
        started_at: DateTime<Utc>,
        reason: String,
    },
}

impl OperationState {
    /// The in-flight action, if any.
    pub fn in_progress(&self) -> Option<Action> {
        match self {
            Self::Idle => None,
            Self::Pending { action, .. } | Self::Stalled { action, .. } => Some(*action),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub agent_id: String,
    pub key: ResourceKey,
    pub state: ResourceState,
    #[serde(default)]
    pub operation: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Resource {
    pub fn new(agent_id: impl Into<String>, key: ResourceKey, state: ResourceState) -> Self {
        Self {
            agent_id: agent_id.into(),
            key,
            state,
            operation: OperationState::Idle,
            last_error: None,
        }
    }

    pub fn volume(
        agent_id: impl Into<String>,
        drive: impl Into<String>,
        state: VolumeState,
    ) -> Self {
        Self::new(
            agent_id,
            ResourceKey::Volume(drive.into()),
            ResourceState::Volume(state),
        )
    }

    pub fn mesh(agent_id: impl Into<String>, state: PeerState) -> Self {
        Self::new(agent_id, ResourceKey::Mesh, ResourceState::Mesh(state))
    }

    pub fn volume_state(&self) -> Option<&VolumeState> {
        match &self.state {
            ResourceState::Volume(v) => Some(v),
            _ => None,
        }
    }

    pub fn peer_state(&self) -> Option<&PeerState> {
        match &self.state {
            ResourceState::Mesh(p) => Some(p),
            _ => None,
        }
    }

    pub fn package_state(&self) -> Option<&PackageState> {
        match &self.state {
            ResourceState::Package(p) => Some(p),
            _ => None,
        }
    }
}
