//! The closed set of remote actions.
//!
//! Every action belongs to exactly one domain and knows its bus subject,
//! its latency class and whether it is request/reply or publish-only. There
//! is no string dispatch: an action that is not a variant here cannot reach
//! the transport.

use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subject pattern agents publish package completion reports on.
pub const PACKAGE_RESULT_WILDCARD: &str = "agent.package.result.*";

pub fn package_result_subject(agent_id: &str) -> String {
    format!("agent.package.result.{agent_id}")
}

// ---------------------------------------------------------------------------
// LatencyClass
// ---------------------------------------------------------------------------

/// Selects the transport timeout for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    /// Status reads, seconds-scale.
    Status,
    /// State toggles on the agent, up to a couple of minutes.
    Toggle,
    /// Software install/uninstall, up to ten minutes.
    Install,
}

// ---------------------------------------------------------------------------
// VolumeAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeAction {
    #[serde(rename = "encrypt")]
    Encrypt,
    #[serde(rename = "decrypt")]
    Decrypt,
    #[serde(rename = "resume")]
    ResumeProtection,
    #[serde(rename = "suspend")]
    SuspendProtection,
    #[serde(rename = "enable_autounlock")]
    EnableAutoUnlock,
    #[serde(rename = "disable_autounlock")]
    DisableAutoUnlock,
    #[serde(rename = "change_passphrase")]
    ChangePassphrase,
    #[serde(rename = "add_passphrase")]
    AddPassphrase,
    #[serde(rename = "delete_passphrase")]
    DeletePassphrase,
    #[serde(rename = "unlock_with_passphrase")]
    UnlockWithPassphrase,
    /// Report every volume; used by reconciliation only.
    #[serde(rename = "status")]
    Status,
}

impl VolumeAction {
    pub const ALL: [Self; 11] = [
        Self::Encrypt,
        Self::Decrypt,
        Self::ResumeProtection,
        Self::SuspendProtection,
        Self::EnableAutoUnlock,
        Self::DisableAutoUnlock,
        Self::ChangePassphrase,
        Self::AddPassphrase,
        Self::DeletePassphrase,
        Self::UnlockWithPassphrase,
        Self::Status,
    ];

    /// Value of the `Operation` field on `agent.bitlocker.<id>`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::ResumeProtection => "resume",
            Self::SuspendProtection => "suspend",
            Self::EnableAutoUnlock => "enable_autounlock",
            Self::DisableAutoUnlock => "disable_autounlock",
            Self::ChangePassphrase => "change_passphrase",
            Self::AddPassphrase => "add_passphrase",
            Self::DeletePassphrase => "delete_passphrase",
            Self::UnlockWithPassphrase => "unlock_with_passphrase",
            Self::Status => "status",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::ResumeProtection => "resume-protection",
            Self::SuspendProtection => "suspend-protection",
            Self::EnableAutoUnlock => "enable-auto-unlock",
            Self::DisableAutoUnlock => "disable-auto-unlock",
            Self::ChangePassphrase => "change-passphrase",
            Self::AddPassphrase => "add-passphrase",
            Self::DeletePassphrase => "delete-passphrase",
            Self::UnlockWithPassphrase => "unlock-with-passphrase",
            Self::Status => "status",
        }
    }

    pub fn latency(self) -> LatencyClass {
        match self {
            Self::Status => LatencyClass::Status,
            _ => LatencyClass::Toggle,
        }
    }
}

// ---------------------------------------------------------------------------
// MeshAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshAction {
    Install,
    Register,
    Connect,
    Disconnect,
    SwitchProfile,
    DeletePeer,
    Refresh,
}

impl MeshAction {
    pub const ALL: [Self; 7] = [
        Self::Install,
        Self::Register,
        Self::Connect,
        Self::Disconnect,
        Self::SwitchProfile,
        Self::DeletePeer,
        Self::Refresh,
    ];

    /// Verb segment of `agent.netbird.<verb>.<id>`.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Register => "register",
            Self::Connect => "up",
            Self::Disconnect => "down",
            Self::SwitchProfile => "switchprofile",
            Self::DeletePeer => "uninstall",
            Self::Refresh => "refresh",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Register => "register",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::SwitchProfile => "switch-profile",
            Self::DeletePeer => "delete-peer",
            Self::Refresh => "refresh",
        }
    }

    pub fn latency(self) -> LatencyClass {
        match self {
            Self::Install | Self::DeletePeer => LatencyClass::Install,
            Self::Refresh => LatencyClass::Status,
            Self::Register | Self::Connect | Self::Disconnect | Self::SwitchProfile => {
                LatencyClass::Toggle
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AgentAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentAction {
    Enable,
    Disable,
    ForceReport,
    Admit,
    StartRemoteSession,
    StopRemoteSession,
}

impl AgentAction {
    pub const ALL: [Self; 6] = [
        Self::Enable,
        Self::Disable,
        Self::ForceReport,
        Self::Admit,
        Self::StartRemoteSession,
        Self::StopRemoteSession,
    ];

    /// Verb segment of `agent.<verb>.<id>`. Admission is delivered as an
    /// enable command.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Enable | Self::Admit => "enable",
            Self::Disable => "disable",
            Self::ForceReport => "report",
            Self::StartRemoteSession => "startvnc",
            Self::StopRemoteSession => "stopvnc",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::ForceReport => "force-report",
            Self::Admit => "admit",
            Self::StartRemoteSession => "start-remote-session",
            Self::StopRemoteSession => "stop-remote-session",
        }
    }

    pub fn latency(self) -> LatencyClass {
        match self {
            Self::Enable | Self::Disable | Self::Admit => LatencyClass::Toggle,
            Self::ForceReport | Self::StartRemoteSession | Self::StopRemoteSession => {
                LatencyClass::Status
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PackageAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageAction {
    Install,
    Update,
    Uninstall,
}

impl PackageAction {
    pub const ALL: [Self; 3] = [Self::Install, Self::Update, Self::Uninstall];

    /// Verb segment of `agent.<verb>.<id>`.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Install => "installpackage",
            Self::Update => "updatepackage",
            Self::Uninstall => "uninstallpackage",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Any remote action. Displayed and stored as `<domain>.<slug>`,
/// e.g. `volume.resume-protection` or `package.install`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    Volume(VolumeAction),
    Mesh(MeshAction),
    Agent(AgentAction),
    Package(PackageAction),
}

impl Action {
    pub fn domain(self) -> &'static str {
        match self {
            Self::Volume(_) => "volume",
            Self::Mesh(_) => "mesh",
            Self::Agent(_) => "agent",
            Self::Package(_) => "package",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Volume(a) => a.slug(),
            Self::Mesh(a) => a.slug(),
            Self::Agent(a) => a.slug(),
            Self::Package(a) => a.slug(),
        }
    }

    /// Bus subject addressing `agent_id` for this action.
    pub fn subject(self, agent_id: &str) -> String {
        match self {
            Self::Volume(_) => format!("agent.bitlocker.{agent_id}"),
            Self::Mesh(a) => format!("agent.netbird.{}.{agent_id}", a.verb()),
            Self::Agent(a) => format!("agent.{}.{agent_id}", a.verb()),
            Self::Package(a) => format!("agent.{}.{agent_id}", a.verb()),
        }
    }

    pub fn latency(self) -> LatencyClass {
        match self {
            Self::Volume(a) => a.latency(),
            Self::Mesh(a) => a.latency(),
            Self::Agent(a) => a.latency(),
            Self::Package(_) => LatencyClass::Install,
        }
    }

    /// Package deployment may span a remote reboot, so it is fire-and-forget;
    /// completion arrives on the package result subject.
    pub fn is_publish_only(self) -> bool {
        matches!(self, Self::Package(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain(), self.slug())
    }
}

impl FromStr for Action {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FleetError::validation(format!("unknown action '{s}'"));
        let (domain, slug) = s.split_once('.').ok_or_else(invalid)?;
        let action = match domain {
            "volume" => VolumeAction::ALL
                .into_iter()
                .find(|a| a.slug() == slug)
                .map(Self::Volume),
            "mesh" => MeshAction::ALL
                .into_iter()
                .find(|a| a.slug() == slug)
                .map(Self::Mesh),
            "agent" => AgentAction::ALL
                .into_iter()
                .find(|a| a.slug() == slug)
                .map(Self::Agent),
            "package" => PackageAction::ALL
                .into_iter()
                .find(|a| a.slug() == slug)
                .map(Self::Package),
            _ => None,
        };
        action.ok_or_else(invalid)
    }
}

impl TryFrom<String> for Action {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}
