use crate::action::LatencyClass;
use crate::error::{FleetError, Result};
use crate::paths;
use crate::types::MeshSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest wait any single bus request may have.
pub const MAX_TIMEOUT_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// TimeoutConfig
// ---------------------------------------------------------------------------

/// Bus wait per latency class, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_status_secs")]
    pub status_secs: u64,
    #[serde(default = "default_toggle_secs")]
    pub toggle_secs: u64,
    #[serde(default = "default_install_secs")]
    pub install_secs: u64,
}

fn default_status_secs() -> u64 {
    10
}

fn default_toggle_secs() -> u64 {
    120
}

fn default_install_secs() -> u64 {
    600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status_secs: default_status_secs(),
            toggle_secs: default_toggle_secs(),
            install_secs: default_install_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn for_class(&self, class: LatencyClass) -> Duration {
        let secs = match class {
            LatencyClass::Status => self.status_secs,
            LatencyClass::Toggle => self.toggle_secs,
            LatencyClass::Install => self.install_secs,
        };
        Duration::from_secs(secs)
    }
}

// ---------------------------------------------------------------------------
// StallSweepConfig
// ---------------------------------------------------------------------------

/// Optional background demotion of aged `Pending` operations to `Stalled`.
/// Off unless enabled explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StallSweepConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_max_age_secs() -> u64 {
    3600
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for StallSweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_secs: default_max_age_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Database file; relative paths resolve against the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub stall_sweep: StallSweepConfig,
    /// Mesh settings per tenant, written to the store at server start.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tenants: BTreeMap<String, MeshSettings>,
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:3141".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            nats_url: default_nats_url(),
            listen: default_listen(),
            db_path: None,
            timeouts: TimeoutConfig::default(),
            stall_sweep: StallSweepConfig::default(),
            tenants: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_from(&paths::config_path(root))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FleetError::NotInitialized);
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        match &self.db_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => paths::default_db_path(root),
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let t = &self.timeouts;
        for (name, secs) in [
            ("status_secs", t.status_secs),
            ("toggle_secs", t.toggle_secs),
            ("install_secs", t.install_secs),
        ] {
            if secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("timeouts.{name} must be greater than zero"),
                });
            } else if secs > MAX_TIMEOUT_SECS {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "timeouts.{name} = {secs}s exceeds the {MAX_TIMEOUT_SECS}s ceiling"
                    ),
                });
            }
        }
        if t.status_secs > t.toggle_secs || t.toggle_secs > t.install_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "timeouts should grow from status to toggle to install".to_string(),
            });
        }

        if !self.nats_url.starts_with("nats://") && !self.nats_url.starts_with("tls://") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("nats_url '{}' is not a nats:// or tls:// URL", self.nats_url),
            });
        }

        let sweep = &self.stall_sweep;
        if sweep.enabled && sweep.max_age_secs <= t.install_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "stall_sweep.max_age_secs ({}) should exceed timeouts.install_secs ({}) \
                     or running installs will be demoted",
                    sweep.max_age_secs, t.install_secs
                ),
            });
        }
        if sweep.enabled && sweep.interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "stall_sweep.interval_secs must be greater than zero".to_string(),
            });
        }

        for (tenant, mesh) in &self.tenants {
            if mesh.access_token.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "tenants.{tenant}.access_token is empty; mesh actions will be rejected"
                    ),
                });
            }
            let url = &mesh.management_url;
            if !url.starts_with("https://") && !url.starts_with("http://") {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "tenants.{tenant}.management_url '{url}' is not an http(s) URL"
                    ),
                });
            }
        }

        warnings
    }
}
