use super::open_db;
use crate::output::{print_json, print_table};
use clap::{Subcommand, ValueEnum};
use fleet_core::types::{VolumeState, VolumeType};
use fleet_core::{FleetError, OperationState, Resource, ResourceKey, ResourceState};
use std::path::Path;

#[derive(Subcommand)]
pub enum ResourceSubcommand {
    /// List an agent's resources
    List { agent: String },

    /// Show one resource
    Show {
        agent: String,
        /// Resource key: volume:<drive>, mesh or package:<id>
        key: String,
    },

    /// Seed a volume row before the first refresh
    AddVolume {
        agent: String,
        drive: String,
        #[arg(long = "type", value_enum, default_value = "fixed")]
        volume_type: VolumeTypeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum VolumeTypeArg {
    System,
    Fixed,
    Removable,
}

impl From<VolumeTypeArg> for VolumeType {
    fn from(arg: VolumeTypeArg) -> Self {
        match arg {
            VolumeTypeArg::System => VolumeType::System,
            VolumeTypeArg::Fixed => VolumeType::Fixed,
            VolumeTypeArg::Removable => VolumeType::Removable,
        }
    }
}

pub fn run(root: &Path, subcmd: ResourceSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ResourceSubcommand::List { agent } => list(root, &agent, json),
        ResourceSubcommand::Show { agent, key } => show(root, &agent, &key, json),
        ResourceSubcommand::AddVolume {
            agent,
            drive,
            volume_type,
        } => add_volume(root, &agent, &drive, volume_type.into(), json),
    }
}

fn list(root: &Path, agent_id: &str, json: bool) -> anyhow::Result<()> {
    let db = open_db(root)?;
    if db.get_agent(agent_id)?.is_none() {
        return Err(FleetError::AgentNotFound(agent_id.to_string()).into());
    }
    let resources = db.list_resources(agent_id)?;
    if json {
        return print_json(&resources);
    }
    if resources.is_empty() {
        println!("No resources for {agent_id}.");
        return Ok(());
    }
    let rows = resources
        .iter()
        .map(|r| {
            vec![
                r.key.to_string(),
                summarize_state(&r.state),
                summarize_operation(&r.operation),
                r.last_error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["KEY", "STATE", "OPERATION", "LAST ERROR"], rows);
    Ok(())
}

fn show(root: &Path, agent_id: &str, key: &str, json: bool) -> anyhow::Result<()> {
    let key: ResourceKey = key.parse()?;
    let resource = open_db(root)?
        .get_resource(agent_id, &key)?
        .ok_or_else(|| FleetError::ResourceNotFound {
            agent_id: agent_id.to_string(),
            resource: key.to_string(),
        })?;
    if json {
        return print_json(&resource);
    }
    println!("{}/{}", resource.agent_id, resource.key);
    println!("  state:     {}", summarize_state(&resource.state));
    println!("  operation: {}", summarize_operation(&resource.operation));
    if let Some(e) = &resource.last_error {
        println!("  error:     {e}");
    }
    Ok(())
}

fn add_volume(
    root: &Path,
    agent_id: &str,
    drive: &str,
    volume_type: VolumeType,
    json: bool,
) -> anyhow::Result<()> {
    let db = open_db(root)?;
    if db.get_agent(agent_id)?.is_none() {
        return Err(FleetError::AgentNotFound(agent_id.to_string()).into());
    }
    let resource = Resource::volume(agent_id, drive.trim(), VolumeState::new(volume_type));
    if !db.ensure_resource(&resource)? {
        anyhow::bail!("{agent_id}/{} already exists", resource.key);
    }
    if json {
        print_json(&resource)
    } else {
        println!("Added {agent_id}/{}", resource.key);
        Ok(())
    }
}

pub fn summarize_state(state: &ResourceState) -> String {
    match state {
        ResourceState::Volume(v) => {
            let mut s = format!(
                "{:?} {:?} protection {:?}",
                v.volume_type, v.encryption, v.protection
            )
            .to_lowercase();
            if v.locked {
                s.push_str(", locked");
            }
            if v.auto_unlock {
                s.push_str(", auto-unlock");
            }
            s
        }
        ResourceState::Mesh(p) if !p.installed => "not installed".to_string(),
        ResourceState::Mesh(p) => match (&p.ip, p.connected) {
            (Some(ip), true) => format!("connected {ip}"),
            (_, true) => "connected".to_string(),
            _ => "disconnected".to_string(),
        },
        ResourceState::Package(p) => {
            let status = if p.installed { "installed" } else { "absent" };
            format!("{} ({status})", p.name)
        }
    }
}

pub fn summarize_operation(op: &OperationState) -> String {
    match op {
        OperationState::Idle => "idle".to_string(),
        OperationState::Pending { action, started_at } => {
            format!("pending {action} since {}", started_at.format("%Y-%m-%d %H:%M:%S"))
        }
        OperationState::Stalled { action, reason, .. } => format!("stalled {action}: {reason}"),
    }
}
