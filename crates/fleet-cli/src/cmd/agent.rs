use super::open_db;
use crate::output::{print_json, print_table};
use clap::{Subcommand, ValueEnum};
use fleet_core::{Agent, AgentStatus, FleetError};
use std::path::Path;

#[derive(Subcommand)]
pub enum AgentSubcommand {
    /// Add or replace an agent in the inventory
    Add {
        id: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        address: String,
        /// Mark the agent reachable on the bus
        #[arg(long)]
        online: bool,
        #[arg(long, value_enum, default_value = "waiting")]
        status: StatusArg,
    },

    /// List agents
    List,

    /// Flip the reachability flag
    SetOnline {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        online: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Waiting,
    Enabled,
    Disabled,
}

impl From<StatusArg> for AgentStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Waiting => AgentStatus::WaitingForAdmission,
            StatusArg::Enabled => AgentStatus::Enabled,
            StatusArg::Disabled => AgentStatus::Disabled,
        }
    }
}

pub fn run(root: &Path, subcmd: AgentSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        AgentSubcommand::Add {
            id,
            tenant,
            address,
            online,
            status,
        } => {
            let mut agent = Agent::new(id, tenant, address);
            agent.online = online;
            agent.status = status.into();
            add(root, &agent, json)
        }
        AgentSubcommand::List => list(root, json),
        AgentSubcommand::SetOnline { id, online } => set_online(root, &id, online, json),
    }
}

fn add(root: &Path, agent: &Agent, json: bool) -> anyhow::Result<()> {
    if agent.id.trim().is_empty() || agent.tenant.trim().is_empty() {
        anyhow::bail!("agent id and tenant must not be empty");
    }
    let db = open_db(root)?;
    db.put_agent(agent)?;
    if json {
        print_json(agent)
    } else {
        println!("Added agent {} (tenant {})", agent.id, agent.tenant);
        Ok(())
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let agents = open_db(root)?.list_agents()?;
    if json {
        return print_json(&agents);
    }
    if agents.is_empty() {
        println!("No agents.");
        return Ok(());
    }
    let rows = agents
        .iter()
        .map(|a| {
            vec![
                a.id.clone(),
                a.tenant.clone(),
                a.address.clone(),
                if a.online { "yes" } else { "no" }.to_string(),
                a.status.to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "TENANT", "ADDRESS", "ONLINE", "STATUS"], rows);
    Ok(())
}

fn set_online(root: &Path, id: &str, online: bool, json: bool) -> anyhow::Result<()> {
    let db = open_db(root)?;
    let mut agent = db
        .get_agent(id)?
        .ok_or_else(|| FleetError::AgentNotFound(id.to_string()))?;
    agent.online = online;
    db.put_agent(&agent)?;
    if json {
        print_json(&agent)
    } else {
        println!(
            "Agent {} is now {}",
            agent.id,
            if online { "online" } else { "offline" }
        );
        Ok(())
    }
}
