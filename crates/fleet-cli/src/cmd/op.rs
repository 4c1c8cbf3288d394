use super::open_db;
use super::resource::summarize_operation;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use fleet_core::ResourceKey;
use std::path::Path;
use std::time::Duration;

#[derive(Subcommand)]
pub enum OpSubcommand {
    /// List resources with a pending or stalled operation
    List,

    /// Reset a resource's operation to idle, whatever its state
    Clear {
        agent: String,
        /// Resource key: volume:<drive>, mesh or package:<id>
        key: String,
    },

    /// Mark pending operations older than the given age as stalled
    Sweep {
        /// Age in seconds
        #[arg(long, default_value = "3600")]
        max_age: u64,
    },
}

pub fn run(root: &Path, subcmd: OpSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        OpSubcommand::List => list(root, json),
        OpSubcommand::Clear { agent, key } => clear(root, &agent, &key, json),
        OpSubcommand::Sweep { max_age } => sweep(root, max_age, json),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let busy = open_db(root)?.list_busy()?;
    if json {
        return print_json(&busy);
    }
    if busy.is_empty() {
        println!("No operations in flight.");
        return Ok(());
    }
    let rows = busy
        .iter()
        .map(|r| {
            vec![
                r.agent_id.clone(),
                r.key.to_string(),
                summarize_operation(&r.operation),
            ]
        })
        .collect();
    print_table(&["AGENT", "KEY", "OPERATION"], rows);
    Ok(())
}

fn clear(root: &Path, agent_id: &str, key: &str, json: bool) -> anyhow::Result<()> {
    let key: ResourceKey = key.parse()?;
    let previous = open_db(root)?.clear_operation(agent_id, &key)?;
    tracing::warn!(agent_id, resource = %key, ?previous, "operation cleared by operator");
    if json {
        print_json(&serde_json::json!({
            "agent_id": agent_id,
            "resource": key.to_string(),
            "previous": previous,
        }))
    } else {
        println!(
            "Cleared {agent_id}/{key} (was {})",
            summarize_operation(&previous)
        );
        Ok(())
    }
}

fn sweep(root: &Path, max_age: u64, json: bool) -> anyhow::Result<()> {
    let demoted = open_db(root)?.demote_aged(Duration::from_secs(max_age))?;
    if json {
        print_json(&serde_json::json!({ "demoted": demoted }))
    } else {
        println!("Marked {demoted} operation(s) stalled");
        Ok(())
    }
}
