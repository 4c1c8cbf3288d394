use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use fleet_core::config::{Config, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// Print the effective config
    Show,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::Show => show(root, json),
    }
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config")?;
    for mesh in config.tenants.values_mut() {
        if !mesh.access_token.is_empty() {
            mesh.access_token = "********".to_string();
        }
    }

    if json {
        return print_json(&config);
    }
    println!("nats_url:      {}", config.nats_url);
    println!("listen:        {}", config.listen);
    println!("db_path:       {}", config.db_path(root).display());
    println!(
        "timeouts:      status {}s, toggle {}s, install {}s",
        config.timeouts.status_secs, config.timeouts.toggle_secs, config.timeouts.install_secs
    );
    if config.stall_sweep.enabled {
        println!(
            "stall sweep:   every {}s, max age {}s",
            config.stall_sweep.interval_secs, config.stall_sweep.max_age_secs
        );
    } else {
        println!("stall sweep:   off");
    }
    for (tenant, mesh) in &config.tenants {
        println!("tenant {tenant}: {}", mesh.management_url);
    }
    Ok(())
}
