use super::open_db;
use crate::output::print_json;
use clap::Subcommand;
use fleet_core::types::MeshSettings;
use std::path::Path;

#[derive(Subcommand)]
pub enum SettingsSubcommand {
    /// Store mesh management credentials for a tenant
    Mesh {
        tenant: String,
        /// Management API base URL
        #[arg(long)]
        url: String,
        /// Management API access token
        #[arg(long, env = "FLEET_MESH_TOKEN")]
        token: String,
    },

    /// Show a tenant's stored mesh settings
    Show { tenant: String },
}

pub fn run(root: &Path, subcmd: SettingsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SettingsSubcommand::Mesh { tenant, url, token } => {
            let settings = MeshSettings {
                management_url: url.trim().trim_end_matches('/').to_string(),
                access_token: token.trim().to_string(),
            };
            set_mesh(root, &tenant, &settings, json)
        }
        SettingsSubcommand::Show { tenant } => show(root, &tenant, json),
    }
}

fn set_mesh(root: &Path, tenant: &str, settings: &MeshSettings, json: bool) -> anyhow::Result<()> {
    if settings.management_url.is_empty() {
        anyhow::bail!("--url must not be empty");
    }
    open_db(root)?.put_mesh_settings(tenant, settings)?;
    if json {
        print_json(&serde_json::json!({
            "tenant": tenant,
            "management_url": settings.management_url,
        }))
    } else {
        println!("Mesh settings saved for tenant {tenant}");
        Ok(())
    }
}

fn show(root: &Path, tenant: &str, json: bool) -> anyhow::Result<()> {
    let settings = open_db(root)?
        .get_mesh_settings(tenant)?
        .ok_or_else(|| anyhow::anyhow!("no mesh settings for tenant '{tenant}'"))?;
    let token_set = !settings.access_token.is_empty();
    if json {
        print_json(&serde_json::json!({
            "tenant": tenant,
            "management_url": settings.management_url,
            "token_set": token_set,
        }))
    } else {
        println!("tenant:         {tenant}");
        println!("management_url: {}", settings.management_url);
        println!("access_token:   {}", if token_set { "set" } else { "missing" });
        Ok(())
    }
}
