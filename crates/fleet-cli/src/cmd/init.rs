use anyhow::Context;
use fleet_core::{config::Config, io, paths, ResourceDb};
use std::path::Path;

pub fn run(root: &Path, nats_url: Option<&str>) -> anyhow::Result<()> {
    println!("Initializing fleet console in: {}", root.display());

    let dir = paths::fleet_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to load config.yaml")?
    } else {
        let mut config = Config::default();
        if let Some(url) = nats_url {
            config.nats_url = url.to_string();
        }
        config.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        config
    };

    let db_path = config.db_path(root);
    let existed = db_path.exists();
    ResourceDb::open(&db_path)
        .with_context(|| format!("failed to create store at {}", db_path.display()))?;
    let shown = db_path.strip_prefix(root).unwrap_or(&db_path);
    if existed {
        println!("  exists:  {}", shown.display());
    } else {
        println!("  created: {}", shown.display());
    }

    Ok(())
}
