pub mod agent;
pub mod config;
pub mod init;
pub mod op;
pub mod resource;
pub mod serve;
pub mod settings;

use anyhow::Context;
use fleet_core::config::Config;
use fleet_core::ResourceDb;
use std::path::Path;

/// Open the store named by the console config.
///
/// The store holds an exclusive lock, so this fails while `fleetctl serve`
/// is running against the same root.
pub fn open_db(root: &Path) -> anyhow::Result<ResourceDb> {
    let config = Config::load(root)?;
    let path = config.db_path(root);
    ResourceDb::open(&path).with_context(|| format!("cannot open store at {}", path.display()))
}
