use std::path::{Path, PathBuf};

pub const FLEET_DIR: &str = ".fleet";
pub const CONFIG_FILE: &str = ".fleet/config.yaml";
pub const DB_FILE: &str = ".fleet/console.redb";

pub fn fleet_dir(root: &Path) -> PathBuf {
    root.join(FLEET_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn default_db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}
