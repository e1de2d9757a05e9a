use std::path::{Path, PathBuf};

pub const STEPWISE_DIR: &str = ".stepwise";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_DB_FILE: &str = "stepwise.db";

pub fn stepwise_dir(root: &Path) -> PathBuf {
    root.join(STEPWISE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    stepwise_dir(root).join(CONFIG_FILE)
}

/// Resolve a possibly-relative database path against the project root.
pub fn db_path(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
