//! Data directory layout.
//!
//! Resolved once at startup from: `--data-dir` (or `DEEPAGENTS_DATA_DIR`,
//! handled by clap) > `~/.deepagents`.

use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_DIR_NAME: &str = ".deepagents";

pub fn resolve_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    resolve_with_home(explicit, dirs::home_dir())
}

fn resolve_with_home(explicit: Option<&Path>, home: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    home.map(|home| home.join(DEFAULT_DIR_NAME))
        .ok_or_else(|| anyhow::anyhow!("HOME directory not found; pass --data-dir"))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Create the data dir and its subdirectories.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(log_dir(data_dir))
}
