//! Cluster configuration
//!
//! A cluster file describes the cluster identity and the machine sets to
//! realize. Machines themselves are never stored here; they are derived from
//! a machine set and a replica index.

pub mod cluster;
pub mod machine;
pub mod path;

pub use cluster::{ClusterSpec, Config, MachineSet};
pub use machine::{MachineSpec, PortMapping, Volume};

use std::path::PathBuf;

/// Default cluster file name
pub const DEFAULT_CONFIG_FILE: &str = "vind.yaml";

/// Environment variable pointing at the cluster file
pub const CONFIG_ENV: &str = "VIND_CONFIG";

/// Default directory of the public key store
pub const DEFAULT_KEY_STORE_PATH: &str = "keys";

/// Resolve the cluster file: explicit flag, then `$VIND_CONFIG`, then the default
pub fn config_file(flag: Option<&str>) -> PathBuf {
    if let Some(file) = flag.filter(|f| !f.is_empty()) {
        tracing::debug!("config file used: {}", file);
        return PathBuf::from(file);
    }

    match std::env::var(CONFIG_ENV) {
        Ok(file) if !file.is_empty() => {
            tracing::debug!("config file from ${}: {}", CONFIG_ENV, file);
            PathBuf::from(file)
        }
        _ => {
            tracing::debug!("fall back to default config file: {}", DEFAULT_CONFIG_FILE);
            PathBuf::from(DEFAULT_CONFIG_FILE)
        }
    }
}

/// Expand a leading `~` to the current user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));

    if path == "~" {
        return home();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(path),
    }
}
