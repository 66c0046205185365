//! Cluster file model

use super::machine::{MachineSpec, PortMapping};
use crate::error::{Result, VindError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top level cluster file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Cluster-wide settings
    pub cluster: ClusterSpec,
    /// Machine sets of the cluster
    #[serde(default)]
    pub machine_sets: Vec<MachineSet>,
}

/// Cluster identity and SSH material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name, prefix of every container name
    pub name: String,
    /// Private SSH key used to log into the machines; `~` is expanded.
    /// When absent, every machine needs a `publicKey` from the key store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// known_hosts file where machine host keys are recorded on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<String>,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            name: "cluster".to_string(),
            private_key: None,
            known_hosts: None,
        }
    }
}

/// Machines following the same spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSet {
    /// Machine set name, prefix of every machine name
    pub name: String,
    /// Number of machines derived from the spec
    #[serde(default)]
    pub replicas: u32,
    /// Template of the machines
    pub spec: MachineSpec,
}

impl Config {
    /// Template written by `vind config create`
    pub fn template() -> Self {
        Self {
            cluster: ClusterSpec {
                name: "cluster".to_string(),
                private_key: Some("cluster-key".to_string()),
                known_hosts: None,
            },
            machine_sets: vec![MachineSet {
                name: "test".to_string(),
                replicas: 1,
                spec: MachineSpec {
                    backend: Some("docker".to_string()),
                    ..MachineSpec::new("node%d", "brightzheng100/vind-ubuntu:22.04")
                        .port(PortMapping::container(22))
                },
            }],
        }
    }

    /// Parse a cluster file from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a cluster file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VindError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the cluster file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Check every machine set; one bad set fails the whole config
    pub fn validate(&self) -> Result<()> {
        let mut invalid = Vec::new();
        for set in &self.machine_sets {
            if let Err(e) = set.spec.validate() {
                tracing::warn!(machine_set = %set.name, "{}", e);
                invalid.push(set.name.clone());
            }
        }

        if !invalid.is_empty() {
            return Err(VindError::InvalidConfig(format!(
                "machine sets with invalid name pattern: {}",
                invalid.join(", ")
            )));
        }
        Ok(())
    }
}
