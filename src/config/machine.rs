//! Machine specification

use crate::error::{Result, VindError};
use serde::{Deserialize, Serialize};

/// Placeholder substituted with the replica index in machine name patterns
pub const INDEX_PLACEHOLDER: &str = "%d";

/// Template shared by every machine of a machine set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name pattern, e.g. `node%d`. The `%d` is replaced by the replica index
    /// and the result is also used as the machine hostname.
    pub name: String,
    /// Container image
    pub image: String,
    /// Login user, `root` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Run as a privileged container
    #[serde(default, skip_serializing_if = "is_false")]
    pub privileged: bool,
    /// Volumes attached to the machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// User-defined networks; the first one is the primary network.
    /// They have to exist before the machines are created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Ports exposed to the host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    /// Command run in the container, `/sbin/init` when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
    /// Name of a key in the key store to upload instead of the cluster key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Runtime backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl MachineSpec {
    /// Create a spec with a name pattern and an image
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }

    /// Add a port mapping
    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.port_mappings.push(mapping);
        self
    }

    /// Add a volume
    pub fn volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Attach to a network
    pub fn network(mut self, network: &str) -> Self {
        self.networks.push(network.to_string());
        self
    }

    /// The name pattern must carry exactly one index placeholder
    pub fn validate(&self) -> Result<()> {
        if self.name.matches(INDEX_PLACEHOLDER).count() != 1 {
            return Err(VindError::InvalidMachineName(self.name.clone()));
        }
        Ok(())
    }

    /// Port mapping declared for a container port
    pub fn mapping_for(&self, container_port: u16) -> Option<&PortMapping> {
        self.port_mappings
            .iter()
            .find(|m| m.container_port == container_port)
    }
}

/// Volume attached to a machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// `bind` or `volume`
    #[serde(rename = "type")]
    pub volume_type: String,
    /// Host path for binds, docker volume name (or empty) for volumes
    #[serde(default)]
    pub source: String,
    /// Mount point inside the container
    pub destination: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Volume {
    /// Bind mount of a host path
    pub fn bind(source: &str, destination: &str) -> Self {
        Self {
            volume_type: "bind".to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            read_only: false,
        }
    }

    /// `--mount` argument for the runtime
    pub fn mount_arg(&self) -> String {
        let mut mount = format!("type={}", self.volume_type);
        if !self.source.is_empty() {
            mount.push_str(&format!(",src={}", self.source));
        }
        mount.push_str(&format!(",dst={}", self.destination));
        if self.read_only {
            mount.push_str(",readonly");
        }
        mount
    }
}

/// Mapping of a machine port onto the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// `tcp` or `udp`, runtime default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Host address to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Base host port. Replica `i` binds `host_port + i`; 0 lets the
    /// runtime allocate a free port.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub host_port: u16,
    pub container_port: u16,
}

fn is_zero(value: &u16) -> bool {
    *value == 0
}

impl PortMapping {
    /// Mapping of a container port with a runtime-allocated host port
    pub fn container(container_port: u16) -> Self {
        Self {
            container_port,
            ..Default::default()
        }
    }

    /// Set the base host port
    pub fn host_port(mut self, host_port: u16) -> Self {
        self.host_port = host_port;
        self
    }

    /// Set the host bind address
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }
}
