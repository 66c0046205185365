//! Point-in-time projection of a machine for display

use super::network::RuntimeNetwork;
use crate::config::MachineSpec;
use serde::{Serialize, Serializer};
use std::fmt;

/// Lifecycle state, always re-derived from the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    NotCreated,
    Stopped,
    Running,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::NotCreated => "Not created",
            MachineState::Stopped => "Stopped",
            MachineState::Running => "Running",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MachineState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Container port and the host port it is published on (0 when unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    pub guest: u16,
    pub host: u16,
}

/// Status of one machine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub container: String,
    pub state: MachineState,
    pub spec: MachineSpec,
    pub ports: Vec<PortStatus>,
    pub machine_name: String,
    pub image: String,
    #[serde(rename = "cmd")]
    pub command: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runtime_networks: Vec<RuntimeNetwork>,
}

impl MachineStatus {
    /// Login user, `root` unless the spec names one
    pub fn user(&self) -> &str {
        self.spec
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(super::machine::DEFAULT_USER)
    }

    /// Host port of the first listed port, 0 when none
    pub fn first_host_port(&self) -> u16 {
        self.ports.first().map(|p| p.host).unwrap_or(0)
    }
}
