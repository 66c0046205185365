//! Error types for vind

use thiserror::Error;

/// Result type for vind operations
pub type Result<T> = std::result::Result<T, VindError>;

/// vind error types
#[derive(Error, Debug)]
pub enum VindError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Machine name pattern {0:?} is not valid, it should contain %d")]
    InvalidMachineName(String),

    #[error("Container runtime is not reachable: {0}")]
    RuntimeUnavailable(String),

    #[error("Machine name not found: {0}")]
    MachineNotFound(String),

    #[error("No machineSet is configured")]
    NoMachineSets,

    #[error("Machine error ({machine}): {message}")]
    Machine { machine: String, message: String },

    #[error("Command `{command}` failed: {output}")]
    Command { command: String, output: String },

    #[error("hostport: {0}")]
    HostPort(String),

    #[error("key store: {0}")]
    KeyStore(String),

    #[error("No SSH key provided")]
    MissingSshKey,

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),

    #[error("Config path error: {0}")]
    ConfigPath(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl VindError {
    /// Wrap an error with the machine it happened on
    pub fn machine(machine: &str, err: impl std::fmt::Display) -> Self {
        VindError::Machine {
            machine: machine.to_string(),
            message: err.to_string(),
        }
    }
}
