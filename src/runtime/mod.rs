//! Container runtime drivers
//!
//! Machines never talk to a container engine directly. Everything goes through
//! [`RuntimeDriver`], a narrow command/query surface that the docker CLI
//! driver implements for real and [`RecordingDriver`] emulates in memory.

pub mod docker;
pub mod recording;

pub use docker::DockerDriver;
pub use recording::{DriverCall, RecordingDriver};

use crate::error::Result;
use serde_json::Value;

/// Inspect template answering whether a container exists
pub const NAME_FIELD: &str = "{{.Name}}";

/// Inspect template answering whether a container is running
pub const RUNNING_FIELD: &str = "{{.State.Running}}";

/// Inspect template of the host port bound to `container_port/tcp`
pub fn host_port_field(container_port: u16) -> String {
    format!(
        "{{{{(index (index .NetworkSettings.Ports \"{}/tcp\") 0).HostPort}}}}",
        container_port
    )
}

/// Operations a container runtime must offer
pub trait RuntimeDriver: Send + Sync {
    /// Create a container, returning its id
    fn create(&self, image: &str, run_args: &[String], cmd: &[String]) -> Result<String>;

    /// Start a created container
    fn start(&self, name: &str) -> Result<()>;

    /// Stop a running container
    fn stop(&self, name: &str) -> Result<()>;

    /// Send a signal to a container
    fn kill(&self, signal: &str, name: &str) -> Result<()>;

    /// Remove a container, optionally with its anonymous volumes
    fn remove(&self, name: &str, volumes: bool) -> Result<()>;

    /// Evaluate a Go template against the container, one entry per output line
    fn inspect(&self, name: &str, template: &str) -> Result<Vec<String>>;

    /// Inspect document at a dotted path (`.` for the whole document)
    fn inspect_object(&self, name: &str, path: &str) -> Result<Value>;

    /// Pull an image unless present, retrying up to `retries` times.
    /// Returns whether a pull was attempted.
    fn pull_if_not_present(&self, image: &str, retries: u32) -> Result<bool>;

    /// Fails when the runtime daemon cannot be reached
    fn is_running(&self) -> Result<()>;

    /// Connect a container to an extra network, optionally with an alias
    fn connect_network(&self, container: &str, network: &str, alias: Option<&str>) -> Result<()>;

    /// Run a bash script inside the container
    fn run_shell(&self, name: &str, script: &str) -> Result<()>;

    /// Copy a host path into the container
    fn copy_to(&self, host_path: &str, container: &str, dest_path: &str) -> Result<()>;

    /// Copy a container path onto the host
    fn copy_from(&self, container: &str, src_path: &str, host_path: &str) -> Result<()>;
}
