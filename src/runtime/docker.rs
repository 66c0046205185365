//! Docker CLI driver

use super::RuntimeDriver;
use crate::error::{Result, VindError};
use crate::exec::Cmd;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

/// Docker container ids are hex and printed alone on the first line
fn container_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-f0-9]+$").expect("valid container id regex"))
}

/// Driver shelling out to the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerDriver {
    binary: String,
}

impl Default for DockerDriver {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerDriver {
    /// Driver using a specific docker-compatible binary (e.g. `podman`)
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.binary)
    }

    fn pull(&self, image: &str, retries: u32) -> Result<()> {
        tracing::info!("Pulling image: {} ...", image);
        let pull = self.cmd().args(["pull", image]);

        let mut result = pull.run_attached();
        for attempt in 0..retries {
            let Err(e) = &result else { break };
            std::thread::sleep(Duration::from_secs(u64::from(attempt) + 1));
            tracing::info!(error = %e, "Trying again to pull image: {} ...", image);
            result = pull.run_attached();
        }

        if let Err(e) = &result {
            tracing::info!(error = %e, "Failed to pull image: {}", image);
        }
        result
    }
}

impl RuntimeDriver for DockerDriver {
    fn create(&self, image: &str, run_args: &[String], cmd: &[String]) -> Result<String> {
        let output = self
            .cmd()
            .arg("create")
            .args(run_args.iter().cloned())
            .arg(image)
            .args(cmd.iter().cloned())
            .combined_output_lines()?;

        let id = output.first().ok_or_else(|| VindError::Command {
            command: "docker create".to_string(),
            output: "failed to get container id, received no output".to_string(),
        })?;
        if !container_id_regex().is_match(id) {
            return Err(VindError::Command {
                command: "docker create".to_string(),
                output: format!("failed to get container id, output did not match: {:?}", output),
            });
        }
        Ok(id.clone())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.cmd().args(["start", name]).run()
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.cmd().args(["stop", name]).run()
    }

    fn kill(&self, signal: &str, name: &str) -> Result<()> {
        self.cmd().args(["kill", "-s", signal, name]).run()
    }

    fn remove(&self, name: &str, volumes: bool) -> Result<()> {
        let mut cmd = self.cmd().arg("rm");
        if volumes {
            cmd = cmd.arg("--volumes");
        }
        cmd.arg(name).run()
    }

    fn inspect(&self, name: &str, template: &str) -> Result<Vec<String>> {
        let lines = self
            .cmd()
            .args(["inspect", "-f", template, name])
            .quiet()
            .combined_output_lines()?;
        Ok(lines
            .into_iter()
            .map(|line| line.trim_matches('\'').to_string())
            .collect())
    }

    fn inspect_object(&self, name: &str, path: &str) -> Result<Value> {
        let template = format!("{{{{json {}}}}}", path);
        let lines = self
            .cmd()
            .args(["inspect", "-f", template.as_str(), name])
            .quiet()
            .combined_output_lines()?;
        Ok(serde_json::from_str(&lines.join("\n"))?)
    }

    fn pull_if_not_present(&self, image: &str, retries: u32) -> Result<bool> {
        if self.cmd().args(["inspect", "--type=image", image]).quiet().run().is_ok() {
            tracing::info!("Docker Image: {} present locally", image);
            return Ok(false);
        }
        self.pull(image, retries)?;
        Ok(true)
    }

    fn is_running(&self) -> Result<()> {
        self.cmd().arg("version").quiet().run().map_err(|e| {
            tracing::info!(error = %e, "Cannot connect to the Docker daemon. Is the docker daemon running?");
            VindError::RuntimeUnavailable(e.to_string())
        })
    }

    fn connect_network(&self, container: &str, network: &str, alias: Option<&str>) -> Result<()> {
        let mut cmd = self.cmd().args(["network", "connect", network, container]);
        if let Some(alias) = alias {
            cmd = cmd.args(["--alias", alias]);
        }
        cmd.run()
    }

    fn run_shell(&self, name: &str, script: &str) -> Result<()> {
        let output = self
            .cmd()
            .args(["exec", "-i", name, "/bin/bash", "-c", script])
            .combined_output_lines();
        if let Err(e) = &output {
            tracing::debug!(machine = %name, error = %e, "script failed");
        }
        output.map(|_| ())
    }

    fn copy_to(&self, host_path: &str, container: &str, dest_path: &str) -> Result<()> {
        self.cmd()
            .args(["cp", host_path])
            .arg(format!("{}:{}", container, dest_path))
            .run()
    }

    fn copy_from(&self, container: &str, src_path: &str, host_path: &str) -> Result<()> {
        self.cmd()
            .arg("cp")
            .arg(format!("{}:{}", container, src_path))
            .arg(host_path)
            .run()
    }
}
