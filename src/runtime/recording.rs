//! In-memory runtime driver
//!
//! Records every command it receives and keeps just enough container state
//! (existence, running flag, published ports, networks, mounts) to answer the
//! queries machines make. Used by tests and dry runs.

use super::{host_port_field, RuntimeDriver, NAME_FIELD, RUNNING_FIELD};
use crate::error::{Result, VindError};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// First host port handed out when a mapping leaves the host port open
const FIRST_EPHEMERAL_PORT: u16 = 32768;

/// Command received by a [`RecordingDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Create {
        image: String,
        args: Vec<String>,
        cmd: Vec<String>,
    },
    Start(String),
    Stop(String),
    Kill {
        signal: String,
        name: String,
    },
    Remove {
        name: String,
        volumes: bool,
    },
    Pull(String),
    ConnectNetwork {
        container: String,
        network: String,
        alias: Option<String>,
    },
    RunShell {
        name: String,
        script: String,
    },
    CopyTo {
        host_path: String,
        container: String,
        dest_path: String,
    },
    CopyFrom {
        container: String,
        src_path: String,
        host_path: String,
    },
}

#[derive(Debug, Clone)]
struct Published {
    address: String,
    host_port: u16,
}

#[derive(Debug, Clone)]
struct Mount {
    mount_type: String,
    source: String,
    destination: String,
    read_only: bool,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    image: String,
    cmd: Vec<String>,
    hostname: String,
    running: bool,
    ports: BTreeMap<u16, Published>,
    networks: Vec<String>,
    mounts: Vec<Mount>,
    ip_suffix: u8,
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, FakeContainer>,
    images: HashSet<String>,
    calls: Vec<DriverCall>,
    failing: HashSet<String>,
    unreachable: bool,
    next_port: u16,
    next_ip: u8,
    next_id: u64,
}

/// Runtime driver emulating a container engine in memory
#[derive(Debug, Default)]
pub struct RecordingDriver {
    state: Mutex<State>,
}

impl RecordingDriver {
    /// Create an empty driver: no images, no containers
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| VindError::Lock("Failed to acquire driver state lock".to_string()))
    }

    /// Mark an image as already present locally
    pub fn with_image(self, image: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.images.insert(image.to_string());
        }
        self
    }

    /// Simulate a daemon that cannot be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unreachable = unreachable;
        }
    }

    /// Make every future call of an operation (`"create"`, `"start"`, ...) fail
    pub fn fail_on(&self, operation: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(operation.to_string());
        }
    }

    /// Commands received so far
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Forget the recorded commands
    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.clear();
        }
    }

    /// Names of existing containers, sorted
    pub fn container_names(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.containers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Running flag of a container, `None` when it does not exist
    pub fn is_container_running(&self, name: &str) -> Option<bool> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.containers.get(name).map(|c| c.running))
    }

    fn record(&self, operation: &str, call: DriverCall) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state()?;
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(VindError::Command {
                command: operation.to_string(),
                output: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

fn no_such_container(name: &str) -> VindError {
    VindError::Command {
        command: format!("inspect {}", name),
        output: format!("Error: No such object: {}", name),
    }
}

/// Parse `[address:][host:]container[/protocol]`
fn parse_publish(spec: &str) -> Option<(String, Option<u16>, u16)> {
    let spec = spec.split('/').next()?;
    let parts: Vec<&str> = spec.split(':').collect();
    let port = |s: &str| s.parse::<u16>().ok();
    match parts.as_slice() {
        [container] => Some((String::new(), None, port(container)?)),
        [host, container] => Some((String::new(), port(host), port(container)?)),
        [address, host, container] => Some((address.to_string(), port(host), port(container)?)),
        _ => None,
    }
}

fn parse_mount(spec: &str) -> Mount {
    let mut mount = Mount {
        mount_type: String::new(),
        source: String::new(),
        destination: String::new(),
        read_only: false,
    };
    for field in spec.split(',') {
        match field.split_once('=') {
            Some(("type", v)) => mount.mount_type = v.to_string(),
            Some(("src", v)) | Some(("source", v)) => mount.source = v.to_string(),
            Some(("dst", v)) | Some(("destination", v)) => mount.destination = v.to_string(),
            None if field == "readonly" => mount.read_only = true,
            _ => {}
        }
    }
    mount
}

impl FakeContainer {
    fn document(&self, name: &str) -> Value {
        let ports: Map<String, Value> = self
            .ports
            .iter()
            .map(|(container_port, published)| {
                let address = if published.address.is_empty() {
                    "0.0.0.0"
                } else {
                    published.address.as_str()
                };
                (
                    format!("{}/tcp", container_port),
                    json!([{ "HostIp": address, "HostPort": published.host_port.to_string() }]),
                )
            })
            .collect();

        let networks: Map<String, Value> = self
            .networks
            .iter()
            .map(|network| {
                (
                    network.clone(),
                    json!({
                        "IPAddress": format!("172.17.0.{}", self.ip_suffix),
                        "IPPrefixLen": 16,
                        "Gateway": "172.17.0.1",
                    }),
                )
            })
            .collect();

        let mounts: Vec<Value> = self
            .mounts
            .iter()
            .map(|m| {
                json!({
                    "Type": m.mount_type,
                    "Source": m.source,
                    "Destination": m.destination,
                    "RW": !m.read_only,
                })
            })
            .collect();

        json!({
            "Name": format!("/{}", name),
            "State": { "Running": self.running },
            "Config": { "Hostname": self.hostname, "Image": self.image, "Cmd": self.cmd },
            "Mounts": mounts,
            "NetworkSettings": { "Ports": ports, "Networks": networks },
        })
    }
}

impl RuntimeDriver for RecordingDriver {
    fn create(&self, image: &str, run_args: &[String], cmd: &[String]) -> Result<String> {
        let mut state = self.record(
            "create",
            DriverCall::Create {
                image: image.to_string(),
                args: run_args.to_vec(),
                cmd: cmd.to_vec(),
            },
        )?;

        if state.next_port == 0 {
            state.next_port = FIRST_EPHEMERAL_PORT;
        }
        if state.next_ip == 0 {
            state.next_ip = 2;
        }

        let mut name = None;
        let mut container = FakeContainer {
            image: image.to_string(),
            cmd: cmd.to_vec(),
            hostname: String::new(),
            running: false,
            ports: BTreeMap::new(),
            networks: Vec::new(),
            mounts: Vec::new(),
            ip_suffix: state.next_ip,
        };

        let mut args = run_args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--name" => name = args.next().cloned(),
                "--hostname" => container.hostname = args.next().cloned().unwrap_or_default(),
                "--network" => container.networks.extend(args.next().cloned()),
                "--mount" => container.mounts.extend(args.next().map(|m| parse_mount(m))),
                "-p" => {
                    let Some((address, host_port, container_port)) =
                        args.next().and_then(|p| parse_publish(p))
                    else {
                        continue;
                    };
                    let host_port = match host_port {
                        Some(port) => port,
                        None => {
                            let port = state.next_port;
                            state.next_port += 1;
                            port
                        }
                    };
                    container.ports.insert(container_port, Published { address, host_port });
                }
                _ => {}
            }
        }

        let name = name.ok_or_else(|| VindError::Command {
            command: "create".to_string(),
            output: "container name is required".to_string(),
        })?;
        if state.containers.contains_key(&name) {
            return Err(VindError::Command {
                command: "create".to_string(),
                output: format!("Conflict. The container name \"/{}\" is already in use", name),
            });
        }
        if container.networks.is_empty() {
            container.networks.push("bridge".to_string());
        }

        state.next_ip = state.next_ip.wrapping_add(1).max(2);
        state.next_id += 1;
        let id = format!("{:012x}", state.next_id);
        state.containers.insert(name, container);
        Ok(id)
    }

    fn start(&self, name: &str) -> Result<()> {
        let mut state = self.record("start", DriverCall::Start(name.to_string()))?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| no_such_container(name))?;
        container.running = true;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.record("stop", DriverCall::Stop(name.to_string()))?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| no_such_container(name))?;
        container.running = false;
        Ok(())
    }

    fn kill(&self, signal: &str, name: &str) -> Result<()> {
        let mut state = self.record(
            "kill",
            DriverCall::Kill {
                signal: signal.to_string(),
                name: name.to_string(),
            },
        )?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| no_such_container(name))?;
        container.running = false;
        Ok(())
    }

    fn remove(&self, name: &str, volumes: bool) -> Result<()> {
        let mut state = self.record(
            "remove",
            DriverCall::Remove {
                name: name.to_string(),
                volumes,
            },
        )?;
        match state.containers.get(name) {
            Some(container) if container.running => Err(VindError::Command {
                command: format!("rm {}", name),
                output: "You cannot remove a running container".to_string(),
            }),
            Some(_) => {
                state.containers.remove(name);
                Ok(())
            }
            None => Err(no_such_container(name)),
        }
    }

    fn inspect(&self, name: &str, template: &str) -> Result<Vec<String>> {
        let state = self.state()?;
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| no_such_container(name))?;

        if template == NAME_FIELD {
            return Ok(vec![format!("/{}", name)]);
        }
        if template == RUNNING_FIELD {
            return Ok(vec![container.running.to_string()]);
        }
        container
            .ports
            .iter()
            .find(|(port, _)| host_port_field(**port) == template)
            .map(|(_, published)| vec![published.host_port.to_string()])
            .ok_or_else(|| VindError::Command {
                command: format!("inspect -f {} {}", template, name),
                output: "template: error calling index: index out of range".to_string(),
            })
    }

    fn inspect_object(&self, name: &str, path: &str) -> Result<Value> {
        let state = self.state()?;
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| no_such_container(name))?;

        let mut value = container.document(name);
        for key in path.split('.').filter(|k| !k.is_empty()) {
            value = value.get(key).cloned().unwrap_or(Value::Null);
        }
        Ok(value)
    }

    fn pull_if_not_present(&self, image: &str, _retries: u32) -> Result<bool> {
        if self.state()?.images.contains(image) {
            return Ok(false);
        }
        let mut state = self.record("pull", DriverCall::Pull(image.to_string()))?;
        state.images.insert(image.to_string());
        Ok(true)
    }

    fn is_running(&self) -> Result<()> {
        if self.state()?.unreachable {
            return Err(VindError::RuntimeUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(())
    }

    fn connect_network(&self, container: &str, network: &str, alias: Option<&str>) -> Result<()> {
        let mut state = self.record(
            "connect_network",
            DriverCall::ConnectNetwork {
                container: container.to_string(),
                network: network.to_string(),
                alias: alias.map(str::to_string),
            },
        )?;
        let target = state
            .containers
            .get_mut(container)
            .ok_or_else(|| no_such_container(container))?;
        target.networks.push(network.to_string());
        Ok(())
    }

    fn run_shell(&self, name: &str, script: &str) -> Result<()> {
        let state = self.record(
            "run_shell",
            DriverCall::RunShell {
                name: name.to_string(),
                script: script.to_string(),
            },
        )?;
        match state.containers.get(name) {
            Some(container) if container.running => Ok(()),
            Some(_) => Err(VindError::machine(name, "container is not running")),
            None => Err(no_such_container(name)),
        }
    }

    fn copy_to(&self, host_path: &str, container: &str, dest_path: &str) -> Result<()> {
        let state = self.record(
            "copy_to",
            DriverCall::CopyTo {
                host_path: host_path.to_string(),
                container: container.to_string(),
                dest_path: dest_path.to_string(),
            },
        )?;
        if !state.containers.contains_key(container) {
            return Err(no_such_container(container));
        }
        Ok(())
    }

    fn copy_from(&self, container: &str, src_path: &str, host_path: &str) -> Result<()> {
        let state = self.record(
            "copy_from",
            DriverCall::CopyFrom {
                container: container.to_string(),
                src_path: src_path.to_string(),
                host_path: host_path.to_string(),
            },
        )?;
        if !state.containers.contains_key(container) {
            return Err(no_such_container(container));
        }
        Ok(())
    }
}
