//! Machine lifecycle
//!
//! A [`Machine`] is one replica of a machine set. It is a cheap handle
//! rebuilt from the config and a replica index whenever needed; whether the
//! machine exists, runs, or which port it got is always asked to the runtime.

use super::inspect::{self, EndpointSettings, InspectContainer};
use super::naming;
use super::network::RuntimeNetwork;
use super::ssh::SshConnector;
use super::status::{MachineState, MachineStatus, PortStatus};
use crate::config::{ClusterSpec, MachineSet, MachineSpec, PortMapping, Volume};
use crate::error::{Result, VindError};
use crate::runtime::{host_port_field, RuntimeDriver, NAME_FIELD, RUNNING_FIELD};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Login user when the spec names none
pub const DEFAULT_USER: &str = "root";

/// Command run when the spec names none
pub const DEFAULT_CMD: &str = "/sbin/init";

/// Network every container joins when none is given; never aliased
pub const DEFAULT_NETWORK: &str = "bridge";

/// Mount point where the host filesystem is expected for auto `cd`
const HOST_MOUNT: &str = "/host";

/// Label marking containers managed by vind
const CREATOR_LABEL: &str = "creator=vind";

/// One replica of a machine set
pub struct Machine<'a> {
    spec: Cow<'a, MachineSpec>,
    index: u32,
    container_name: String,
    machine_name: String,
    driver: &'a dyn RuntimeDriver,
    /// container port -> host port
    ports: HashMap<u16, u16>,
    runtime_networks: Vec<RuntimeNetwork>,
}

impl<'a> Machine<'a> {
    /// Replica `index` of `machine_set` in `cluster`
    pub fn new(
        cluster: &ClusterSpec,
        machine_set: &'a MachineSet,
        index: u32,
        driver: &'a dyn RuntimeDriver,
    ) -> Self {
        let pattern = &machine_set.spec.name;
        Self {
            spec: Cow::Borrowed(&machine_set.spec),
            index,
            container_name: naming::container_name(&cluster.name, &machine_set.name, pattern, index),
            machine_name: naming::machine_name(&machine_set.name, pattern, index),
            driver,
            ports: HashMap::new(),
            runtime_networks: Vec::new(),
        }
    }

    pub fn spec(&self) -> &MachineSpec {
        &self.spec
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Container name in the runtime
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Machine name, also the hostname
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Login user, `root` unless the spec names one
    pub fn user(&self) -> &str {
        self.spec
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_USER)
    }

    /// Whether the container exists, running or not
    pub fn is_created(&self) -> bool {
        match self.driver.inspect(&self.container_name, NAME_FIELD) {
            Ok(lines) => lines.first().is_some_and(|l| !l.is_empty()),
            Err(_) => false,
        }
    }

    /// Whether the container is running
    pub fn is_started(&self) -> bool {
        self.driver
            .inspect(&self.container_name, RUNNING_FIELD)
            .ok()
            .and_then(|lines| lines.first().and_then(|l| l.trim_matches('\'').parse().ok()))
            .unwrap_or(false)
    }

    /// Current lifecycle state
    pub fn state(&self) -> MachineState {
        if !self.is_created() {
            MachineState::NotCreated
        } else if self.is_started() {
            MachineState::Running
        } else {
            MachineState::Stopped
        }
    }

    /// Arguments given to the runtime when creating the container
    pub fn run_args(&self, cluster_name: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-it".into(),
            "--label".into(),
            CREATOR_LABEL.into(),
            "--label".into(),
            format!("cluster={}", cluster_name),
            "--label".into(),
            format!("index={}", self.index),
            "--name".into(),
            self.container_name.clone(),
            "--hostname".into(),
            self.machine_name.clone(),
            "--tmpfs".into(),
            "/run".into(),
            "--tmpfs".into(),
            "/run/lock".into(),
            "--tmpfs".into(),
            "/tmp:exec,mode=777".into(),
        ];

        for volume in &self.spec.volumes {
            args.push("--mount".into());
            args.push(volume.mount_arg());
        }

        for mapping in &self.spec.port_mappings {
            args.push("-p".into());
            args.push(naming::publish_arg(mapping, self.index));
        }

        if self.spec.privileged {
            args.push("--privileged".into());
        }

        if let Some(network) = self.spec.networks.first() {
            tracing::info!("Connecting {} to the {} network...", self.machine_name, network);
            args.push("--network".into());
            args.push(network.clone());
            if network != DEFAULT_NETWORK {
                args.push("--network-alias".into());
                args.push(self.machine_name.clone());
            }
        }

        args
    }

    /// Command the container runs
    pub fn command(&self) -> Vec<String> {
        let cmd = self.spec.cmd.trim();
        if cmd.is_empty() {
            return vec![DEFAULT_CMD.to_string()];
        }
        cmd.split_whitespace().map(str::to_string).collect()
    }

    fn context(&self, operation: &'static str) -> impl Fn(VindError) -> VindError + '_ {
        move |e| VindError::machine(&self.container_name, format!("{}: {}", operation, e))
    }

    /// Create, start and provision the machine, authorizing `public_key`.
    /// Nothing happens when the container already exists. A failure leaves
    /// the container as the last successful step left it.
    pub fn create(&mut self, cluster_name: &str, public_key: &[u8]) -> Result<()> {
        tracing::info!("Creating machine: {} ...", self.container_name);

        if self.is_created() {
            tracing::info!("Machine {} is already created...", self.container_name);
            return Ok(());
        }

        let run_args = self.run_args(cluster_name);
        self.driver
            .create(&self.spec.image, &run_args, &self.command())
            .map_err(self.context("create"))?;

        for network in self.spec.networks.iter().skip(1) {
            tracing::info!("Connecting {} to the {} network...", self.machine_name, network);
            let alias = (network != DEFAULT_NETWORK).then_some(self.machine_name.as_str());
            self.driver
                .connect_network(&self.container_name, network, alias)
                .map_err(self.context("connect network"))?;
        }

        tracing::info!("Starting machine {}...", self.machine_name);
        self.driver
            .start(&self.container_name)
            .map_err(self.context("start"))?;

        let user = self.user();
        self.driver
            .run_shell(&self.container_name, &provision_script(user))
            .map_err(self.context("provision"))?;
        self.driver
            .run_shell(
                &self.container_name,
                &append_script(&authorized_keys_path(user), public_key),
            )
            .map_err(self.context("upload public key"))?;

        Ok(())
    }

    /// Start a stopped machine
    pub fn start(&self) -> Result<()> {
        if !self.is_created() {
            tracing::info!("Machine {} hasn't been created...", self.machine_name);
            return Ok(());
        }
        if self.is_started() {
            tracing::info!("Machine {} is already started...", self.machine_name);
            return Ok(());
        }
        tracing::info!("Starting machine: {} ...", self.machine_name);
        self.driver.start(&self.container_name)
    }

    /// Stop a running machine
    pub fn stop(&self) -> Result<()> {
        if !self.is_created() {
            tracing::info!("Machine {} hasn't been created...", self.container_name);
            return Ok(());
        }
        if !self.is_started() {
            tracing::info!("Machine {} is already stopped...", self.container_name);
            return Ok(());
        }
        tracing::info!("Stopping machine: {} ...", self.container_name);
        self.driver.stop(&self.container_name)
    }

    /// Remove the machine and its volumes, killing it first when running
    pub fn delete(&self) -> Result<()> {
        if !self.is_created() {
            tracing::info!("Machine {} hasn't been created", self.machine_name);
            return Ok(());
        }

        if self.is_started() {
            tracing::info!(
                "Machine {} is started, stopping and deleting machine...",
                self.machine_name
            );
            self.driver.kill("KILL", &self.container_name)?;
        } else {
            tracing::info!("Deleting machine: {} ...", self.machine_name);
        }
        self.driver.remove(&self.container_name, true)
    }

    /// Host port bound to `container_port/tcp`
    pub fn host_port(&mut self, container_port: u16) -> Result<u16> {
        if let Some(port) = self.ports.get(&container_port) {
            return Ok(*port);
        }

        let lines = self
            .driver
            .inspect(&self.container_name, &host_port_field(container_port))
            .map_err(|e| {
                VindError::HostPort(format!(
                    "failed to inspect container {}: {}",
                    self.container_name, e
                ))
            })?;
        if lines.len() != 1 {
            return Err(VindError::HostPort(format!(
                "should only be one line, got {} lines",
                lines.len()
            )));
        }

        let port = lines[0].replace('\'', "");
        let port: u16 = port.trim().parse().map_err(|e| {
            VindError::HostPort(format!("failed to parse {:?} as a port: {}", port, e))
        })?;

        self.ports.insert(container_port, port);
        Ok(port)
    }

    /// Host address a container port is published on, `localhost` by default
    pub fn address(&self, container_port: u16) -> Result<String> {
        let mapping = self.spec.mapping_for(container_port).ok_or_else(|| {
            VindError::machine(
                &self.machine_name,
                format!("unknown containerPort {}", container_port),
            )
        })?;
        Ok(mapping
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or("localhost")
            .to_string())
    }

    /// Networks the container is attached to
    pub fn networks(&mut self) -> Result<&[RuntimeNetwork]> {
        if self.runtime_networks.is_empty() {
            let value = self
                .driver
                .inspect_object(&self.container_name, ".NetworkSettings.Networks")?;
            let endpoints: BTreeMap<String, EndpointSettings> = if value.is_null() {
                BTreeMap::new()
            } else {
                serde_json::from_value(value)?
            };
            self.runtime_networks = RuntimeNetwork::from_endpoints(&endpoints);
        }
        Ok(&self.runtime_networks)
    }

    /// Addresses of the machine, one per known network
    pub fn ips(&self) -> Vec<String> {
        self.runtime_networks.iter().map(|n| n.ip.clone()).collect()
    }

    /// RSA host key of the machine's sshd, in known_hosts format
    pub fn host_key(&mut self, ssh: &SshConnector) -> Result<String> {
        let port = self.host_port(22)?;
        let remote = self.address(22)?;
        ssh.scan_host_key(port, &remote)
    }

    /// Snapshot for display. Runtime errors degrade to empty fields.
    pub fn status(&mut self) -> MachineStatus {
        let state = self.state();

        let mut ports = Vec::new();
        if state != MachineState::NotCreated {
            if let Err(e) = self.networks().map(|_| ()) {
                tracing::debug!(machine = %self.machine_name, error = %e, "no network information");
            }
            let guests: Vec<u16> = self.spec.port_mappings.iter().map(|m| m.container_port).collect();
            for guest in guests {
                let host = self.host_port(guest).unwrap_or(0);
                ports.push(PortStatus { guest, host });
            }
        }
        if ports.is_empty() {
            ports = self
                .spec
                .port_mappings
                .iter()
                .map(|m| PortStatus {
                    guest: m.container_port,
                    host: 0,
                })
                .collect();
        }

        MachineStatus {
            container: self.container_name.clone(),
            state,
            spec: self.spec.as_ref().clone(),
            ports,
            machine_name: self.machine_name.clone(),
            image: self.spec.image.clone(),
            command: self.spec.cmd.clone(),
            ip: self.ips().join(","),
            runtime_networks: self.runtime_networks.clone(),
        }
    }

    /// Directory to `cd` into after login: the host working directory seen
    /// through a bind mount of `/` on `/host`
    pub fn auto_cd_to(&self) -> Option<String> {
        self.spec
            .volumes
            .iter()
            .any(|v| v.volume_type == "bind" && v.destination == HOST_MOUNT)
            .then(|| match std::env::current_dir() {
                Ok(cwd) => format!("{}{}", HOST_MOUNT, cwd.display()),
                Err(e) => {
                    tracing::warn!("can't get current working directory: {}", e);
                    HOST_MOUNT.to_string()
                }
            })
    }

    /// Replace spec fields with what the runtime reports for the container
    pub fn apply_inspect(&mut self, inspect: InspectContainer) {
        let settings = inspect.network_settings.unwrap_or_default();

        let mut port_mappings = Vec::new();
        for (key, bindings) in &settings.ports {
            let (Some(container_port), Some(binding)) = (
                inspect::container_port(key),
                bindings.as_ref().and_then(|b| b.first()),
            ) else {
                continue;
            };
            let host_port = binding.host_port.parse().unwrap_or(0);
            if host_port != 0 {
                self.ports.insert(container_port, host_port);
            }
            port_mappings.push(PortMapping {
                protocol: None,
                address: Some(binding.host_ip.clone()).filter(|a| !a.is_empty()),
                host_port,
                container_port,
            });
        }

        let volumes = inspect
            .mounts
            .into_iter()
            .map(|m| Volume {
                volume_type: m.mount_type,
                source: m.source,
                destination: m.destination,
                read_only: !m.rw,
            })
            .collect();

        self.runtime_networks = RuntimeNetwork::from_endpoints(&settings.networks);

        let spec = self.spec.to_mut();
        spec.port_mappings = port_mappings;
        spec.volumes = volumes;
        spec.cmd = inspect.config.map(|c| c.cmd.join(",")).unwrap_or_default();
    }
}

/// `authorized_keys` of a login user
pub fn authorized_keys_path(user: &str) -> String {
    if user == DEFAULT_USER {
        "/root/.ssh/authorized_keys".to_string()
    } else {
        format!("/home/{}/.ssh/authorized_keys", user)
    }
}

/// Script preparing the SSH directory of `user`; safe to run again
pub fn provision_script(user: &str) -> String {
    format!(
        r#"
set -e
rm -f /run/nologin
u={}
if [[ "$u" == "root" ]]; then
	sshdir=/root/.ssh
	mkdir -p $sshdir; chmod 700 $sshdir
	touch $sshdir/authorized_keys; chmod 600 $sshdir/authorized_keys
else
	sshdir=/home/$u/.ssh
	mkdir -p $sshdir; chmod 700 $sshdir
	touch $sshdir/authorized_keys; chmod 600 $sshdir/authorized_keys
	chown -R $u:$u /home/$u/
fi
"#,
        user
    )
}

/// Script appending `content` to `path` through a here-document
pub fn append_script(path: &str, content: &[u8]) -> String {
    format!(
        "cat <<__EOF | tee -a {}\n{}__EOF",
        path,
        String::from_utf8_lossy(content)
    )
}
