//! Cluster: machine enumeration and bulk operations

use super::inspect::InspectContainer;
use super::key_store::KeyStore;
use super::machine::Machine;
use super::ssh::{self, SshConnector};
use super::status::MachineStatus;
use crate::config::{expand_home, Config, MachineSpec};
use crate::error::{Result, VindError};
use crate::exec::Cmd;
use crate::runtime::RuntimeDriver;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extra pull attempts when an image is missing locally
const PULL_RETRIES: u32 = 2;

/// Cluster described by a config, realized through a runtime driver
pub struct Cluster {
    config: Config,
    driver: Arc<dyn RuntimeDriver>,
    key_store: Option<KeyStore>,
    ssh: SshConnector,
}

impl Cluster {
    /// Create a cluster from a validated config
    pub fn new(config: Config, driver: Arc<dyn RuntimeDriver>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            driver,
            key_store: None,
            ssh: SshConnector::default(),
        })
    }

    /// Create a cluster from a YAML document
    pub fn from_yaml(content: &str, driver: Arc<dyn RuntimeDriver>) -> Result<Self> {
        Self::new(Config::from_yaml(content)?, driver)
    }

    /// Create a cluster from a cluster file
    pub fn from_file(path: &Path, driver: Arc<dyn RuntimeDriver>) -> Result<Self> {
        Self::new(Config::from_file(path)?, driver)
    }

    /// Store where per-machine public keys are looked up
    pub fn with_key_store(mut self, key_store: KeyStore) -> Self {
        self.key_store = Some(key_store);
        self
    }

    /// Use a specific SSH connector
    pub fn with_ssh(mut self, ssh: SshConnector) -> Self {
        self.ssh = ssh;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.cluster.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn key_store(&self) -> Option<&KeyStore> {
        self.key_store.as_ref()
    }

    /// Write the cluster config as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        self.config.save(path)
    }

    /// Private key file with `~` expanded
    pub fn private_key_path(&self) -> Option<PathBuf> {
        self.config
            .cluster
            .private_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(expand_home)
    }

    /// Every machine of every machine set, derived afresh
    pub fn machines(&self) -> impl Iterator<Item = Machine<'_>> + '_ {
        let driver = self.driver.as_ref();
        self.config.machine_sets.iter().flat_map(move |set| {
            (0..set.replicas).map(move |i| Machine::new(&self.config.cluster, set, i, driver))
        })
    }

    /// Run `action` on every machine, stopping at the first error
    pub fn for_each_machine<F>(&self, mut action: F) -> Result<()>
    where
        F: FnMut(&mut Machine<'_>) -> Result<()>,
    {
        for mut machine in self.machines() {
            action(&mut machine)?;
        }
        Ok(())
    }

    /// Run `action` on the machines named in `names`, stopping at the first
    /// error. Names matching no machine are warned about and returned.
    pub fn for_specific_machines<F>(&self, names: &[String], mut action: F) -> Result<Vec<String>>
    where
        F: FnMut(&mut Machine<'_>) -> Result<()>,
    {
        let mut handled: BTreeMap<&str, bool> = names.iter().map(|n| (n.as_str(), false)).collect();

        for mut machine in self.machines() {
            if let Some(found) = handled.get_mut(machine.machine_name()) {
                action(&mut machine)?;
                *found = true;
            }
        }

        let missing: Vec<String> = handled
            .into_iter()
            .filter(|(_, found)| !found)
            .map(|(name, _)| name.to_string())
            .collect();
        for name in &missing {
            tracing::warn!("machine {} does not exist", name);
        }
        Ok(missing)
    }

    fn for_machines<F>(&self, names: &[String], action: F) -> Result<()>
    where
        F: FnMut(&mut Machine<'_>) -> Result<()>,
    {
        if names.is_empty() {
            self.for_each_machine(action)
        } else {
            self.for_specific_machines(names, action).map(|_| ())
        }
    }

    /// Generate the cluster key pair unless the private key exists
    fn ensure_ssh_key(&self) -> Result<()> {
        let Some(path) = self.private_key_path() else {
            return Ok(());
        };
        if path.exists() {
            return Ok(());
        }

        tracing::info!("Creating SSH key: {} ...", path.display());
        Cmd::new("ssh-keygen")
            .args(["-q", "-t", "rsa", "-b", "4096", "-C"])
            .arg(format!("{}@vind.mail", self.name()))
            .arg("-f")
            .arg(path.display().to_string())
            .args(["-N", ""])
            .run()
    }

    /// Public key authorized on a machine: its named key from the key store
    /// when both exist, else the `.pub` next to the cluster private key
    pub fn public_key(&self, spec: &MachineSpec) -> Result<Vec<u8>> {
        if let (Some(name), Some(store)) = (spec.public_key.as_deref(), &self.key_store) {
            let mut key = store.get(name)?;
            key.push(b'\n');
            return Ok(key);
        }

        let path = self.private_key_path().ok_or(VindError::MissingSshKey)?;
        let mut public = path.into_os_string();
        public.push(".pub");
        let public = PathBuf::from(public);
        std::fs::read(&public).map_err(|e| {
            VindError::InvalidConfig(format!(
                "can't read public key {}: {}",
                public.display(),
                e
            ))
        })
    }

    /// Create every machine: key pair, runtime check, image pulls, then the
    /// machines themselves. Host keys are recorded when `knownHosts` is set.
    pub fn create(&self) -> Result<()> {
        self.ensure_ssh_key()?;
        self.driver.is_running()?;

        for set in &self.config.machine_sets {
            self.driver.pull_if_not_present(&set.spec.image, PULL_RETRIES)?;
        }

        let cluster_name = self.name();
        self.for_each_machine(|machine| {
            let key = self.public_key(machine.spec()).map_err(|e| {
                VindError::machine(
                    machine.machine_name(),
                    format!("can't retrieve public key: {}", e),
                )
            })?;
            machine.create(cluster_name, &key)
        })?;

        if let Some(known_hosts) = self.config.cluster.known_hosts.as_deref() {
            self.record_host_keys(&expand_home(known_hosts))?;
        }
        Ok(())
    }

    fn record_host_keys(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        self.for_each_machine(|machine| {
            if !machine.spec().port_mappings.iter().any(|m| m.container_port == 22) {
                tracing::warn!("{} does not publish port 22, not recording its host key", machine.machine_name());
                return Ok(());
            }

            tracing::info!("Recording host key of {} ...", machine.machine_name());
            match machine.host_key(&self.ssh) {
                Ok(key) => file.write_all(key.as_bytes())?,
                Err(e) => {
                    tracing::warn!(error = %e, "could not record host key of {}", machine.machine_name())
                }
            }
            Ok(())
        })
    }

    /// Delete every machine
    pub fn delete(&self) -> Result<()> {
        self.driver.is_running()?;
        self.for_each_machine(|machine| machine.delete())
    }

    /// Start all machines, or only the named ones
    pub fn start(&self, names: &[String]) -> Result<()> {
        self.driver.is_running()?;
        self.for_machines(names, |machine| machine.start())
    }

    /// Stop all machines, or only the named ones
    pub fn stop(&self, names: &[String]) -> Result<()> {
        self.driver.is_running()?;
        self.for_machines(names, |machine| machine.stop())
    }

    /// Status of created machines, all or only the named ones, with the
    /// ports, volumes, networks and command the runtime reports
    pub fn show(&self, names: &[String]) -> Result<Vec<MachineStatus>> {
        self.driver.is_running()?;

        let mut statuses = Vec::new();
        for mut machine in self.machines() {
            if !names.is_empty() && !names.iter().any(|n| n == machine.machine_name()) {
                continue;
            }
            if !machine.is_created() {
                tracing::warn!("machine not created: {}", machine.machine_name());
                continue;
            }

            let document = self.driver.inspect_object(machine.container_name(), ".")?;
            let inspect: InspectContainer = serde_json::from_value(document)?;
            machine.apply_inspect(inspect);
            statuses.push(machine.status());
        }
        Ok(statuses)
    }

    /// Machine with the given machine name
    pub fn machine_by_name(&self, name: &str) -> Result<Machine<'_>> {
        self.machines()
            .find(|m| m.machine_name() == name)
            .ok_or_else(|| VindError::MachineNotFound(name.to_string()))
    }

    /// First replica of the first machine set
    pub fn first_machine(&self) -> Result<Machine<'_>> {
        let set = self
            .config
            .machine_sets
            .first()
            .ok_or(VindError::NoMachineSets)?;
        Ok(Machine::new(
            &self.config.cluster,
            set,
            0,
            self.driver.as_ref(),
        ))
    }

    /// Log into a machine. `extra` is passed to ssh after the destination;
    /// without it the session lands in the mirrored working directory when
    /// the host filesystem is mounted on `/host`.
    pub fn ssh(&self, machine: &mut Machine<'_>, user: &str, extra: &[String]) -> Result<()> {
        tracing::info!(
            "SSH into machine [{}] with user [{}]",
            machine.machine_name(),
            user
        );

        let port = machine.host_port(22)?;
        let remote = machine.address(22)?;
        let key = self.private_key_path().ok_or(VindError::MissingSshKey)?;

        let auto_cd = machine.auto_cd_to();
        if !extra.is_empty() {
            tracing::info!("With extra SSH args: {}", extra.join(" "));
        } else if let Some(dir) = &auto_cd {
            tracing::info!("Trying to cd into: {}", dir);
        }

        let args = ssh::ssh_args(&key, port, user, &remote, extra, auto_cd.as_deref());
        self.ssh.connect(&args)
    }

    /// Copy a path out of a machine onto the host
    pub fn copy_from(&self, from: &Machine<'_>, src_path: &str, dest_path: &str) -> Result<()> {
        self.driver
            .copy_from(from.container_name(), src_path, dest_path)
    }

    /// Copy a host path into a machine
    pub fn copy_to(&self, src_path: &str, to: &Machine<'_>, dest_path: &str) -> Result<()> {
        self.driver.copy_to(src_path, to.container_name(), dest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MachineState;
    use crate::runtime::{DriverCall, RecordingDriver};
    use std::collections::HashSet;
    use tempfile::TempDir;

    const CLUSTER_YAML: &str = r#"
cluster:
  name: c
machineSets:
- name: set
  replicas: 2
  spec:
    name: node%d
    image: img
    portMappings:
    - containerPort: 22
      hostPort: 2222
"#;

    fn cluster_with_key(yaml: &str) -> (TempDir, Arc<RecordingDriver>, Cluster) {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("cluster-key");
        std::fs::write(&key, "PRIVATE").unwrap();
        std::fs::write(temp.path().join("cluster-key.pub"), "ssh-rsa PUBLIC c@vind.mail\n").unwrap();

        let mut config = Config::from_yaml(yaml).unwrap();
        config.cluster.private_key = Some(key.display().to_string());

        let driver = Arc::new(RecordingDriver::new().with_image("img"));
        let cluster = Cluster::new(config, driver.clone()).unwrap();
        (temp, driver, cluster)
    }

    #[test]
    fn test_enumeration() {
        let cluster = Cluster::from_yaml(CLUSTER_YAML, Arc::new(RecordingDriver::new())).unwrap();

        let machines: Vec<_> = cluster.machines().collect();
        let names: Vec<&str> = machines.iter().map(|m| m.machine_name()).collect();
        let containers: Vec<&str> = machines.iter().map(|m| m.container_name()).collect();
        assert_eq!(names, vec!["set-node0", "set-node1"]);
        assert_eq!(containers, vec!["c-set-node0", "c-set-node1"]);

        let publishes: Vec<String> = machines
            .iter()
            .map(|m| {
                let args = m.run_args("c");
                let p = args.iter().position(|a| a == "-p").unwrap();
                args[p + 1].clone()
            })
            .collect();
        assert_eq!(publishes, vec!["2222:22", "2223:22"]);
    }

    #[test]
    fn test_names_are_pairwise_distinct() {
        let yaml = r#"
cluster:
  name: c
machineSets:
- name: a
  replicas: 5
  spec: {name: "n%d", image: img}
- name: b
  replicas: 3
  spec: {name: "n%d-x", image: img}
"#;
        let cluster = Cluster::from_yaml(yaml, Arc::new(RecordingDriver::new())).unwrap();

        let names: HashSet<String> = cluster.machines().map(|m| m.machine_name().to_string()).collect();
        let containers: HashSet<String> =
            cluster.machines().map(|m| m.container_name().to_string()).collect();
        assert_eq!(names.len(), 8);
        assert_eq!(containers.len(), 8);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let yaml = CLUSTER_YAML.replace("node%d", "node");
        assert!(Cluster::from_yaml(&yaml, Arc::new(RecordingDriver::new())).is_err());
    }

    #[test]
    fn test_named_subset() {
        let cluster = Cluster::from_yaml(CLUSTER_YAML, Arc::new(RecordingDriver::new())).unwrap();

        let mut visited = Vec::new();
        let names = vec!["set-node0".to_string(), "set-nodeX".to_string()];
        let missing = cluster
            .for_specific_machines(&names, |m| {
                visited.push(m.machine_name().to_string());
                Ok(())
            })
            .unwrap();

        assert_eq!(visited, vec!["set-node0"]);
        assert_eq!(missing, vec!["set-nodeX"]);
    }

    #[test]
    fn test_sweep_stops_at_first_error() {
        let cluster = Cluster::from_yaml(CLUSTER_YAML, Arc::new(RecordingDriver::new())).unwrap();

        let mut visited = 0;
        let result = cluster.for_each_machine(|_| {
            visited += 1;
            Err(VindError::Ssh("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_zero_machine_sets() {
        let cluster = Cluster::from_yaml("cluster:\n  name: c\n", Arc::new(RecordingDriver::new())).unwrap();

        assert!(cluster.for_each_machine(|_| Ok(())).is_ok());
        assert!(matches!(cluster.first_machine(), Err(VindError::NoMachineSets)));
    }

    #[test]
    fn test_first_machine_and_lookup() {
        let cluster = Cluster::from_yaml(CLUSTER_YAML, Arc::new(RecordingDriver::new())).unwrap();

        let first = cluster.first_machine().unwrap();
        assert_eq!(first.machine_name(), "set-node0");
        assert_eq!(first.index(), 0);

        assert_eq!(cluster.machine_by_name("set-node1").unwrap().index(), 1);
        assert!(matches!(
            cluster.machine_by_name("set-node7"),
            Err(VindError::MachineNotFound(_))
        ));
    }

    #[test]
    fn test_unreachable_runtime_fails_fast() {
        let (_temp, driver, cluster) = cluster_with_key(CLUSTER_YAML);
        driver.set_unreachable(true);

        assert!(matches!(cluster.create(), Err(VindError::RuntimeUnavailable(_))));
        assert!(matches!(cluster.start(&[]), Err(VindError::RuntimeUnavailable(_))));
        assert!(matches!(cluster.stop(&[]), Err(VindError::RuntimeUnavailable(_))));
        assert!(matches!(cluster.delete(), Err(VindError::RuntimeUnavailable(_))));
        assert!(matches!(cluster.show(&[]), Err(VindError::RuntimeUnavailable(_))));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_create_uploads_cluster_key() {
        let (_temp, driver, cluster) = cluster_with_key(CLUSTER_YAML);
        cluster.create().unwrap();

        assert_eq!(driver.container_names(), vec!["c-set-node0", "c-set-node1"]);
        let uploads = driver
            .calls()
            .into_iter()
            .filter(|c| matches!(c, DriverCall::RunShell { script, .. } if script.contains("ssh-rsa PUBLIC")))
            .count();
        assert_eq!(uploads, 2);
        assert!(!driver.calls().iter().any(|c| matches!(c, DriverCall::Pull(_))));
    }

    const MIXED_YAML: &str = r#"
cluster:
  name: c
machineSets:
- name: set
  replicas: 1
  spec:
    name: node%d
    image: img
    portMappings:
    - containerPort: 22
      hostPort: 2222
- name: db
  replicas: 1
  spec:
    name: pg%d
    image: img
"#;

    fn cluster_with_known_hosts(keyscan: &str) -> (TempDir, Arc<RecordingDriver>, Cluster, PathBuf) {
        let (temp, driver, cluster) = cluster_with_key(MIXED_YAML);
        let known_hosts = temp.path().join("known_hosts");

        let mut config = cluster.config().clone();
        config.cluster.known_hosts = Some(known_hosts.display().to_string());
        let cluster = Cluster::new(config, driver.clone())
            .unwrap()
            .with_ssh(SshConnector::new().keyscan_program(keyscan));
        (temp, driver, cluster, known_hosts)
    }

    #[cfg(unix)]
    #[test]
    fn test_host_keys_skip_machines_without_ssh_port() {
        // echo prints its arguments back in place of a scanned key
        let (_temp, driver, cluster, known_hosts) = cluster_with_known_hosts("echo");
        cluster.create().unwrap();

        assert_eq!(driver.container_names(), vec!["c-db-pg0", "c-set-node0"]);
        let recorded = std::fs::read_to_string(known_hosts).unwrap();
        assert_eq!(recorded.lines().collect::<Vec<_>>(), vec!["-t rsa -p 2222 localhost"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_host_key_scan_failure_does_not_fail_create() {
        let (_temp, driver, cluster, known_hosts) = cluster_with_known_hosts("false");
        cluster.create().unwrap();

        assert_eq!(driver.container_names().len(), 2);
        assert_eq!(std::fs::read_to_string(known_hosts).unwrap(), "");
    }

    #[test]
    fn test_create_pulls_missing_image() {
        let (_temp, driver, cluster) = cluster_with_key(&CLUSTER_YAML.replace("image: img", "image: other"));
        cluster.create().unwrap();
        assert_eq!(driver.calls()[0], DriverCall::Pull("other".to_string()));
    }

    #[test]
    fn test_key_store_key_wins() {
        let (temp, driver, cluster) = cluster_with_key(&CLUSTER_YAML.replace(
            "    image: img",
            "    image: img\n    publicKey: alice",
        ));
        let store = KeyStore::new(temp.path().join("keys"));
        store.init().unwrap();
        store.store("alice", "ssh-rsa ALICE").unwrap();
        let cluster = cluster.with_key_store(store);

        cluster.create().unwrap();
        assert!(driver.calls().iter().any(|c| matches!(
            c,
            DriverCall::RunShell { script, .. } if script.contains("ssh-rsa ALICE\n__EOF")
        )));
    }

    #[test]
    fn test_missing_key_material() {
        let cluster = Cluster::from_yaml(CLUSTER_YAML, Arc::new(RecordingDriver::new())).unwrap();
        let spec = &cluster.config().machine_sets[0].spec;
        assert!(matches!(cluster.public_key(spec), Err(VindError::MissingSshKey)));
    }

    #[test]
    fn test_start_stop_named() {
        let (_temp, driver, cluster) = cluster_with_key(CLUSTER_YAML);
        cluster.create().unwrap();

        cluster.stop(&["set-node1".to_string()]).unwrap();
        assert_eq!(driver.is_container_running("c-set-node0"), Some(true));
        assert_eq!(driver.is_container_running("c-set-node1"), Some(false));

        cluster.stop(&[]).unwrap();
        cluster.start(&["set-node0".to_string(), "nope".to_string()]).unwrap();
        assert_eq!(driver.is_container_running("c-set-node0"), Some(true));
        assert_eq!(driver.is_container_running("c-set-node1"), Some(false));
    }

    #[test]
    fn test_show() {
        let (_temp, _driver, cluster) = cluster_with_key(CLUSTER_YAML);
        cluster.create().unwrap();
        cluster.stop(&["set-node1".to_string()]).unwrap();

        let statuses = cluster.show(&[]).unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].state, MachineState::Running);
        assert_eq!(statuses[1].state, MachineState::Stopped);
        assert_eq!(statuses[1].ports[0].host, 2223);
        assert_eq!(statuses[0].command, "/sbin/init");
        assert_eq!(statuses[0].spec.port_mappings[0].address.as_deref(), Some("0.0.0.0"));

        let only = cluster.show(&["set-node1".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].machine_name, "set-node1");
    }

    #[test]
    fn test_show_skips_uncreated() {
        let (_temp, _driver, cluster) = cluster_with_key(CLUSTER_YAML);
        assert!(cluster.show(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let (_temp, driver, cluster) = cluster_with_key(CLUSTER_YAML);
        cluster.create().unwrap();
        cluster.stop(&["set-node0".to_string()]).unwrap();
        driver.clear_calls();

        cluster.delete().unwrap();
        assert!(driver.container_names().is_empty());
        let kills = driver
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Kill { .. }))
            .count();
        assert_eq!(kills, 1);
    }

    #[test]
    fn test_copy() {
        let (_temp, driver, cluster) = cluster_with_key(CLUSTER_YAML);
        cluster.create().unwrap();
        driver.clear_calls();

        let machine = cluster.machine_by_name("set-node1").unwrap();
        cluster.copy_to("./file", &machine, "/tmp/file").unwrap();
        cluster.copy_from(&machine, "/etc/hostname", ".").unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::CopyTo {
                    host_path: "./file".to_string(),
                    container: "c-set-node1".to_string(),
                    dest_path: "/tmp/file".to_string(),
                },
                DriverCall::CopyFrom {
                    container: "c-set-node1".to_string(),
                    src_path: "/etc/hostname".to_string(),
                    host_path: ".".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_save() {
        let (temp, _driver, cluster) = cluster_with_key(CLUSTER_YAML);
        let path = temp.path().join("vind.yaml");
        cluster.save(&path).unwrap();
        assert_eq!(&Config::from_file(&path).unwrap(), cluster.config());
    }
}
