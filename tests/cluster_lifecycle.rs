//! End-to-end cluster lifecycle against the in-memory runtime

use std::sync::Arc;
use tempfile::TempDir;
use vind::cluster::{Cluster, MachineState};
use vind::format::OutputFormat;
use vind::runtime::{DriverCall, RecordingDriver};
use vind::VindError;

const CLUSTER_YAML: &str = r#"
cluster:
  name: c
machineSets:
- name: set
  replicas: 2
  spec:
    name: node%d
    image: brightzheng100/vind-ubuntu:22.04
    portMappings:
    - containerPort: 22
      hostPort: 2222
"#;

fn setup() -> (TempDir, Arc<RecordingDriver>, Cluster) {
    let temp = TempDir::new().unwrap();
    let key = temp.path().join("cluster-key");
    std::fs::write(&key, "PRIVATE").unwrap();
    std::fs::write(temp.path().join("cluster-key.pub"), "ssh-rsa AAAAB3 c@vind.mail\n").unwrap();

    let yaml = CLUSTER_YAML.replace(
        "  name: c\n",
        &format!("  name: c\n  privateKey: {}\n", key.display()),
    );
    let driver = Arc::new(RecordingDriver::new());
    let cluster = Cluster::from_yaml(&yaml, driver.clone()).unwrap();
    (temp, driver, cluster)
}

fn published_ports(driver: &RecordingDriver) -> Vec<(String, String)> {
    driver
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::Create { args, .. } => {
                let name = args[args.iter().position(|a| a == "--name")? + 1].clone();
                let publish = args[args.iter().position(|a| a == "-p")? + 1].clone();
                Some((name, publish))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_machines_are_named_and_offset_per_replica() {
    let (_temp, driver, cluster) = setup();

    let names: Vec<String> = cluster
        .machines()
        .map(|m| format!("{} {}", m.machine_name(), m.container_name()))
        .collect();
    assert_eq!(names, vec!["set-node0 c-set-node0", "set-node1 c-set-node1"]);

    cluster.create().unwrap();
    assert_eq!(
        published_ports(&driver),
        vec![
            ("c-set-node0".to_string(), "2222:22".to_string()),
            ("c-set-node1".to_string(), "2223:22".to_string()),
        ]
    );
}

#[test]
fn test_lifecycle() {
    let (_temp, driver, cluster) = setup();

    cluster.create().unwrap();
    assert_eq!(driver.calls()[0], DriverCall::Pull("brightzheng100/vind-ubuntu:22.04".to_string()));

    // a second create changes nothing
    driver.clear_calls();
    cluster.create().unwrap();
    assert!(driver.calls().is_empty());

    cluster.stop(&["set-node1".to_string()]).unwrap();
    let statuses = cluster.show(&[]).unwrap();
    let states: Vec<MachineState> = statuses.iter().map(|s| s.state).collect();
    assert_eq!(states, vec![MachineState::Running, MachineState::Stopped]);

    let mut table = Vec::new();
    OutputFormat::Table
        .render(&mut table, &cluster.config().cluster, &statuses)
        .unwrap();
    let table = String::from_utf8(table).unwrap();
    assert!(table.contains("2223->22"));
    assert!(table.lines().nth(2).unwrap().ends_with("Stopped"));

    cluster.start(&[]).unwrap();
    assert_eq!(driver.is_container_running("c-set-node1"), Some(true));

    cluster.delete().unwrap();
    assert!(driver.container_names().is_empty());
    assert!(cluster.show(&[]).unwrap().is_empty());
}

#[test]
fn test_named_subset_warns_about_unknown_names() {
    let (_temp, _driver, cluster) = setup();

    let mut handled = Vec::new();
    let missing = cluster
        .for_specific_machines(
            &["set-node0".to_string(), "set-nodeX".to_string()],
            |m| {
                handled.push(m.machine_name().to_string());
                Ok(())
            },
        )
        .unwrap();

    assert_eq!(handled, vec!["set-node0"]);
    assert_eq!(missing, vec!["set-nodeX"]);
}

#[test]
fn test_single_target_lookups() {
    let (_temp, _driver, cluster) = setup();

    assert_eq!(cluster.first_machine().unwrap().machine_name(), "set-node0");
    assert!(matches!(
        cluster.machine_by_name("set-nodeX"),
        Err(VindError::MachineNotFound(_))
    ));

    let empty = Cluster::from_yaml("cluster:\n  name: c\n", Arc::new(RecordingDriver::new())).unwrap();
    assert!(matches!(empty.first_machine(), Err(VindError::NoMachineSets)));
}
