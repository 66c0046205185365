//! Rendering of machine statuses

use crate::cluster::MachineStatus;
use crate::config::{expand_home, ClusterSpec};
use crate::error::{Result, VindError};
use serde_json::json;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Spaces between two table columns
const TABLE_PADDING: usize = 3;

/// Output format of `show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    /// Ansible YAML inventory
    Ansible,
    /// `~/.ssh/config` host entries
    SshConfig,
}

impl FromStr for OutputFormat {
    type Err = VindError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "ansible" => Ok(OutputFormat::Ansible),
            "ssh" => Ok(OutputFormat::SshConfig),
            other => Err(VindError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Ansible => "ansible",
            OutputFormat::SshConfig => "ssh",
        };
        f.write_str(name)
    }
}

impl OutputFormat {
    /// Write `statuses` to `out`
    pub fn render(
        &self,
        out: &mut dyn Write,
        cluster: &ClusterSpec,
        statuses: &[MachineStatus],
    ) -> Result<()> {
        match self {
            OutputFormat::Table => render_table(out, statuses),
            OutputFormat::Json => render_json(out, statuses),
            OutputFormat::Ansible => render_ansible(out, cluster, statuses),
            OutputFormat::SshConfig => render_ssh_config(out, cluster, statuses),
        }
    }
}

fn private_key_file(cluster: &ClusterSpec) -> String {
    cluster
        .private_key
        .as_deref()
        .map(|k| expand_home(k).display().to_string())
        .unwrap_or_default()
}

/// Host port to log in through: the one published for 22, else the first
fn login_port(status: &MachineStatus) -> u16 {
    status
        .ports
        .iter()
        .find(|p| p.guest == 22)
        .map(|p| p.host)
        .unwrap_or_else(|| status.first_host_port())
}

fn render_table(out: &mut dyn Write, statuses: &[MachineStatus]) -> Result<()> {
    let mut rows: Vec<[String; 7]> = vec![[
        "CONTAINER NAME".to_string(),
        "MACHINE NAME".to_string(),
        "PORTS".to_string(),
        "IP".to_string(),
        "IMAGE".to_string(),
        "CMD".to_string(),
        "STATE".to_string(),
    ]];

    for s in statuses {
        let mut ports: Vec<String> = s
            .ports
            .iter()
            .map(|p| format!("{}->{}", p.host, p.guest))
            .collect();
        if ports.is_empty() {
            ports = s
                .spec
                .port_mappings
                .iter()
                .map(|m| format!("{}->{}", m.host_port, m.container_port))
                .collect();
        }
        rows.push([
            s.container.clone(),
            s.machine_name.clone(),
            ports.join(","),
            s.ip.clone(),
            s.image.clone(),
            s.command.clone(),
            s.state.to_string(),
        ]);
    }

    let mut widths = [0usize; 7];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    for row in &rows {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            if i + 1 == row.len() {
                line.push_str(cell);
            } else {
                let width = widths[i] + TABLE_PADDING;
                line.push_str(&format!("{:<width$}", cell, width = width));
            }
        }
        writeln!(out, "{}", line.trim_end())?;
    }
    Ok(())
}

fn render_json(out: &mut dyn Write, statuses: &[MachineStatus]) -> Result<()> {
    let document = json!({ "machines": statuses });
    serde_json::to_writer_pretty(&mut *out, &document)?;
    writeln!(out)?;
    Ok(())
}

fn render_ansible(
    out: &mut dyn Write,
    cluster: &ClusterSpec,
    statuses: &[MachineStatus],
) -> Result<()> {
    let key_file = private_key_file(cluster);
    let common_args = "-o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no";

    let hosts: serde_json::Map<String, serde_json::Value> = statuses
        .iter()
        .map(|s| {
            (
                s.machine_name.clone(),
                json!({
                    "ansible_host": "localhost",
                    "ansible_port": login_port(s),
                    "ansible_user": s.user(),
                    "ansible_connection": "ssh",
                    "ansible_ssh_private_key_file": key_file,
                    "ansible_ssh_common_args": common_args,
                }),
            )
        })
        .collect();

    let mut inventory = serde_json::Map::new();
    inventory.insert(cluster.name.clone(), json!({ "hosts": hosts }));
    out.write_all(serde_yaml::to_string(&inventory)?.as_bytes())?;
    Ok(())
}

fn render_ssh_config(
    out: &mut dyn Write,
    cluster: &ClusterSpec,
    statuses: &[MachineStatus],
) -> Result<()> {
    let key_file = private_key_file(cluster);

    for s in statuses {
        writeln!(out, "Host {}", s.machine_name)?;
        writeln!(out, "    Hostname localhost")?;
        writeln!(out, "    Port {}", login_port(s))?;
        writeln!(out, "    User {}", s.user())?;
        writeln!(out, "    IdentityFile {}", key_file)?;
        writeln!(out, "    UserKnownHostsFile /dev/null")?;
        writeln!(out, "    StrictHostKeyChecking no")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MachineState, PortStatus};
    use crate::config::MachineSpec;

    fn statuses() -> Vec<MachineStatus> {
        vec![MachineStatus {
            container: "c-set-node0".to_string(),
            state: MachineState::Running,
            spec: MachineSpec::new("node%d", "img"),
            ports: vec![
                PortStatus { guest: 80, host: 8080 },
                PortStatus { guest: 22, host: 2222 },
            ],
            machine_name: "set-node0".to_string(),
            image: "img".to_string(),
            command: "/sbin/init".to_string(),
            ip: "172.17.0.2".to_string(),
            runtime_networks: Vec::new(),
        }]
    }

    fn cluster() -> ClusterSpec {
        ClusterSpec {
            name: "c".to_string(),
            private_key: Some("/keys/cluster-key".to_string()),
            known_hosts: None,
        }
    }

    fn render(format: OutputFormat) -> String {
        let mut out = Vec::new();
        format.render(&mut out, &cluster(), &statuses()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("ssh".parse::<OutputFormat>().unwrap(), OutputFormat::SshConfig);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!(matches!(
            "xml".parse::<OutputFormat>(),
            Err(VindError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_table() {
        let table = render(OutputFormat::Table);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("CONTAINER NAME   MACHINE NAME   PORTS"));
        assert!(lines[1].starts_with("c-set-node0      set-node0      8080->80,2222->22   172.17.0.2"));
        assert!(lines[1].ends_with("Running"));
    }

    #[test]
    fn test_json() {
        let json = render(OutputFormat::Json);
        assert!(json.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["machines"][0]["container"], "c-set-node0");
        assert_eq!(value["machines"][0]["state"], "Running");
    }

    #[test]
    fn test_ansible() {
        let yaml = render(OutputFormat::Ansible);
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let host = &value["c"]["hosts"]["set-node0"];
        assert_eq!(host["ansible_port"].as_u64(), Some(2222));
        assert_eq!(host["ansible_user"].as_str(), Some("root"));
        assert_eq!(
            host["ansible_ssh_private_key_file"].as_str(),
            Some("/keys/cluster-key")
        );
    }

    #[test]
    fn test_ssh_config() {
        let config = render(OutputFormat::SshConfig);
        assert!(config.starts_with("Host set-node0\n    Hostname localhost\n    Port 2222\n"));
        assert!(config.contains("    IdentityFile /keys/cluster-key\n"));
    }
}
