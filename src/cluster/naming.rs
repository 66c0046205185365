//! Machine identity and host port derivation
//!
//! Everything here is a pure function of the cluster name, the machine set
//! name, the name pattern and the replica index, so two handles on the same
//! replica always agree on names and published ports.

use crate::config::machine::INDEX_PLACEHOLDER;
use crate::config::PortMapping;

/// Substitute the replica index into a name pattern (`node%d` -> `node3`)
pub fn format_index(pattern: &str, index: u32) -> String {
    pattern.replacen(INDEX_PLACEHOLDER, &index.to_string(), 1)
}

/// `{machineSet}-{pattern with index}`, also used as hostname
pub fn machine_name(machine_set: &str, pattern: &str, index: u32) -> String {
    format!("{}-{}", machine_set, format_index(pattern, index))
}

/// `{cluster}-{machineSet}-{pattern with index}`
pub fn container_name(cluster: &str, machine_set: &str, pattern: &str, index: u32) -> String {
    format!("{}-{}", cluster, machine_name(machine_set, pattern, index))
}

/// Host port replica `index` binds for a mapping: the base port shifted by
/// the index so replicas of one set never collide. `None` lets the runtime
/// pick a free port.
pub fn effective_host_port(mapping: &PortMapping, index: u32) -> Option<u32> {
    (mapping.host_port != 0).then(|| u32::from(mapping.host_port) + index)
}

/// `-p` value: `[address:][hostPort:]containerPort[/protocol]`
pub fn publish_arg(mapping: &PortMapping, index: u32) -> String {
    let mut publish = String::new();
    if let Some(address) = mapping.address.as_deref().filter(|a| !a.is_empty()) {
        publish.push_str(address);
        publish.push(':');
    }
    if let Some(host_port) = effective_host_port(mapping, index) {
        publish.push_str(&format!("{}:", host_port));
    }
    publish.push_str(&mapping.container_port.to_string());
    if let Some(protocol) = mapping.protocol.as_deref().filter(|p| !p.is_empty()) {
        publish.push('/');
        publish.push_str(protocol);
    }
    publish
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(machine_name("set", "node%d", 1), "set-node1");
        assert_eq!(container_name("c", "set", "node%d", 0), "c-set-node0");
        assert_eq!(machine_name("db", "pg-%d-primary", 2), "db-pg-2-primary");
    }

    #[test]
    fn test_replicas_offset_host_port() {
        let mapping = PortMapping::container(22).host_port(2222);
        assert_eq!(publish_arg(&mapping, 0), "2222:22");
        assert_eq!(publish_arg(&mapping, 1), "2223:22");
        assert_eq!(publish_arg(&mapping, 7), "2229:22");
    }

    #[test]
    fn test_publish_arg_variants() {
        assert_eq!(publish_arg(&PortMapping::container(22), 3), "22");

        let mut mapping = PortMapping::container(53).host_port(5300).address("127.0.0.1");
        mapping.protocol = Some("udp".to_string());
        assert_eq!(publish_arg(&mapping, 2), "127.0.0.1:5302:53/udp");
    }

    #[test]
    fn test_no_wrap_at_port_ceiling() {
        let mapping = PortMapping::container(22).host_port(u16::MAX);
        assert_eq!(effective_host_port(&mapping, 1), Some(65536));
    }
}
