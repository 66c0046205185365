//! Networks a machine is attached to at runtime

use super::inspect::EndpointSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Attachment of a container to a runtime network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeNetwork {
    /// Network name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Container address on the network
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// Dotted IPv4 netmask
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mask: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
}

/// Dotted IPv4 netmask for a prefix length
pub fn ipv4_mask(prefix_len: u8) -> Ipv4Addr {
    let bits = u32::MAX
        .checked_shl(32 - u32::from(prefix_len.min(32)))
        .unwrap_or(0);
    Ipv4Addr::from(bits)
}

impl RuntimeNetwork {
    /// One entry per endpoint, ordered by network name
    pub fn from_endpoints(endpoints: &BTreeMap<String, EndpointSettings>) -> Vec<RuntimeNetwork> {
        endpoints
            .iter()
            .map(|(name, endpoint)| RuntimeNetwork {
                name: name.clone(),
                ip: endpoint.ip_address.clone(),
                mask: ipv4_mask(endpoint.ip_prefix_len).to_string(),
                gateway: endpoint.gateway.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_endpoints() {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            "mynetwork".to_string(),
            EndpointSettings {
                ip_address: "172.17.0.4".to_string(),
                ip_prefix_len: 16,
                gateway: "172.17.0.1".to_string(),
            },
        );

        let networks = RuntimeNetwork::from_endpoints(&endpoints);
        assert_eq!(
            networks,
            vec![RuntimeNetwork {
                name: "mynetwork".to_string(),
                ip: "172.17.0.4".to_string(),
                mask: "255.255.0.0".to_string(),
                gateway: "172.17.0.1".to_string(),
            }]
        );
    }

    #[test]
    fn test_ipv4_mask_edges() {
        assert_eq!(ipv4_mask(0), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(ipv4_mask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(ipv4_mask(32), Ipv4Addr::new(255, 255, 255, 255));
    }
}
