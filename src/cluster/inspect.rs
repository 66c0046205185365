//! Subset of the container inspect document read by `show`
//!
//! Docker and Podman disagree on a few shapes (Podman reports `Cmd` and
//! `Entrypoint` as plain strings in some versions), so those fields accept
//! either form.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Container inspect document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mounts: Vec<MountPoint>,
    #[serde(default)]
    pub config: Option<InspectConfig>,
    #[serde(default)]
    pub network_settings: Option<NetworkSettings>,
}

/// Mount of a container
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    #[serde(default, rename = "Type")]
    pub mount_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default, rename = "RW")]
    pub rw: bool,
}

/// Container configuration block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    #[serde(default, deserialize_with = "string_or_list")]
    pub cmd: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub image: String,
}

/// Network block: published ports and attached networks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// `"22/tcp"` -> bindings; unpublished exposed ports map to null
    #[serde(default, deserialize_with = "null_as_default")]
    pub ports: BTreeMap<String, Option<Vec<PortBinding>>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub networks: BTreeMap<String, EndpointSettings>,
}

/// Host side of a published port
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortBinding {
    #[serde(default, rename = "HostIp")]
    pub host_ip: String,
    #[serde(default, rename = "HostPort")]
    pub host_port: String,
}

/// Endpoint of a container on one network
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointSettings {
    #[serde(default, rename = "IPAddress")]
    pub ip_address: String,
    #[serde(default, rename = "IPPrefixLen")]
    pub ip_prefix_len: u8,
    #[serde(default, rename = "Gateway")]
    pub gateway: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrList>::deserialize(deserializer)? {
        Some(StringOrList::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(StringOrList::List(list)) => list,
        None => Vec::new(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Container port of a `"22/tcp"` key
pub fn container_port(key: &str) -> Option<u16> {
    key.split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_document() {
        let doc = r#"{
            "Name": "/cluster-set-node0",
            "Mounts": [{"Type": "bind", "Source": "/", "Destination": "/host", "RW": true}],
            "Config": {"Cmd": ["/sbin/init"], "Entrypoint": null, "Image": "ubuntu"},
            "NetworkSettings": {
                "Ports": {"22/tcp": [{"HostIp": "0.0.0.0", "HostPort": "2222"}], "80/tcp": null},
                "Networks": {"bridge": {"IPAddress": "172.17.0.2", "IPPrefixLen": 16, "Gateway": "172.17.0.1"}}
            }
        }"#;

        let inspect: InspectContainer = serde_json::from_str(doc).unwrap();
        let config = inspect.config.unwrap();
        assert_eq!(config.cmd, vec!["/sbin/init"]);
        assert!(config.entrypoint.is_empty());
        assert_eq!(inspect.mounts[0].destination, "/host");

        let settings = inspect.network_settings.unwrap();
        assert_eq!(settings.ports["22/tcp"].as_ref().unwrap()[0].host_port, "2222");
        assert!(settings.ports["80/tcp"].is_none());
        assert_eq!(settings.networks["bridge"].ip_prefix_len, 16);
    }

    #[test]
    fn test_podman_string_entrypoint() {
        let doc = r#"{"Cmd": "/usr/sbin/init --log", "Entrypoint": "/bin/sh -c"}"#;
        let config: InspectConfig = serde_json::from_str(doc).unwrap();
        assert_eq!(config.cmd, vec!["/usr/sbin/init", "--log"]);
        assert_eq!(config.entrypoint, vec!["/bin/sh", "-c"]);
    }

    #[test]
    fn test_container_port() {
        assert_eq!(container_port("22/tcp"), Some(22));
        assert_eq!(container_port("bogus"), None);
    }
}
