//! Machines and clusters
//!
//! A cluster is a set of machine sets; a machine set is a machine template
//! plus a replica count. Machines are never stored: they are derived from
//! the config and a replica index whenever an operation needs them, and the
//! container runtime is asked for their actual state.

#[allow(clippy::module_inception)]
pub mod cluster;
pub mod inspect;
pub mod key_store;
pub mod machine;
pub mod naming;
pub mod network;
pub mod ssh;
pub mod status;

pub use cluster::Cluster;
pub use key_store::KeyStore;
pub use machine::Machine;
pub use network::RuntimeNetwork;
pub use ssh::{MatchFilter, SshConnector};
pub use status::{MachineState, MachineStatus, PortStatus};
