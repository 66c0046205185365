//! vind - containers that look and work like virtual machines, on Docker
//!
//! vind creates groups of long-lived containers ("machines") from a cluster
//! file and makes them reachable over SSH. It provides:
//!
//! - Deterministic machine naming and per-replica host port offsets
//! - Idempotent create/start/stop/delete driven by the container runtime
//! - SSH login with retry while sshd is still starting
//! - Status output as a table, JSON, an Ansible inventory or ssh_config

pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod format;
pub mod runtime;

pub use error::{Result, VindError};
