//! vind - containers that look and work like virtual machines
//!
//! This is the main CLI entry point for vind.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use vind::cluster::{Cluster, KeyStore};
use vind::config::{self, Config};
use vind::format::OutputFormat;
use vind::runtime::DockerDriver;

/// Environment variable selecting the log level
const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// vind - virtual machines in containers
#[derive(Parser)]
#[command(name = "vind")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(
    about = "A tool to create containers that look and work like virtual machines, on Docker",
    long_about = None
)]
struct Cli {
    /// Cluster configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start every machine of the cluster
    Create,

    /// Delete every machine of the cluster
    Delete,

    /// Start all machines, or the named ones
    Start {
        /// Machine names
        names: Vec<String>,
    },

    /// Stop all machines, or the named ones
    Stop {
        /// Machine names
        names: Vec<String>,
    },

    /// Show created machines, or the named ones
    #[command(visible_alias = "status")]
    Show {
        /// Machine names
        names: Vec<String>,
        /// Output format: table, json, ansible or ssh
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// SSH into a machine
    Ssh {
        /// [USER@]MACHINE_NAME
        target: String,
        /// Extra arguments given to ssh
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Copy files between a machine and the host (MACHINE:PATH on one side)
    #[command(name = "cp", visible_alias = "copy")]
    Copy {
        /// Source path
        src: String,
        /// Destination path
        dest: String,
    },

    /// Manage the cluster configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print the vind version
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create a cluster configuration
    Create {
        /// Generated cluster configuration file
        #[arg(short, long)]
        file: Option<String>,
        /// Override the configuration file if it exists
        #[arg(short = 'o', long = "override")]
        force: bool,
        /// Name of the cluster
        #[arg(short, long)]
        name: Option<String>,
        /// Name of the private and public key files
        #[arg(short, long)]
        key: Option<String>,
        /// Name of the machine set
        #[arg(short = 's', long)]
        machineset: Option<String>,
        /// Networks the machines are attached to
        #[arg(long, value_delimiter = ',')]
        networks: Vec<String>,
        /// Number of machine replicas
        #[arg(short, long)]
        replicas: Option<u32>,
        /// Container image of the machines
        #[arg(short, long)]
        image: Option<String>,
        /// Create privileged containers
        #[arg(long)]
        privileged: bool,
        /// Command run in the containers
        #[arg(long)]
        cmd: Option<String>,
    },

    /// Print a value of the cluster configuration, e.g. `machineSets[0].spec.image`
    Get {
        /// Path of the value
        path: String,
    },
}

fn init_logging(debug: bool) {
    let (level, unparsable) = if debug {
        (LevelFilter::DEBUG, None)
    } else {
        match std::env::var(LOG_LEVEL_ENV) {
            Ok(value) if !value.is_empty() => match value.parse::<LevelFilter>() {
                Ok(level) => (level, None),
                Err(_) => (LevelFilter::INFO, Some(value)),
            },
            _ => (LevelFilter::INFO, None),
        }
    };

    let filter = EnvFilter::default().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(value) = unparsable {
        tracing::warn!(
            "configured {} is unparsable: {}, ignore and fall back to info level",
            LOG_LEVEL_ENV,
            value
        );
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::from_file(path)
        .with_context(|| format!("failed to load cluster file {}", path.display()))
}

fn load_cluster(flag: Option<&str>) -> anyhow::Result<Cluster> {
    let config = load_config(&config::config_file(flag))?;
    let uses_key_store = config
        .machine_sets
        .iter()
        .any(|set| set.spec.public_key.is_some());

    let mut cluster = Cluster::new(config, Arc::new(DockerDriver::default()))?;
    if uses_key_store {
        cluster = cluster.with_key_store(KeyStore::new(config::DEFAULT_KEY_STORE_PATH));
    }
    Ok(cluster)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config_flag = cli.config.as_deref();

    match cli.command {
        Commands::Create => {
            load_cluster(config_flag)?.create()?;
        }

        Commands::Delete => {
            load_cluster(config_flag)?.delete()?;
        }

        Commands::Start { names } => {
            load_cluster(config_flag)?.start(&names)?;
        }

        Commands::Stop { names } => {
            load_cluster(config_flag)?.stop(&names)?;
        }

        Commands::Show { names, output } => {
            let format: OutputFormat = output.parse()?;
            let cluster = load_cluster(config_flag)?;
            let statuses = cluster.show(&names)?;

            let stdout = std::io::stdout();
            format.render(&mut stdout.lock(), &cluster.config().cluster, &statuses)?;
        }

        Commands::Ssh { target, args } => {
            let (user, machine_name) = match target.split_once('@') {
                Some((_, machine)) if machine.contains('@') => {
                    bail!("bad syntax for user@machineName: {}", target)
                }
                Some((user, machine)) => (Some(user.to_string()), machine.to_string()),
                None => (None, target.clone()),
            };

            let cluster = load_cluster(config_flag)?;
            let mut machine = cluster.machine_by_name(&machine_name)?;
            let user = user.unwrap_or_else(|| machine.user().to_string());
            cluster.ssh(&mut machine, &user, &args)?;
        }

        Commands::Copy { src, dest } => {
            let cluster = load_cluster(config_flag)?;
            match (src.split_once(':'), dest.split_once(':')) {
                (Some((machine_name, src_path)), None) => {
                    let machine = cluster.machine_by_name(machine_name)?;
                    cluster.copy_from(&machine, src_path, &dest)?;
                }
                (None, Some((machine_name, dest_path))) => {
                    let machine = cluster.machine_by_name(machine_name)?;
                    cluster.copy_to(&src, &machine, dest_path)?;
                }
                _ => bail!("either copy from or to machine is supported"),
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Create {
                file,
                force,
                name,
                key,
                machineset,
                networks,
                replicas,
                image,
                privileged,
                cmd,
            } => {
                let path = config::config_file(file.as_deref().or(config_flag));
                tracing::info!("Creating config file {}", path.display());

                let mut config = Config::template();
                if let Some(name) = name {
                    config.cluster.name = name;
                }
                if let Some(key) = key {
                    config.cluster.private_key = Some(key);
                }
                if let Some(set) = config.machine_sets.first_mut() {
                    if let Some(machineset) = machineset {
                        set.name = machineset;
                    }
                    if let Some(replicas) = replicas {
                        set.replicas = replicas;
                    }
                    if let Some(image) = image {
                        set.spec.image = image;
                    }
                    if let Some(cmd) = cmd {
                        set.spec.cmd = cmd;
                    }
                    set.spec.networks = networks;
                    set.spec.privileged = privileged;
                }

                let cluster = Cluster::new(config, Arc::new(DockerDriver::default()))?;
                if path.is_file() && !force {
                    tracing::warn!(
                        "Failed due to configuration file at {} already exists",
                        path.display()
                    );
                    bail!(
                        "Configuration file at {} already exists. Override it by specifying --override or -o",
                        path.display()
                    );
                }
                cluster.save(&path)?;
            }

            ConfigCommands::Get { path } => {
                let config = load_config(&config::config_file(config_flag))?;
                match config.get_value(&path)? {
                    serde_json::Value::String(value) => println!("{}", value),
                    value => print!("{}", serde_yaml::to_string(&value)?),
                }
            }
        },

        Commands::Version => {
            println!(
                "vind version {} ({}/{})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ssh_passes_extra_args() {
        let cli = Cli::parse_from(["vind", "ssh", "dev@set-node0", "ls", "-la"]);
        match cli.command {
            Commands::Ssh { target, args } => {
                assert_eq!(target, "dev@set-node0");
                assert_eq!(args, vec!["ls", "-la"]);
            }
            _ => panic!("expected ssh"),
        }
    }

    #[test]
    fn test_config_create_networks() {
        let cli = Cli::parse_from([
            "vind", "config", "create", "-n", "my-cluster", "--networks", "net1,net2", "-r", "3",
        ]);
        match cli.command {
            Commands::Config {
                command: ConfigCommands::Create { name, networks, replicas, .. },
            } => {
                assert_eq!(name.as_deref(), Some("my-cluster"));
                assert_eq!(networks, vec!["net1", "net2"]);
                assert_eq!(replicas, Some(3));
            }
            _ => panic!("expected config create"),
        }
    }

    #[test]
    fn test_status_alias() {
        let cli = Cli::parse_from(["vind", "status", "-o", "json", "set-node0"]);
        assert!(matches!(cli.command, Commands::Show { ref output, .. } if output == "json"));
    }
}
