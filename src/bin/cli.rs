//! bcdb-admin
//!
//! Command-line front end for database and cluster administration.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bcdb::config::{load_identity, save_identity, ClientConfig, ConnectionConfig, SessionConfig};
use bcdb::{
    Admin, Bcdb, CommitOutcome, DbSession, Identity, NodeConfig, PeerConfig, PublicKey, Replica,
    ReplicaSet, RestDispatcher, TxContext,
};

type CmdResult = Result<(), Box<dyn Error>>;

/// bcdb-admin: administer databases and cluster configuration
#[derive(Parser)]
#[command(name = "bcdb-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to client config (default: ~/.bcdb/client.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Return as soon as a transaction is accepted, without waiting for its receipt
    #[arg(long = "async", global = true)]
    no_wait: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an identity and write a client config
    Init {
        /// User id to act as
        #[arg(short, long, default_value = "admin")]
        user: String,

        /// Replica as `id=endpoint`, may be repeated
        #[arg(short, long = "replica", required = true)]
        replicas: Vec<String>,

        /// Overwrite an existing identity and config
        #[arg(short, long)]
        force: bool,
    },

    /// Display the identity's certificate
    Identity,

    /// Database administration
    #[command(subcommand)]
    Db(DbCommand),

    /// Cluster configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum DbCommand {
    /// Create databases
    Create { names: Vec<String> },
    /// Delete databases
    Delete { names: Vec<String> },
    /// Check whether a database exists
    Exists { name: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the committed cluster configuration
    Show,

    /// Add a cluster admin
    AddAdmin {
        id: String,
        /// Admin certificate (hex encoded public key)
        certificate: String,
    },

    /// Replace a cluster admin's certificate
    UpdateAdmin {
        id: String,
        /// New certificate (hex encoded public key)
        certificate: String,
    },

    /// Remove a cluster admin
    DeleteAdmin { id: String },

    /// Add a node and its consensus peer
    AddNode {
        id: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        port: u32,
        /// Node certificate (hex encoded public key)
        #[arg(long)]
        certificate: String,
        #[arg(long)]
        peer_host: String,
        #[arg(long)]
        peer_port: u32,
        #[arg(long)]
        raft_id: u64,
    },

    /// Remove a node and its consensus peer
    DeleteNode { id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bcdb=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => match default_config_path() {
            Some(path) => path,
            None => {
                eprintln!("Error: could not find home directory, pass --config");
                std::process::exit(1);
            }
        },
    };
    let sync = !cli.no_wait;

    let result = match cli.command {
        Commands::Init {
            user,
            replicas,
            force,
        } => cmd_init(&config_path, &user, &replicas, force),
        Commands::Identity => cmd_identity(&config_path),
        Commands::Db(command) => cmd_db(&config_path, command, sync).await,
        Commands::Config(command) => cmd_config(&config_path, command, sync).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".bcdb").join("client.toml"))
}

fn parse_replica(arg: &str) -> Result<Replica, String> {
    let (id, endpoint) = arg
        .split_once('=')
        .ok_or_else(|| format!("replica must be id=endpoint, got {:?}", arg))?;
    Ok(Replica {
        id: id.to_string(),
        endpoint: endpoint.to_string(),
    })
}

fn parse_certificate(hex_key: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let bytes = hex::decode(hex_key)?;
    let key = PublicKey::from_bytes(&bytes)?;
    Ok(key.as_bytes().to_vec())
}

fn open_session(config_path: &Path) -> Result<DbSession, Box<dyn Error>> {
    let config = ClientConfig::load(config_path)?;
    let identity = load_identity(&config.session.identity_path)?;

    let db = Bcdb::new(config.connection.replicas, Arc::new(RestDispatcher::new()));
    Ok(db.session(
        config.session.user_id.clone(),
        Arc::new(identity),
        config.session.timeouts(),
    ))
}

fn report(outcome: &CommitOutcome) {
    match &outcome.receipt {
        Some(receipt) => println!(
            "Transaction {} committed in block {}",
            outcome.tx_id, receipt.header.number
        ),
        None => println!("Transaction {} submitted", outcome.tx_id),
    }
}

fn cmd_init(config_path: &Path, user: &str, replicas: &[String], force: bool) -> CmdResult {
    if config_path.exists() && !force {
        return Err(format!(
            "config already exists at {}, use --force to overwrite",
            config_path.display()
        )
        .into());
    }

    let replicas: ReplicaSet = replicas
        .iter()
        .map(|arg| parse_replica(arg))
        .collect::<Result<_, _>>()?;
    let identity_path = config_path.with_file_name(format!("{}.key", user));

    let config = ClientConfig {
        connection: ConnectionConfig { replicas },
        session: SessionConfig {
            user_id: user.to_string(),
            identity_path: identity_path.clone(),
            ..SessionConfig::default()
        },
    };

    let identity = Identity::generate();
    save_identity(&identity, &identity_path)?;
    config.save(config_path)?;

    println!("Identity created for {}", user);
    println!();
    println!("Certificate (register this as the admin's certificate):");
    println!("{}", identity.public_key().to_hex());
    println!();
    println!("Identity saved to: {}", identity_path.display());
    println!("Config saved to: {}", config_path.display());
    Ok(())
}

fn cmd_identity(config_path: &Path) -> CmdResult {
    let config = ClientConfig::load(config_path)?;
    let identity = load_identity(&config.session.identity_path)?;

    println!("User: {}", config.session.user_id);
    println!("Certificate: {}", identity.public_key().to_hex());
    Ok(())
}

async fn cmd_db(config_path: &Path, command: DbCommand, sync: bool) -> CmdResult {
    let session = open_session(config_path)?;

    match command {
        DbCommand::Exists { name } => {
            let exists = session.dbs_tx().exists(&name).await?;
            println!("{}: {}", name, if exists { "exists" } else { "does not exist" });
        }
        DbCommand::Create { names } => {
            let mut tx = session.dbs_tx();
            for name in &names {
                tx.create_db(name)?;
            }
            report(&tx.commit(sync).await?);
        }
        DbCommand::Delete { names } => {
            let mut tx = session.dbs_tx();
            for name in &names {
                tx.delete_db(name)?;
            }
            report(&tx.commit(sync).await?);
        }
    }
    Ok(())
}

async fn cmd_config(config_path: &Path, command: ConfigCommand, sync: bool) -> CmdResult {
    let session = open_session(config_path)?;
    let mut tx = session.config_tx().await?;

    match command {
        ConfigCommand::Show => {
            let config = tx.cluster_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            tx.abort()?;
            return Ok(());
        }
        ConfigCommand::AddAdmin { id, certificate } => {
            tx.add_admin(Admin::new(id, parse_certificate(&certificate)?))?;
        }
        ConfigCommand::UpdateAdmin { id, certificate } => {
            tx.update_admin(Admin::new(id, parse_certificate(&certificate)?))?;
        }
        ConfigCommand::DeleteAdmin { id } => tx.delete_admin(&id)?,
        ConfigCommand::AddNode {
            id,
            address,
            port,
            certificate,
            peer_host,
            peer_port,
            raft_id,
        } => {
            let node = NodeConfig {
                id: id.clone(),
                address,
                port,
                certificate: parse_certificate(&certificate)?,
            };
            let peer = PeerConfig {
                node_id: id,
                peer_host,
                peer_port,
                raft_id,
            };
            tx.add_cluster_node(node, peer)?;
        }
        ConfigCommand::DeleteNode { id } => tx.delete_cluster_node(&id)?,
    }

    report(&tx.commit(sync).await?);
    Ok(())
}
