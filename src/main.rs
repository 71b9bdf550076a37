//! WolfCommit - Simulated Two-Phase Commit Cluster
//!
//! Runs one cluster node: the lowest reachable port coordinates, the rest
//! vote on its transactions.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfcommit::config::WolfCommitConfig;
use wolfcommit::error::Result;
use wolfcommit::network::{NetworkServer, RequestHandler, TcpTransport, Transport};
use wolfcommit::node::Node;
use wolfcommit::state::NodeAddr;

/// WolfCommit - Simulated Two-Phase Commit Cluster
#[derive(Parser)]
#[command(name = "wolfcommit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfcommit.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster node
    Start {
        /// Port this node listens on (must be in cluster.ports)
        #[arg(short, long)]
        port: Option<NodeAddr>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfcommit.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show cluster information from the configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => run_start(cli.config, cli.log_level, port).await,
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "compact");
            run_init(output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "compact");
            run_validate(cli.config)
        }
        Commands::Info => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "compact");
            run_info(cli.config)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Load the configuration file, falling back to defaults when it is missing
fn load_config(config_path: &PathBuf) -> Result<(WolfCommitConfig, bool)> {
    if config_path.exists() {
        Ok((WolfCommitConfig::from_file(config_path)?, true))
    } else {
        Ok((WolfCommitConfig::default(), false))
    }
}

/// Start a cluster node
async fn run_start(config_path: PathBuf, log_level: Option<String>, port: Option<NodeAddr>) -> Result<()> {
    let (config, from_file) = load_config(&config_path)?;
    let level = log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, &config.logging.format);

    if from_file {
        tracing::info!("Loaded configuration from {}", config_path.display());
    } else {
        tracing::info!("{} not found, using default configuration", config_path.display());
    }

    let port = config.resolve_port(port)?;
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(config.node.host.clone()));

    let node = Node::start(&config, port, transport).await?;
    let mut shutdown = node.shutdown_signal();

    let bind_address = format!("{}:{}", config.node.host, port);
    let handler: Arc<dyn RequestHandler> = node.clone();
    let server = NetworkServer::bind(&bind_address, handler, node.shutdown_signal()).await?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Network server error: {}", e);
        }
    });

    tokio::select! {
        _ = shutdown.wait_for(|closing| *closing) => {
            tracing::warn!("Coordinator closed on request");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    node.shutdown().await;
    server_handle.abort();

    tracing::info!("WolfCommit node {} shutdown complete", port);
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf) -> Result<()> {
    std::fs::write(&output, WolfCommitConfig::default_toml())?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to adjust the cluster membership and timings.");
    println!("Then start each node with: wolfcommit --config {} start --port <PORT>", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfCommitConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Host: {}", config.node.host);
            println!("  Members: {:?}", config.cluster.sorted_ports());
            if let Some(port) = config.node.port {
                println!("  Node Port: {}", port);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show cluster information
fn run_info(config_path: PathBuf) -> Result<()> {
    let (config, _) = load_config(&config_path)?;
    let cluster = &config.cluster;

    println!("WolfCommit Cluster");
    println!("==================");
    println!("Host:                {}", config.node.host);
    println!("Members:             {:?}", cluster.sorted_ports());
    if let Some(bootstrap) = cluster.bootstrap_coordinator() {
        println!("Bootstrap leader:    {}", bootstrap);
    }
    println!("Heartbeat interval:  {:?}", cluster.heartbeat_interval());
    println!("Probe timeout:       {:?}", cluster.probe_timeout());
    println!("Connect timeout:     {:?}", cluster.connect_timeout());
    println!("Reconnect interval:  {:?}", cluster.reconnect_interval());
    println!("Slow prepare delay:  {:?}", cluster.slow_delay());
    match cluster.prepare_timeout() {
        Some(limit) => println!("Prepare timeout:     {:?}", limit),
        None => println!("Prepare timeout:     none (waits for every reply)"),
    }
    if !cluster.inactive_on_start.is_empty() {
        println!("Inactive on start:   {:?}", cluster.inactive_on_start);
    }

    Ok(())
}
