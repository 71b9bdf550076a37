//! WolfCommitCtl - Command line dashboard for WolfCommit clusters
//!
//! Usage:
//!   wolfcommitctl servers             - Show the coordinator's server list
//!   wolfcommitctl commit <VALUE>      - Run a transaction
//!   wolfcommitctl toggle-status <P>   - Flip the active flag on port P
//!   wolfcommitctl toggle-delay <P>    - Flip the prepare delay on port P
//!   wolfcommitctl close               - Terminate the coordinator
//!   wolfcommitctl watch               - Live server list with failover

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use wolfcommit::client::DashboardClient;
use wolfcommit::network::protocol::TransactionStatus;
use wolfcommit::network::{TcpTransport, Transport};
use wolfcommit::state::{NodeAddr, Role, ServerInfo, Value};

/// WolfCommit Cluster Control Tool
#[derive(Parser)]
#[command(name = "wolfcommitctl")]
#[command(about = "Control and monitor WolfCommit clusters", long_about = None)]
struct Cli {
    /// Host the cluster nodes listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the node to treat as coordinator
    #[arg(short, long, default_value_t = 3001)]
    coordinator: NodeAddr,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Print replies as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the coordinator and its connected participants
    Servers,
    /// Ask the coordinator to commit a value
    Commit {
        value: Value,
    },
    /// Toggle the active flag of a node
    ToggleStatus {
        port: NodeAddr,
    },
    /// Toggle the simulated prepare delay of a node
    ToggleDelay {
        port: NodeAddr,
    },
    /// Terminate the coordinator process
    Close,
    /// Refresh the server list, failing over when the coordinator drops
    Watch {
        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

type CtlResult = Result<(), Box<dyn std::error::Error>>;

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(cli.host.clone()));
    let timeout = Duration::from_millis(cli.timeout_ms);

    let result = match DashboardClient::connect(transport, cli.coordinator, timeout).await {
        Ok(client) => run(client, &cli).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(mut client: DashboardClient, cli: &Cli) -> CtlResult {
    match &cli.command {
        Commands::Servers => list_servers(&mut client, cli.json).await,
        Commands::Commit { value } => commit(&client, *value, cli.json).await,
        Commands::ToggleStatus { port } => {
            let reply = client.change_status(*port).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("Node {} is now {}", port, if reply.is_active { "active" } else { "inactive" });
            }
            Ok(())
        }
        Commands::ToggleDelay { port } => {
            let reply = client.change_delay(*port).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("Node {} prepare delay is now {} ms", port, reply.delay);
            }
            Ok(())
        }
        Commands::Close => {
            client.close_coordinator().await?;
            println!("closeCoordinator sent to {}", client.coordinator());
            Ok(())
        }
        Commands::Watch { interval_ms } => watch(client, Duration::from_millis(*interval_ms)).await,
    }
}

// ============ Commands ============

async fn list_servers(client: &mut DashboardClient, json: bool) -> CtlResult {
    if json {
        let reply = client.servers_reply().await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let servers = client.servers().await?;
    print_servers(client.coordinator(), &servers);
    Ok(())
}

async fn commit(client: &DashboardClient, value: Value, json: bool) -> CtlResult {
    let reply = client.commit(value).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    match reply.status {
        TransactionStatus::Committed => println!("\x1b[32m✓ Committed\x1b[0m value {}", value),
        TransactionStatus::Aborted => println!(
            "\x1b[33m✗ Aborted\x1b[0m, not ready: {:?}",
            reply.inactive_servers
        ),
        TransactionStatus::Error => println!(
            "\x1b[31m✗ Error:\x1b[0m {}",
            reply.error_message.as_deref().unwrap_or("unknown")
        ),
    }
    Ok(())
}

async fn watch(mut client: DashboardClient, interval: Duration) -> CtlResult {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        if !client.is_connected() {
            println!("\x1b[33mCoordinator {} dropped, failing over...\x1b[0m", client.coordinator());
            client.failover().await?;
        }

        // Clear screen and move cursor to top
        print!("\x1b[H\x1b[J");
        match client.servers().await {
            Ok(servers) => print_servers(client.coordinator(), &servers),
            Err(e) => println!("\x1b[31m✗\x1b[0m {}: {}", client.coordinator(), e),
        }
    }
}

fn print_servers(coordinator: NodeAddr, servers: &[ServerInfo]) {
    println!();
    println!("WolfCommit Cluster (wolfcommitctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    println!("Coordinator: {}  |  Servers: {}", coordinator, servers.len());
    println!();

    println!("{:<8} {:<10} {:<13} {:<8}", "PORT", "STATUS", "ROLE", "DELAY");
    println!("{}", "-".repeat(42));

    for server in servers {
        // Pad before adding color codes
        let status_padded = format!("{:<10}", if server.is_active { "Active" } else { "Inactive" });
        let status_colored = if server.is_active {
            format!("\x1b[32m{}\x1b[0m", status_padded)
        } else {
            format!("\x1b[31m{}\x1b[0m", status_padded)
        };

        let role_padded = format!("{:<13}", server.role.to_string());
        let role_colored = match server.role {
            Role::Coordinator => format!("\x1b[1;34m{}\x1b[0m", role_padded),
            Role::Participant => role_padded,
        };

        println!("{:<8} {} {} {} ms", server.port, status_colored, role_colored, server.delay);
    }
    println!();
}
