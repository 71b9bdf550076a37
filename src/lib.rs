//! WolfCommit - Simulated Two-Phase Commit Cluster
//!
//! A small fixed-membership cluster in which every node can act as the
//! transaction coordinator. The coordinator is always the lowest-addressed
//! node that is currently reachable, and it drives two-phase commit rounds
//! over the participants connected to it.
//!
//! # Architecture
//!
//! Each node is one independent instance of the whole component graph:
//! local state, a liveness prober, an election engine, a heartbeat monitor,
//! a peer connection registry, and the coordinator and participant sides of
//! two-phase commit. Nodes talk over a `Transport`: TCP in production, an
//! in-memory bus in tests.
//!
//! # Features
//!
//! - "Lowest live address wins" election with heartbeat failure detection
//! - Strict-AND two-phase commit with fire-and-forget commit/abort
//! - Per-node active flag and simulated prepare latency for experiments
//! - Dashboard client with coordinator failover

pub mod config;
pub mod error;
pub mod state;
pub mod network;
pub mod transaction;
pub mod node;
pub mod client;

pub use config::WolfCommitConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::DashboardClient;
    pub use crate::config::WolfCommitConfig;
    pub use crate::error::{Error, Result};
    pub use crate::network::memory::MemoryNetwork;
    pub use crate::network::{Message, TcpTransport, Transport};
    pub use crate::node::Node;
    pub use crate::state::{LocalNode, NodeAddr, Role, ServerInfo, Value};
    pub use crate::transaction::Decision;
}
