//! Local Node State
//!
//! The authoritative record of this node's role, active flag, simulated
//! latency, last committed value and believed coordinator.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Node identity: the port a node listens on. Lower ports win elections.
pub type NodeAddr = u16;

/// Value carried by a commit
pub type Value = i64;

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Drives 2PC transactions and membership queries
    Coordinator,
    /// Answers prepare/commit/abort/status requests
    Participant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coordinator => write!(f, "Coordinator"),
            Role::Participant => write!(f, "Participant"),
        }
    }
}

/// Mutable per-node state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub role: Role,
    /// Whether this node votes ready on prepare
    pub active: bool,
    /// Added before answering a prepare request
    pub simulated_delay: Duration,
    pub committed_value: Option<Value>,
    pub known_coordinator: Option<NodeAddr>,
}

/// Public view of a node, as returned by status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub port: NodeAddr,
    pub is_active: bool,
    pub role: Role,
    /// Simulated prepare delay in milliseconds
    pub delay: u64,
}

/// Shared handle to this node's state
pub struct LocalNode {
    address: NodeAddr,
    /// Non-zero value `toggle_delay` switches to
    slow_delay: Duration,
    state: RwLock<NodeState>,
}

impl LocalNode {
    /// Create the state for a node starting with `role`
    pub fn new(
        address: NodeAddr,
        role: Role,
        known_coordinator: Option<NodeAddr>,
        active: bool,
        slow_delay: Duration,
    ) -> Self {
        Self {
            address,
            slow_delay,
            state: RwLock::new(NodeState {
                role,
                active,
                simulated_delay: Duration::ZERO,
                committed_value: None,
                known_coordinator,
            }),
        }
    }

    /// This node's address
    pub fn address(&self) -> NodeAddr {
        self.address
    }

    /// Copy of the whole state
    pub async fn snapshot(&self) -> NodeState {
        self.state.read().await.clone()
    }

    pub async fn role(&self) -> Role {
        self.state.read().await.role
    }

    pub async fn is_coordinator(&self) -> bool {
        self.role().await == Role::Coordinator
    }

    /// Set the role, returning true if it changed
    pub async fn set_role(&self, role: Role) -> bool {
        let mut state = self.state.write().await;
        let changed = state.role != role;
        state.role = role;
        changed
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.active
    }

    /// Flip the active flag and return the new value
    pub async fn toggle_active(&self) -> bool {
        let mut state = self.state.write().await;
        state.active = !state.active;
        state.active
    }

    pub async fn simulated_delay(&self) -> Duration {
        self.state.read().await.simulated_delay
    }

    /// Switch the simulated delay between zero and the slow delay
    pub async fn toggle_delay(&self) -> Duration {
        let mut state = self.state.write().await;
        state.simulated_delay = if state.simulated_delay.is_zero() {
            self.slow_delay
        } else {
            Duration::ZERO
        };
        state.simulated_delay
    }

    pub async fn committed_value(&self) -> Option<Value> {
        self.state.read().await.committed_value
    }

    pub async fn apply_commit(&self, value: Value) {
        self.state.write().await.committed_value = Some(value);
    }

    pub async fn known_coordinator(&self) -> Option<NodeAddr> {
        self.state.read().await.known_coordinator
    }

    pub async fn set_known_coordinator(&self, coordinator: Option<NodeAddr>) {
        self.state.write().await.known_coordinator = coordinator;
    }

    /// Forget the coordinator, but only if it is still `address`
    pub async fn forget_coordinator(&self, address: NodeAddr) -> bool {
        let mut state = self.state.write().await;
        if state.known_coordinator == Some(address) {
            state.known_coordinator = None;
            true
        } else {
            false
        }
    }

    /// Status view of this node
    pub async fn info(&self) -> ServerInfo {
        let state = self.state.read().await;
        ServerInfo {
            port: self.address,
            is_active: state.active,
            role: state.role,
            delay: state.simulated_delay.as_millis() as u64,
        }
    }

    /// True when role and believed coordinator agree about who leads
    pub async fn coordinator_view_consistent(&self) -> bool {
        let state = self.state.read().await;
        (state.role == Role::Coordinator) == (state.known_coordinator == Some(self.address))
    }
}
