//! State Management Module
//!
//! Local node state, cluster membership, leader election and the
//! heartbeat that triggers it.

mod membership;
mod node;
pub mod election;
pub mod heartbeat;

pub use membership::{Membership, ProbeReport};
pub use node::{LocalNode, NodeAddr, NodeState, Role, ServerInfo, Value};
pub use election::{ElectionEngine, ElectionOutcome};
pub use heartbeat::{HeartbeatCheck, HeartbeatMonitor};
