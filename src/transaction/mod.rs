//! Transaction Module
//!
//! Two-phase commit: the coordinator side that drives a round and the
//! participant side that votes on and applies it.

pub mod coordinator;
pub mod participant;

pub use coordinator::{Decision, TransactionCoordinator};
pub use participant::ParticipantHandler;

use crate::state::NodeAddr;

/// One participant's answer to a prepare request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareVote {
    pub address: NodeAddr,
    pub ready: bool,
}
