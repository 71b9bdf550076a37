//! Transaction Coordinator
//!
//! Drives one two-phase commit round over the currently connected
//! participants: concurrent prepare, strict AND over the votes, then a
//! fire-and-forget commit or abort broadcast.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;

use super::PrepareVote;
use crate::error::{Error, Result};
use crate::network::protocol::Message;
use crate::network::{PeerLink, PeerRegistry};
use crate::state::{LocalNode, NodeAddr, Value};

/// Outcome of a completed round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Committed,
    /// Participants that voted not-ready, ascending
    Aborted { inactive_servers: Vec<NodeAddr> },
}

impl Decision {
    pub fn is_committed(&self) -> bool {
        matches!(self, Decision::Committed)
    }
}

/// Coordinates transactions from this node
pub struct TransactionCoordinator {
    node: Arc<LocalNode>,
    registry: PeerRegistry,
    prepare_timeout: Option<Duration>,
    /// Held for the whole round; overlapping calls are rejected
    in_progress: Mutex<()>,
}

impl TransactionCoordinator {
    pub fn new(node: Arc<LocalNode>, registry: PeerRegistry, prepare_timeout: Option<Duration>) -> Self {
        Self {
            node,
            registry,
            prepare_timeout,
            in_progress: Mutex::new(()),
        }
    }

    /// Run a transaction for `value`
    ///
    /// Without a prepare timeout, a participant that stays connected but
    /// never answers stalls the round indefinitely.
    pub async fn request_to_server(&self, value: Value) -> Result<Decision> {
        if !self.node.is_coordinator().await {
            return Err(Error::NotCoordinator);
        }

        let _round = self
            .in_progress
            .try_lock()
            .map_err(|_| Error::TransactionInProgress)?;

        let participants = self.registry.connected_participants().await;
        tracing::info!(
            "Starting transaction for value {} with {} participants",
            value,
            participants.len()
        );

        let votes = match self.prepare_timeout {
            Some(limit) => match tokio::time::timeout(limit, prepare_all(&participants)).await {
                Ok(votes) => votes,
                Err(_) => {
                    tracing::warn!("Prepare phase exceeded {:?}, aborting", limit);
                    broadcast(&participants, Message::Abort).await;
                    return Err(Error::PrepareTimeout);
                }
            },
            None => prepare_all(&participants).await,
        };

        // The role may have flipped while the prepares were outstanding
        if !self.node.is_coordinator().await {
            tracing::warn!("Lost coordinator role during prepare, aborting");
            broadcast(&participants, Message::Abort).await;
            return Err(Error::NotCoordinator);
        }

        let mut inactive_servers: Vec<NodeAddr> = votes
            .iter()
            .filter(|vote| !vote.ready)
            .map(|vote| vote.address)
            .collect();
        inactive_servers.sort_unstable();

        if inactive_servers.is_empty() {
            broadcast(&participants, Message::Commit { value }).await;
            tracing::info!("Transaction committed: {}", value);
            Ok(Decision::Committed)
        } else {
            broadcast(&participants, Message::Abort).await;
            tracing::warn!("Transaction aborted, not ready: {:?}", inactive_servers);
            Ok(Decision::Aborted { inactive_servers })
        }
    }
}

/// Ask every participant to prepare, concurrently
async fn prepare_all(participants: &[Arc<PeerLink>]) -> Vec<PrepareVote> {
    join_all(participants.iter().map(|link| prepare_one(link))).await
}

async fn prepare_one(link: &PeerLink) -> PrepareVote {
    let address = link.address();
    let ready = match link.request(Message::Prepare).await {
        Ok(Message::PrepareResponse(reply)) => reply.ready,
        Ok(other) => {
            tracing::warn!("Unexpected prepare reply from {}: {}", address, other.type_name());
            false
        }
        Err(e) => {
            tracing::warn!("Prepare to {} failed: {}", address, e);
            false
        }
    };
    PrepareVote { address, ready }
}

/// Send a notification to every participant, ignoring failures
async fn broadcast(participants: &[Arc<PeerLink>], message: Message) {
    let sends = participants.iter().map(|link| {
        let message = message.clone();
        async move {
            if let Err(e) = link.notify(message).await {
                tracing::debug!("Dropped notification to {}: {}", link.address(), e);
            }
        }
    });
    join_all(sends).await;
}
