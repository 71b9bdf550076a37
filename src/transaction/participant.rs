//! Participant Handler
//!
//! The operations any node answers regardless of role, plus the two
//! coordinator-only queries the dashboard uses.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;

use super::PrepareVote;
use crate::error::{Error, Result};
use crate::network::protocol::Message;
use crate::network::{PeerLink, PeerRegistry};
use crate::state::{LocalNode, ServerInfo, Value};

/// Answers participant-side and dashboard requests for one node
pub struct ParticipantHandler {
    node: Arc<LocalNode>,
    registry: PeerRegistry,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ParticipantHandler {
    pub fn new(node: Arc<LocalNode>, registry: PeerRegistry, shutdown: Arc<watch::Sender<bool>>) -> Self {
        Self {
            node,
            registry,
            shutdown,
        }
    }

    /// Vote on a prepare request
    ///
    /// Sleeps for the delay in force when the request arrived, then reports
    /// the active flag as it is at reply time.
    pub async fn on_prepare(&self) -> PrepareVote {
        let delay = self.node.simulated_delay().await;
        if !delay.is_zero() {
            tracing::debug!("Delaying prepare reply by {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        let ready = self.node.is_active().await;
        tracing::debug!("Prepare vote: ready={}", ready);
        PrepareVote {
            address: self.node.address(),
            ready,
        }
    }

    pub async fn on_commit(&self, value: Value) {
        self.node.apply_commit(value).await;
        tracing::info!("Committed value: {}", value);
    }

    pub async fn on_abort(&self) {
        tracing::info!("Transaction aborted by coordinator");
    }

    pub async fn get_info(&self) -> ServerInfo {
        self.node.info().await
    }

    /// Toggle the active flag, returning the new value
    pub async fn change_status(&self) -> bool {
        let active = self.node.toggle_active().await;
        tracing::info!("Active flag is now {}", active);
        active
    }

    /// Toggle the prepare delay between zero and the slow constant
    pub async fn change_delay(&self) -> Duration {
        let delay = self.node.toggle_delay().await;
        tracing::info!("Prepare delay is now {:?}", delay);
        delay
    }

    /// Own info followed by every connected participant's info
    ///
    /// Participants whose status request fails are left out.
    pub async fn get_available_servers(&self) -> Result<Vec<ServerInfo>> {
        if !self.node.is_coordinator().await {
            return Err(Error::NotCoordinator);
        }

        let participants = self.registry.connected_participants().await;
        let replies = join_all(participants.iter().map(|link| query_status(link))).await;

        let mut servers = Vec::with_capacity(replies.len() + 1);
        servers.push(self.node.info().await);
        servers.extend(replies.into_iter().flatten());
        Ok(servers)
    }

    /// Ask the process to exit; ignored unless this node is the coordinator
    pub async fn close_coordinator(&self) -> bool {
        if !self.node.is_coordinator().await {
            tracing::debug!("Ignoring closeCoordinator on a participant");
            return false;
        }

        tracing::warn!("closeCoordinator received, shutting down");
        self.shutdown.send_replace(true);
        true
    }
}

async fn query_status(link: &PeerLink) -> Option<ServerInfo> {
    match link.request(Message::Status).await {
        Ok(Message::StatusResponse(reply)) => Some(reply.info()),
        Ok(other) => {
            tracing::warn!("Unexpected status reply from {}: {}", link.address(), other.type_name());
            None
        }
        Err(e) => {
            tracing::warn!("Status request to {} failed: {}", link.address(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryNetwork;
    use crate::network::Transport;
    use crate::state::Role;

    fn handler(role: Role) -> (ParticipantHandler, Arc<LocalNode>, watch::Receiver<bool>) {
        let network = Arc::new(MemoryNetwork::new()) as Arc<dyn Transport>;
        let node = Arc::new(LocalNode::new(20, role, Some(10), true, Duration::from_millis(100)));
        let (registry, _events) = PeerRegistry::new(network, Duration::from_millis(100), Duration::from_millis(20));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handler = ParticipantHandler::new(Arc::clone(&node), registry, Arc::new(shutdown_tx));
        (handler, node, shutdown_rx)
    }

    #[tokio::test]
    async fn test_prepare_reports_active_flag() {
        let (handler, _node, _shutdown) = handler(Role::Participant);
        assert_eq!(handler.on_prepare().await, PrepareVote { address: 20, ready: true });

        handler.change_status().await;
        assert_eq!(handler.on_prepare().await, PrepareVote { address: 20, ready: false });
    }

    #[tokio::test]
    async fn test_prepare_waits_for_delay() {
        let (handler, _node, _shutdown) = handler(Role::Participant);
        assert_eq!(handler.change_delay().await, Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        handler.on_prepare().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_status_toggle_is_involution() {
        let (handler, node, _shutdown) = handler(Role::Participant);
        let original = node.is_active().await;
        handler.change_status().await;
        assert_eq!(handler.change_status().await, original);
    }

    #[tokio::test]
    async fn test_delay_toggles_between_two_values() {
        let (handler, _node, _shutdown) = handler(Role::Participant);
        for _ in 0..4 {
            let delay = handler.change_delay().await;
            assert!(delay == Duration::ZERO || delay == Duration::from_millis(100));
        }
        assert_eq!(handler.get_info().await.delay, 0);
    }

    #[tokio::test]
    async fn test_commit_sets_value() {
        let (handler, node, _shutdown) = handler(Role::Participant);
        handler.on_abort().await;
        assert_eq!(node.committed_value().await, None);
        handler.on_commit(42).await;
        assert_eq!(node.committed_value().await, Some(42));
    }

    #[tokio::test]
    async fn test_servers_requires_coordinator() {
        let (handler, _node, _shutdown) = handler(Role::Participant);
        assert!(handler.get_available_servers().await.unwrap_err().is_not_coordinator());
    }

    #[tokio::test]
    async fn test_servers_lists_self_first() {
        let (handler, _node, _shutdown) = handler(Role::Coordinator);
        let servers = handler.get_available_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].port, 20);
        assert_eq!(servers[0].role, Role::Coordinator);
    }

    #[tokio::test]
    async fn test_close_only_on_coordinator() {
        let (participant, _node, shutdown) = handler(Role::Participant);
        assert!(!participant.close_coordinator().await);
        assert!(!*shutdown.borrow());

        let (coordinator, _node, shutdown) = handler(Role::Coordinator);
        assert!(coordinator.close_coordinator().await);
        assert!(*shutdown.borrow());
    }
}
