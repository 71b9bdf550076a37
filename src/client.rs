//! Dashboard Client
//!
//! Talks to the coordinator on behalf of an operator: lists servers,
//! submits values and toggles per-node flags. When the coordinator link
//! drops, `failover` walks the previously known active servers in
//! ascending order and adopts the first one that accepts a connection.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::protocol::{
    ChangeDelayReply, ChangeStatusReply, CoordinatorReply, Message, ReplyStatus, ServersReply,
};
use crate::network::{PeerLink, Transport};
use crate::state::{NodeAddr, ServerInfo, Value};

/// Connection to the current coordinator
pub struct DashboardClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    coordinator: NodeAddr,
    link: PeerLink,
    known_servers: Vec<ServerInfo>,
}

impl DashboardClient {
    /// Connect to `coordinator`
    pub async fn connect(transport: Arc<dyn Transport>, coordinator: NodeAddr, timeout: Duration) -> Result<Self> {
        let link = transport.connect(coordinator, timeout).await?;
        tracing::debug!("Dashboard connected to {}", coordinator);
        Ok(Self {
            transport,
            timeout,
            coordinator,
            link,
            known_servers: Vec::new(),
        })
    }

    /// Address currently treated as the coordinator
    pub fn coordinator(&self) -> NodeAddr {
        self.coordinator
    }

    /// Server list from the last successful `servers` call
    pub fn known_servers(&self) -> &[ServerInfo] {
        &self.known_servers
    }

    pub fn is_connected(&self) -> bool {
        !self.link.is_closed()
    }

    /// Wait until the coordinator link drops
    pub async fn disconnected(&self) {
        self.link.closed().await
    }

    /// Fetch the coordinator's raw `servers` reply
    ///
    /// A successful list is remembered for `failover`.
    pub async fn servers_reply(&mut self) -> Result<ServersReply> {
        match self.link.request(Message::Servers).await? {
            Message::ServersResponse(reply) => {
                if reply.status == ReplyStatus::Ok {
                    self.known_servers = reply.servers.clone();
                }
                Ok(reply)
            }
            other => Err(Error::UnexpectedMessage {
                expected: "servers_response",
                got: other.type_name(),
            }),
        }
    }

    /// Fetch the coordinator's server list and remember it
    pub async fn servers(&mut self) -> Result<Vec<ServerInfo>> {
        let reply = self.servers_reply().await?;
        match reply.status {
            ReplyStatus::Ok => Ok(reply.servers),
            ReplyStatus::Error => Err(remote_error(reply.error_message)),
        }
    }

    /// Ask the coordinator to commit `value`
    pub async fn commit(&self, value: Value) -> Result<CoordinatorReply> {
        match self.link.request(Message::Coordinator { value }).await? {
            Message::CoordinatorResponse(reply) => Ok(reply),
            other => Err(Error::UnexpectedMessage {
                expected: "coordinator_response",
                got: other.type_name(),
            }),
        }
    }

    /// Toggle the active flag on `port`
    pub async fn change_status(&self, port: NodeAddr) -> Result<ChangeStatusReply> {
        match self.request_to(port, Message::ChangeStatus).await? {
            Message::ChangeStatusResponse(reply) => Ok(reply),
            other => Err(Error::UnexpectedMessage {
                expected: "changeStatus_response",
                got: other.type_name(),
            }),
        }
    }

    /// Toggle the prepare delay on `port`
    pub async fn change_delay(&self, port: NodeAddr) -> Result<ChangeDelayReply> {
        match self.request_to(port, Message::ChangeDelay).await? {
            Message::ChangeDelayResponse(reply) => Ok(reply),
            other => Err(Error::UnexpectedMessage {
                expected: "changeDelay_response",
                got: other.type_name(),
            }),
        }
    }

    /// Tell the coordinator to exit; no reply is sent
    pub async fn close_coordinator(&self) -> Result<()> {
        self.link.notify(Message::CloseCoordinator).await
    }

    /// Reconnect to the first reachable previously known active server
    ///
    /// The new coordinator's server list is re-fetched; if it has not yet
    /// taken over, the list from before the failover is kept.
    pub async fn failover(&mut self) -> Result<NodeAddr> {
        let mut candidates: Vec<NodeAddr> = self
            .known_servers
            .iter()
            .filter(|server| server.is_active)
            .map(|server| server.port)
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        for port in candidates {
            match self.transport.connect(port, self.timeout).await {
                Ok(link) => {
                    self.link.close();
                    self.link = link;
                    self.coordinator = port;
                    tracing::info!("Dashboard failed over to {}", port);

                    if let Err(e) = self.servers().await {
                        tracing::warn!("Server list from {} unavailable: {}", port, e);
                    }
                    return Ok(port);
                }
                Err(e) => tracing::debug!("Failover candidate {} unreachable: {}", port, e),
            }
        }

        Err(Error::ConnectionFailed {
            address: "cluster".into(),
            reason: "no known active server is reachable".into(),
        })
    }

    async fn request_to(&self, port: NodeAddr, message: Message) -> Result<Message> {
        if port == self.coordinator && self.is_connected() {
            return self.link.request(message).await;
        }

        let link = self.transport.connect(port, self.timeout).await?;
        let reply = link.request(message).await;
        link.close();
        reply
    }
}

fn remote_error(message: Option<String>) -> Error {
    match message {
        Some(message) if message == Error::NotCoordinator.to_string() => Error::NotCoordinator,
        Some(message) => Error::Internal(message),
        None => Error::Internal("request failed".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryNetwork;
    use crate::network::RequestHandler;
    use crate::state::Role;

    struct FakeCoordinator {
        port: NodeAddr,
    }

    #[async_trait::async_trait]
    impl RequestHandler for FakeCoordinator {
        async fn handle_request(&self, message: Message) -> Message {
            match message {
                Message::Servers => Message::ServersResponse(ServersReply::ok(vec![
                    ServerInfo { port: self.port, is_active: true, role: Role::Coordinator, delay: 0 },
                    ServerInfo { port: 30, is_active: false, role: Role::Participant, delay: 0 },
                    ServerInfo { port: 40, is_active: true, role: Role::Participant, delay: 0 },
                ])),
                Message::ChangeStatus => Message::ChangeStatusResponse(ChangeStatusReply::ok(false)),
                other => Message::unexpected(&other),
            }
        }

        async fn handle_notify(&self, _message: Message) {}
    }

    #[tokio::test]
    async fn test_failover_skips_inactive_servers() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(10, Arc::new(FakeCoordinator { port: 10 }));
        network.register(30, Arc::new(FakeCoordinator { port: 30 }));
        network.register(40, Arc::new(FakeCoordinator { port: 40 }));

        let mut client = DashboardClient::connect(network.clone(), 10, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(client.servers().await.unwrap().len(), 3);

        network.unregister(10);
        tokio::time::timeout(Duration::from_secs(1), client.disconnected()).await.unwrap();
        assert!(!client.is_connected());

        // 10 is gone and 30 was inactive, so 40 is adopted
        assert_eq!(client.failover().await.unwrap(), 40);
        assert_eq!(client.coordinator(), 40);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_failover_without_candidates() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(10, Arc::new(FakeCoordinator { port: 10 }));
        let mut client = DashboardClient::connect(network.clone(), 10, Duration::from_millis(100))
            .await
            .unwrap();
        network.unregister(10);
        assert!(client.failover().await.is_err());
    }

    #[tokio::test]
    async fn test_change_status_on_other_node() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(10, Arc::new(FakeCoordinator { port: 10 }));
        network.register(40, Arc::new(FakeCoordinator { port: 40 }));
        let client = DashboardClient::connect(network, 10, Duration::from_millis(100))
            .await
            .unwrap();
        let reply = client.change_status(40).await.unwrap();
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert!(!reply.is_active);
    }

    #[tokio::test]
    async fn test_servers_reply_is_printed_whole() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(10, Arc::new(FakeCoordinator { port: 10 }));
        let mut client = DashboardClient::connect(network, 10, Duration::from_millis(100))
            .await
            .unwrap();

        let reply = client.servers_reply().await.unwrap();
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(client.known_servers().len(), 3);

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "Ok");
        assert_eq!(json["servers"][0]["port"], 10);
        assert_eq!(json["servers"][0]["isActive"], true);
    }

    #[test]
    fn test_remote_error_mapping() {
        assert!(remote_error(Some("not coordinator".into())).is_not_coordinator());
        assert!(matches!(remote_error(None), Error::Internal(_)));
    }
}
