//! Multi-node scenarios over the in-memory network

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use wolfcommit::client::DashboardClient;
use wolfcommit::config::WolfCommitConfig;
use wolfcommit::network::memory::MemoryNetwork;
use wolfcommit::network::protocol::TransactionStatus;
use wolfcommit::node::Node;
use wolfcommit::state::{NodeAddr, Role};
use wolfcommit::transaction::Decision;
use wolfcommit::Error;

const A: NodeAddr = 10;
const B: NodeAddr = 20;
const C: NodeAddr = 30;

fn config(ports: &[NodeAddr]) -> WolfCommitConfig {
    let mut config = WolfCommitConfig::default();
    config.cluster.ports = ports.to_vec();
    config.cluster.heartbeat_interval_ms = 50;
    config.cluster.probe_timeout_ms = 50;
    config.cluster.connect_timeout_ms = 50;
    config.cluster.reconnect_interval_ms = 20;
    config.cluster.slow_delay_ms = 200;
    config
}

/// Poll `check` until it holds or two seconds pass
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

struct Cluster {
    network: Arc<MemoryNetwork>,
    config: WolfCommitConfig,
    nodes: BTreeMap<NodeAddr, Arc<Node>>,
}

impl Cluster {
    async fn start(ports: &[NodeAddr]) -> Self {
        let mut cluster = Self {
            network: Arc::new(MemoryNetwork::new()),
            config: config(ports),
            nodes: BTreeMap::new(),
        };
        for &port in ports {
            cluster.boot(port).await;
        }

        let coordinator = ports.iter().copied().min().unwrap();
        let others: Vec<NodeAddr> = ports.iter().copied().filter(|p| *p != coordinator).collect();
        let node = cluster.node(coordinator);
        assert!(
            eventually(|| async { node.registry().connected_addresses().await == others }).await,
            "participants never connected"
        );
        cluster
    }

    async fn boot(&mut self, port: NodeAddr) {
        let node = Node::start(&self.config, port, self.network.clone()).await.unwrap();
        self.network.register(port, node.clone());
        self.nodes.insert(port, node);
    }

    fn node(&self, port: NodeAddr) -> Arc<Node> {
        Arc::clone(&self.nodes[&port])
    }

    /// Make a node unreachable and stop it
    async fn crash(&mut self, port: NodeAddr) {
        self.network.unregister(port);
        if let Some(node) = self.nodes.remove(&port) {
            node.shutdown().await;
        }
    }

    async fn shutdown(self) {
        for node in self.nodes.values() {
            node.shutdown().await;
        }
    }
}

#[tokio::test]
async fn test_inactive_participant_aborts() {
    let cluster = Cluster::start(&[A, B, C]).await;
    assert!(!cluster.node(B).participant().change_status().await);

    let decision = cluster.node(A).coordinator().request_to_server(42).await.unwrap();
    assert_eq!(decision, Decision::Aborted { inactive_servers: vec![B] });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.node(B).state().committed_value().await, None);
    assert_eq!(cluster.node(C).state().committed_value().await, None);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_all_active_commits() {
    let cluster = Cluster::start(&[A, B, C]).await;

    let decision = cluster.node(A).coordinator().request_to_server(42).await.unwrap();
    assert_eq!(decision, Decision::Committed);

    for port in [B, C] {
        let node = cluster.node(port);
        assert!(eventually(|| async { node.state().committed_value().await == Some(42) }).await);
    }
    // The coordinator does not apply the value to itself
    assert_eq!(cluster.node(A).state().committed_value().await, None);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_coordinator_crash_converges_on_next_lowest() {
    let mut cluster = Cluster::start(&[A, B, C]).await;
    cluster.crash(A).await;

    let (b, c) = (cluster.node(B), cluster.node(C));
    assert!(eventually(|| async { b.state().role().await == Role::Coordinator }).await);
    assert!(eventually(|| async { c.state().known_coordinator().await == Some(B) }).await);
    assert!(eventually(|| async { b.registry().connected_addresses().await == vec![C] }).await);

    assert_eq!(c.state().role().await, Role::Participant);
    assert!(b.state().coordinator_view_consistent().await);
    assert!(c.state().coordinator_view_consistent().await);

    // The new coordinator runs transactions over the survivors
    assert_eq!(b.coordinator().request_to_server(7).await.unwrap(), Decision::Committed);
    assert!(eventually(|| async { c.state().committed_value().await == Some(7) }).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_servers_only_on_coordinator() {
    let cluster = Cluster::start(&[A, B, C]).await;

    let err = cluster.node(B).participant().get_available_servers().await.unwrap_err();
    assert!(err.is_not_coordinator());

    let servers = cluster.node(A).participant().get_available_servers().await.unwrap();
    let ports: Vec<NodeAddr> = servers.iter().map(|s| s.port).collect();
    assert_eq!(ports, vec![A, B, C]);
    assert_eq!(servers[0].role, Role::Coordinator);
    assert!(servers[1..].iter().all(|s| s.role == Role::Participant));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_request_on_participant_has_no_effect() {
    let cluster = Cluster::start(&[A, B, C]).await;

    let err = cluster.node(B).coordinator().request_to_server(5).await.unwrap_err();
    assert!(matches!(err, Error::NotCoordinator));

    tokio::time::sleep(Duration::from_millis(50)).await;
    for port in [A, B, C] {
        assert_eq!(cluster.node(port).state().committed_value().await, None);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_overlapping_transactions_rejected() {
    let cluster = Cluster::start(&[A, B, C]).await;
    cluster.node(C).participant().change_delay().await;

    let a = cluster.node(A);
    let first = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.coordinator().request_to_server(1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = a.coordinator().request_to_server(2).await;
    assert!(matches!(second, Err(Error::TransactionInProgress)));
    assert_eq!(first.await.unwrap().unwrap(), Decision::Committed);

    let c = cluster.node(C);
    assert!(eventually(|| async { c.state().committed_value().await == Some(1) }).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_participant_crash_leaves_participant_set() {
    let mut cluster = Cluster::start(&[A, B, C]).await;
    cluster.crash(C).await;

    let a = cluster.node(A);
    assert!(eventually(|| async { a.registry().connected_addresses().await == vec![B] }).await);

    let servers = a.participant().get_available_servers().await.unwrap();
    assert!(servers.iter().all(|s| s.port != C));
    assert_eq!(a.coordinator().request_to_server(3).await.unwrap(), Decision::Committed);

    // C rejoins once it is back
    cluster.boot(C).await;
    assert!(eventually(|| async { a.registry().connected_addresses().await == vec![B, C] }).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_dashboard_toggles_and_commits() {
    let cluster = Cluster::start(&[A, B, C]).await;
    let client = DashboardClient::connect(cluster.network.clone(), A, Duration::from_millis(100))
        .await
        .unwrap();

    assert!(!client.change_status(B).await.unwrap().is_active);
    let reply = client.commit(11).await.unwrap();
    assert_eq!(reply.status, TransactionStatus::Aborted);
    assert_eq!(reply.inactive_servers, vec![B]);

    assert!(client.change_status(B).await.unwrap().is_active);
    assert_eq!(client.change_delay(C).await.unwrap().delay, 200);
    assert_eq!(client.change_delay(C).await.unwrap().delay, 0);

    let reply = client.commit(12).await.unwrap();
    assert_eq!(reply.status, TransactionStatus::Committed);
    assert!(reply.error_message.is_none());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_dashboard_fails_over_after_close() {
    let mut cluster = Cluster::start(&[A, B, C]).await;
    let mut client = DashboardClient::connect(cluster.network.clone(), A, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(client.servers().await.unwrap().len(), 3);

    client.close_coordinator().await.unwrap();
    let a = cluster.node(A);
    assert!(eventually(|| async { a.is_shutting_down() }).await);

    // The process exits on close
    cluster.crash(A).await;
    tokio::time::timeout(Duration::from_secs(1), client.disconnected()).await.unwrap();

    assert_eq!(client.failover().await.unwrap(), B);
    let b = cluster.node(B);
    assert!(eventually(|| async { b.state().is_coordinator().await }).await);
    assert!(eventually(|| async { b.registry().connected_addresses().await == vec![C] }).await);

    let servers = client.servers().await.unwrap();
    let ports: Vec<NodeAddr> = servers.iter().map(|s| s.port).collect();
    assert_eq!(ports, vec![B, C]);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_close_ignored_by_participant() {
    let cluster = Cluster::start(&[A, B]).await;
    assert!(!cluster.node(B).participant().close_coordinator().await);
    assert!(!cluster.node(B).is_shutting_down());
    cluster.shutdown().await;
}

/// Without an election epoch, a restarted lower node and the node that
/// replaced it both believe they coordinate until something triggers the
/// newer one to elect again. Nothing does while it stays coordinator.
#[tokio::test]
async fn test_restarted_node_leaves_stale_coordinator() {
    let mut cluster = Cluster::start(&[A, B, C]).await;
    cluster.crash(A).await;

    let b = cluster.node(B);
    assert!(eventually(|| async { b.state().role().await == Role::Coordinator }).await);

    cluster.boot(A).await;
    let a = cluster.node(A);
    assert!(eventually(|| async { a.registry().connected_addresses().await == vec![B, C] }).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.state().role().await, Role::Coordinator);
    assert_eq!(b.state().role().await, Role::Coordinator);

    // A fresh election on B resolves it
    let outcome = b.election().elect().await;
    assert_eq!(outcome.elected, A);
    assert_eq!(b.state().role().await, Role::Participant);

    cluster.shutdown().await;
}
