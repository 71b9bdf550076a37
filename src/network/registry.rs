//! Peer Connection Registry
//!
//! Owns the durable outbound links of a node. As coordinator it keeps one
//! link per other member, reconnecting on a fixed interval; as participant
//! it keeps a single upstream link to the coordinator. Membership
//! transitions are reported as [`RegistryEvent`]s.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::{PeerLink, Transport};
use crate::state::NodeAddr;

/// Capacity of the registry event queue
const EVENT_QUEUE: usize = 1024;

/// Link membership transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    /// Coordinator side: a participant link came up
    ParticipantJoined(NodeAddr),
    /// Coordinator side: a participant link dropped
    ParticipantLeft(NodeAddr),
    /// Participant side: the upstream link came up
    CoordinatorConnected(NodeAddr),
    /// Participant side: the upstream link dropped
    CoordinatorLost(NodeAddr),
}

struct Upstream {
    address: NodeAddr,
    link: Option<Arc<PeerLink>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct LinkTable {
    /// Bumped whenever the participant set is rebuilt
    participant_generation: u64,
    participants: BTreeMap<NodeAddr, Arc<PeerLink>>,
    participant_tasks: Vec<JoinHandle<()>>,
    /// Bumped whenever the upstream link is replaced
    upstream_generation: u64,
    upstream: Option<Upstream>,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    table: RwLock<LinkTable>,
    events: mpsc::Sender<RegistryEvent>,
}

/// Registry of live peer links (cheap to clone)
#[derive(Clone)]
pub struct PeerRegistry {
    inner: Arc<RegistryInner>,
}

impl PeerRegistry {
    /// Create a registry and the receiver for its events
    pub fn new(
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
        reconnect_interval: Duration,
    ) -> (Self, mpsc::Receiver<RegistryEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE);
        let registry = Self {
            inner: Arc::new(RegistryInner {
                transport,
                connect_timeout,
                reconnect_interval,
                table: RwLock::new(LinkTable::default()),
                events,
            }),
        };
        (registry, events_rx)
    }

    /// Coordinator-side setup: drop the upstream link and open one link per peer
    pub async fn promote(&self, peers: impl IntoIterator<Item = NodeAddr>) {
        self.close_upstream().await;

        let mut table = self.inner.table.write().await;
        Self::teardown_participants(&mut table);
        let generation = table.participant_generation;

        for address in peers {
            let task = tokio::spawn(supervise_participant(
                Arc::clone(&self.inner),
                address,
                generation,
            ));
            table.participant_tasks.push(task);
        }
        tracing::info!(
            "Opened participant links to {} peers",
            table.participant_tasks.len()
        );
    }

    /// Participant-side setup: drop coordinator-side links and link to `coordinator`
    pub async fn demote(&self, coordinator: NodeAddr) {
        self.close_participants().await;
        self.connect_upstream(coordinator).await;
    }

    /// Replace the upstream link with one to `coordinator`
    pub async fn connect_upstream(&self, coordinator: NodeAddr) {
        let mut table = self.inner.table.write().await;
        Self::teardown_upstream(&mut table);
        let generation = table.upstream_generation;

        // Spawned under the lock so the task cannot observe the table before
        // its handle is stored
        let task = tokio::spawn(supervise_upstream(
            Arc::clone(&self.inner),
            coordinator,
            generation,
        ));
        table.upstream = Some(Upstream {
            address: coordinator,
            link: None,
            task,
        });
    }

    /// Close every coordinator-side link
    pub async fn close_participants(&self) {
        let mut table = self.inner.table.write().await;
        Self::teardown_participants(&mut table);
    }

    /// Close the upstream link, if any
    pub async fn close_upstream(&self) {
        let mut table = self.inner.table.write().await;
        Self::teardown_upstream(&mut table);
    }

    /// Close everything
    pub async fn close_all(&self) {
        let mut table = self.inner.table.write().await;
        Self::teardown_participants(&mut table);
        Self::teardown_upstream(&mut table);
    }

    /// Snapshot of connected participant links, ascending by address
    pub async fn connected_participants(&self) -> Vec<Arc<PeerLink>> {
        let table = self.inner.table.read().await;
        table
            .participants
            .values()
            .filter(|link| !link.is_closed())
            .cloned()
            .collect()
    }

    /// Addresses of connected participants, ascending
    pub async fn connected_addresses(&self) -> Vec<NodeAddr> {
        self.connected_participants()
            .await
            .iter()
            .map(|link| link.address())
            .collect()
    }

    /// True if the upstream link points at `coordinator` and has not given up
    ///
    /// An upstream supervisor stops after reporting its link lost, so a
    /// finished task means the link needs to be reopened.
    pub async fn upstream_targets(&self, coordinator: NodeAddr) -> bool {
        let table = self.inner.table.read().await;
        table
            .upstream
            .as_ref()
            .is_some_and(|upstream| upstream.address == coordinator && !upstream.task.is_finished())
    }

    fn teardown_participants(table: &mut LinkTable) {
        table.participant_generation += 1;
        for task in table.participant_tasks.drain(..) {
            task.abort();
        }
        for (address, link) in std::mem::take(&mut table.participants) {
            tracing::debug!("Closing participant link to {}", address);
            link.close();
        }
    }

    fn teardown_upstream(table: &mut LinkTable) {
        table.upstream_generation += 1;
        if let Some(upstream) = table.upstream.take() {
            tracing::debug!("Closing upstream link to {}", upstream.address);
            upstream.task.abort();
            if let Some(link) = upstream.link {
                link.close();
            }
        }
    }
}

impl RegistryInner {
    async fn emit(&self, event: RegistryEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("Registry event {:?} dropped: no listener", event);
        }
    }

    /// Reconnect delay with up to 25% jitter
    fn retry_delay(&self) -> Duration {
        let base = self.reconnect_interval.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}

/// Keep a coordinator-side link to `address` up until torn down
async fn supervise_participant(inner: Arc<RegistryInner>, address: NodeAddr, generation: u64) {
    loop {
        match inner.transport.connect(address, inner.connect_timeout).await {
            Ok(link) => {
                let link = Arc::new(link);
                {
                    let mut table = inner.table.write().await;
                    if table.participant_generation != generation {
                        link.close();
                        return;
                    }
                    table.participants.insert(address, Arc::clone(&link));
                }
                tracing::info!("[COORDINATOR] Connected to {}", address);
                inner.emit(RegistryEvent::ParticipantJoined(address)).await;

                link.closed().await;

                {
                    let mut table = inner.table.write().await;
                    if table.participant_generation != generation {
                        return;
                    }
                    let same_link = table
                        .participants
                        .get(&address)
                        .is_some_and(|current| Arc::ptr_eq(current, &link));
                    if same_link {
                        table.participants.remove(&address);
                    }
                }
                tracing::warn!("[COORDINATOR] Disconnected from {}", address);
                inner.emit(RegistryEvent::ParticipantLeft(address)).await;
            }
            Err(e) => {
                tracing::trace!("Participant {} not reachable yet: {}", address, e);
            }
        }

        tokio::time::sleep(inner.retry_delay()).await;
    }
}

/// Connect to the coordinator, then report the first drop and stop
async fn supervise_upstream(inner: Arc<RegistryInner>, address: NodeAddr, generation: u64) {
    let link = loop {
        match inner.transport.connect(address, inner.connect_timeout).await {
            Ok(link) => break Arc::new(link),
            Err(e) => {
                tracing::trace!("Coordinator {} not reachable yet: {}", address, e);
                tokio::time::sleep(inner.retry_delay()).await;
            }
        }
    };

    {
        let mut table = inner.table.write().await;
        if table.upstream_generation != generation {
            link.close();
            return;
        }
        if let Some(upstream) = table.upstream.as_mut() {
            upstream.link = Some(Arc::clone(&link));
        }
    }
    tracing::info!("[PARTICIPANT] Connected to coordinator {}", address);
    inner.emit(RegistryEvent::CoordinatorConnected(address)).await;

    link.closed().await;

    {
        let mut table = inner.table.write().await;
        if table.upstream_generation != generation {
            return;
        }
        if let Some(upstream) = table.upstream.as_mut() {
            upstream.link = None;
        }
    }
    tracing::warn!("[PARTICIPANT] Disconnected from coordinator {}", address);
    inner.emit(RegistryEvent::CoordinatorLost(address)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryNetwork;
    use crate::network::protocol::Message;
    use crate::network::session::RequestHandler;

    struct Echo;

    #[async_trait::async_trait]
    impl RequestHandler for Echo {
        async fn handle_request(&self, message: Message) -> Message {
            message
        }

        async fn handle_notify(&self, _message: Message) {}
    }

    fn registry(network: &Arc<MemoryNetwork>) -> (PeerRegistry, mpsc::Receiver<RegistryEvent>) {
        PeerRegistry::new(
            Arc::clone(network) as Arc<dyn Transport>,
            Duration::from_millis(100),
            Duration::from_millis(20),
        )
    }

    async fn next_event(events: &mut mpsc::Receiver<RegistryEvent>) -> RegistryEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timed out")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_promote_tracks_joins_and_leaves() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(20, Arc::new(Echo));
        let (registry, mut events) = registry(&network);

        registry.promote([20, 30]).await;
        assert_eq!(next_event(&mut events).await, RegistryEvent::ParticipantJoined(20));
        assert_eq!(registry.connected_addresses().await, vec![20]);

        // 30 comes up later and is picked up by the reconnect loop
        network.register(30, Arc::new(Echo));
        assert_eq!(next_event(&mut events).await, RegistryEvent::ParticipantJoined(30));
        assert_eq!(registry.connected_addresses().await, vec![20, 30]);

        network.unregister(20);
        assert_eq!(next_event(&mut events).await, RegistryEvent::ParticipantLeft(20));
        assert_eq!(registry.connected_addresses().await, vec![30]);

        registry.close_participants().await;
        assert!(registry.connected_addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_lost_reported_once() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(10, Arc::new(Echo));
        let (registry, mut events) = registry(&network);

        registry.connect_upstream(10).await;
        assert_eq!(next_event(&mut events).await, RegistryEvent::CoordinatorConnected(10));
        assert!(registry.upstream_targets(10).await);

        network.unregister(10);
        assert_eq!(next_event(&mut events).await, RegistryEvent::CoordinatorLost(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!registry.upstream_targets(10).await);
    }

    #[tokio::test]
    async fn test_promote_closes_upstream_and_demote_closes_participants() {
        let network = Arc::new(MemoryNetwork::new());
        for addr in [10, 20, 30] {
            network.register(addr, Arc::new(Echo));
        }
        let (registry, mut events) = registry(&network);

        registry.connect_upstream(10).await;
        assert_eq!(next_event(&mut events).await, RegistryEvent::CoordinatorConnected(10));

        registry.promote([10, 30]).await;
        assert!(!registry.upstream_targets(10).await);
        next_event(&mut events).await;
        next_event(&mut events).await;
        assert_eq!(registry.connected_addresses().await, vec![10, 30]);

        registry.demote(10).await;
        assert!(registry.connected_addresses().await.is_empty());
        assert_eq!(next_event(&mut events).await, RegistryEvent::CoordinatorConnected(10));

        // Torn-down links never report a departure
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
    }
}
