//! Cluster Node
//!
//! Wires one node's component graph together: local state, membership,
//! registry, election, heartbeat and the two transaction roles. The node is
//! also the request handler every inbound session dispatches to.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::WolfCommitConfig;
use crate::error::{Error, Result};
use crate::network::protocol::{
    ChangeDelayReply, ChangeStatusReply, CoordinatorReply, Message, PrepareReply, ServersReply,
    StatusReply,
};
use crate::network::{LivenessProber, PeerRegistry, RegistryEvent, RequestHandler, Transport};
use crate::state::{ElectionEngine, HeartbeatMonitor, LocalNode, Membership, NodeAddr, Role};
use crate::transaction::{Decision, ParticipantHandler, TransactionCoordinator};

/// One running cluster member
pub struct Node {
    local: Arc<LocalNode>,
    membership: Arc<Membership>,
    registry: PeerRegistry,
    election: Arc<ElectionEngine>,
    heartbeat: Arc<HeartbeatMonitor>,
    coordinator: TransactionCoordinator,
    participant: ParticipantHandler,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Build the node for `address` and start its background tasks
    ///
    /// The lowest configured port starts as coordinator and links to every
    /// other member; everyone else starts as a participant of it. The
    /// caller makes the node reachable by handing it to a listener.
    pub async fn start(
        config: &WolfCommitConfig,
        address: NodeAddr,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.ensure_member(address)?;
        let cluster = &config.cluster;
        let bootstrap = cluster
            .bootstrap_coordinator()
            .ok_or_else(|| Error::Config("cluster.ports cannot be empty".into()))?;

        let role = if address == bootstrap {
            Role::Coordinator
        } else {
            Role::Participant
        };
        let active = !cluster.inactive_on_start.contains(&address);

        let local = Arc::new(LocalNode::new(
            address,
            role,
            Some(bootstrap),
            active,
            cluster.slow_delay(),
        ));
        let membership = Arc::new(Membership::new(address, cluster.sorted_ports()));
        let prober = LivenessProber::new(Arc::clone(&transport), cluster.probe_timeout());
        let (registry, events) = PeerRegistry::new(
            transport,
            cluster.connect_timeout(),
            cluster.reconnect_interval(),
        );

        let election = Arc::new(ElectionEngine::new(
            Arc::clone(&local),
            Arc::clone(&membership),
            prober.clone(),
            registry.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&local),
            prober,
            Arc::clone(&election),
            cluster.heartbeat_interval(),
        ));

        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let coordinator = TransactionCoordinator::new(
            Arc::clone(&local),
            registry.clone(),
            cluster.prepare_timeout(),
        );
        let participant = ParticipantHandler::new(
            Arc::clone(&local),
            registry.clone(),
            Arc::clone(&shutdown),
        );

        match role {
            Role::Coordinator => registry.promote(membership.peers()).await,
            Role::Participant => registry.connect_upstream(bootstrap).await,
        }

        let event_loop = tokio::spawn(run_events(
            events,
            Arc::clone(&local),
            Arc::clone(&election),
            registry.clone(),
            shutdown.subscribe(),
        ));
        let heartbeat_loop = {
            let heartbeat = Arc::clone(&heartbeat);
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { heartbeat.run(shutdown).await })
        };

        tracing::info!(
            "Node {} started as {} (coordinator: {}, active: {}, members: {:?})",
            address,
            role,
            bootstrap,
            active,
            membership.members()
        );

        Ok(Arc::new(Self {
            local,
            membership,
            registry,
            election,
            heartbeat,
            coordinator,
            participant,
            shutdown,
            tasks: Mutex::new(vec![event_loop, heartbeat_loop]),
        }))
    }

    pub fn address(&self) -> NodeAddr {
        self.local.address()
    }

    pub fn state(&self) -> &Arc<LocalNode> {
        &self.local
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn election(&self) -> &Arc<ElectionEngine> {
        &self.election
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn participant(&self) -> &ParticipantHandler {
        &self.participant
    }

    /// Receiver that flips to true when the node is asked to exit
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop background tasks and close every peer link
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.registry.close_all().await;
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        tracing::info!("Node {} stopped", self.address());
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// React to link changes reported by the registry
async fn run_events(
    mut events: mpsc::Receiver<RegistryEvent>,
    local: Arc<LocalNode>,
    election: Arc<ElectionEngine>,
    registry: PeerRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    RegistryEvent::ParticipantJoined(address) => {
                        tracing::info!("Participant {} connected", address);
                    }
                    RegistryEvent::ParticipantLeft(address) => {
                        tracing::warn!("Participant {} disconnected", address);
                    }
                    RegistryEvent::CoordinatorConnected(address) => {
                        tracing::info!("Connected to coordinator {}", address);
                    }
                    RegistryEvent::CoordinatorLost(address) => {
                        tracing::warn!("Lost connection to coordinator {}", address);
                        if local.forget_coordinator(address).await {
                            election.elect().await;
                        }
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    registry.close_all().await;
    tracing::debug!("Node event loop stopped");
}

#[async_trait]
impl RequestHandler for Node {
    async fn handle_request(&self, message: Message) -> Message {
        match message {
            Message::Prepare => {
                let vote = self.participant.on_prepare().await;
                Message::PrepareResponse(PrepareReply::ok(vote.ready, vote.address))
            }
            Message::Status => Message::StatusResponse(StatusReply::ok(self.participant.get_info().await)),
            Message::Coordinator { value } => {
                let reply = match self.coordinator.request_to_server(value).await {
                    Ok(Decision::Committed) => CoordinatorReply::committed(),
                    Ok(Decision::Aborted { inactive_servers }) => {
                        CoordinatorReply::aborted(inactive_servers)
                    }
                    Err(e) => CoordinatorReply::error(e.to_string()),
                };
                Message::CoordinatorResponse(reply)
            }
            Message::Servers => {
                let reply = match self.participant.get_available_servers().await {
                    Ok(servers) => ServersReply::ok(servers),
                    Err(e) => ServersReply::error(e.to_string()),
                };
                Message::ServersResponse(reply)
            }
            Message::ChangeStatus => {
                Message::ChangeStatusResponse(ChangeStatusReply::ok(self.participant.change_status().await))
            }
            Message::ChangeDelay => {
                Message::ChangeDelayResponse(ChangeDelayReply::ok(self.participant.change_delay().await))
            }
            other => {
                tracing::debug!("Unexpected request: {}", other.type_name());
                Message::unexpected(&other)
            }
        }
    }

    async fn handle_notify(&self, message: Message) {
        match message {
            Message::Commit { value } => self.participant.on_commit(value).await,
            Message::Abort => self.participant.on_abort().await,
            Message::CloseCoordinator => {
                self.participant.close_coordinator().await;
            }
            other => tracing::debug!("Ignoring notification: {}", other.type_name()),
        }
    }
}
