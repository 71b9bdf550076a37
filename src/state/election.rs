//! Leader Election
//!
//! "Lowest live address wins": probe every member, elect the minimum of the
//! reachable set, and drive the local role transition. This is the only
//! place a node's role changes or its peer links are rebuilt.
//!
//! Each node elects independently and there is no election epoch, so nodes
//! may disagree until every one of them has run an election after the last
//! topology change. A coordinator that takes over does not announce itself;
//! participants find it through their own heartbeat or disconnect triggers.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::network::{LivenessProber, PeerRegistry};
use crate::state::{LocalNode, Membership, NodeAddr, Role};

/// What one election run decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionOutcome {
    pub elected: NodeAddr,
    /// Reachable set the decision was based on, ascending
    pub reachable: Vec<NodeAddr>,
    pub role: Role,
    pub role_changed: bool,
    pub previous_coordinator: Option<NodeAddr>,
}

/// Runs elections for one node
pub struct ElectionEngine {
    node: Arc<LocalNode>,
    membership: Arc<Membership>,
    prober: LivenessProber,
    registry: PeerRegistry,
    /// One election at a time per node
    running: Mutex<()>,
}

impl ElectionEngine {
    pub fn new(
        node: Arc<LocalNode>,
        membership: Arc<Membership>,
        prober: LivenessProber,
        registry: PeerRegistry,
    ) -> Self {
        Self {
            node,
            membership,
            prober,
            registry,
            running: Mutex::new(()),
        }
    }

    /// Run one election
    pub async fn elect(&self) -> ElectionOutcome {
        let _running = self.running.lock().await;
        let me = self.node.address();

        let report = self.membership.probe_all(&self.prober).await;
        let elected = report.lowest_reachable().unwrap_or(me);
        let new_role = if elected == me {
            Role::Coordinator
        } else {
            Role::Participant
        };

        let previous_coordinator = self.node.known_coordinator().await;
        if previous_coordinator != Some(elected) {
            tracing::warn!(
                "New coordinator elected: {} (was: {:?})",
                elected,
                previous_coordinator
            );
        }

        let role_changed = self.node.set_role(new_role).await;
        if role_changed {
            tracing::warn!("Role changed to: {}", new_role);
            match new_role {
                Role::Coordinator => self.registry.promote(self.membership.peers()).await,
                Role::Participant => self.registry.demote(elected).await,
            }
        } else if new_role == Role::Participant && !self.registry.upstream_targets(elected).await {
            self.registry.connect_upstream(elected).await;
        }

        // Always overwritten so a stale coordinator never lingers
        self.node.set_known_coordinator(Some(elected)).await;

        tracing::debug!(
            "Election on {}: reachable={:?} elected={} role={}",
            me,
            report.reachable,
            elected,
            new_role
        );

        ElectionOutcome {
            elected,
            reachable: report.reachable,
            role: new_role,
            role_changed,
            previous_coordinator,
        }
    }
}
