//! Heartbeat Monitor
//!
//! The only periodic trigger: every interval a participant probes the
//! coordinator it believes in and runs an election if it is gone or unknown.
//! Runs on its own task, so probing never stalls request handling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::network::LivenessProber;
use crate::state::{ElectionEngine, ElectionOutcome, LocalNode, NodeAddr, Role};

/// Result of one heartbeat check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatCheck {
    /// This node is the coordinator; nothing to watch
    NotParticipant,
    /// No coordinator was known, so an election ran
    NoCoordinator(ElectionOutcome),
    /// Believed coordinator is this node (should not happen for a participant)
    SelfCoordinator,
    /// Coordinator answered the probe
    CoordinatorAlive(NodeAddr),
    /// Coordinator failed the probe and an election ran
    CoordinatorDead(NodeAddr, ElectionOutcome),
}

/// Periodic coordinator liveness check
pub struct HeartbeatMonitor {
    node: Arc<LocalNode>,
    prober: LivenessProber,
    election: Arc<ElectionEngine>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        node: Arc<LocalNode>,
        prober: LivenessProber,
        election: Arc<ElectionEngine>,
        interval: Duration,
    ) -> Self {
        Self {
            node,
            prober,
            election,
            interval,
        }
    }

    /// Run one check
    pub async fn check(&self) -> HeartbeatCheck {
        let state = self.node.snapshot().await;
        if state.role != Role::Participant {
            return HeartbeatCheck::NotParticipant;
        }

        let coordinator = match state.known_coordinator {
            Some(coordinator) => coordinator,
            None => {
                tracing::info!("No known coordinator, starting election");
                return HeartbeatCheck::NoCoordinator(self.election.elect().await);
            }
        };

        if coordinator == self.node.address() {
            return HeartbeatCheck::SelfCoordinator;
        }

        if self.prober.probe(coordinator).await {
            tracing::trace!("Coordinator {} is alive", coordinator);
            HeartbeatCheck::CoordinatorAlive(coordinator)
        } else {
            tracing::warn!("Coordinator {} is unreachable, starting election", coordinator);
            HeartbeatCheck::CoordinatorDead(coordinator, self.election.elect().await)
        }
    }

    /// Check every interval until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Heartbeat monitor stopped");
    }
}
