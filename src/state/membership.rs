//! Cluster Membership
//!
//! The fixed membership list and its reachable/unreachable partition.
//! Membership is configuration: it never grows or shrinks.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::network::LivenessProber;
use crate::state::NodeAddr;

/// Result of probing every member once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Reachable members, ascending (always includes the prober itself)
    pub reachable: Vec<NodeAddr>,
    /// Unreachable members, ascending
    pub unreachable: Vec<NodeAddr>,
    pub probed_at: DateTime<Utc>,
}

impl ProbeReport {
    /// Lowest reachable address, the election winner
    pub fn lowest_reachable(&self) -> Option<NodeAddr> {
        self.reachable.first().copied()
    }
}

/// Cluster membership table
pub struct Membership {
    self_address: NodeAddr,
    /// All members (including self), ascending
    members: Vec<NodeAddr>,
}

impl Membership {
    /// Create a membership table; `self_address` is added if missing
    pub fn new(self_address: NodeAddr, members: impl IntoIterator<Item = NodeAddr>) -> Self {
        let mut members: Vec<NodeAddr> = members.into_iter().collect();
        members.push(self_address);
        members.sort_unstable();
        members.dedup();

        Self {
            self_address,
            members,
        }
    }

    /// All members, ascending
    pub fn members(&self) -> &[NodeAddr] {
        &self.members
    }

    /// All members except self, ascending
    pub fn peers(&self) -> impl Iterator<Item = NodeAddr> + '_ {
        self.members
            .iter()
            .copied()
            .filter(move |addr| *addr != self.self_address)
    }

    /// Probe every peer concurrently and partition the members
    pub async fn probe_all(&self, prober: &LivenessProber) -> ProbeReport {
        let peers: Vec<NodeAddr> = self.peers().collect();
        let results = join_all(peers.iter().map(|addr| prober.probe(*addr))).await;

        let mut reachable = vec![self.self_address];
        let mut unreachable = Vec::new();
        for (addr, alive) in peers.into_iter().zip(results) {
            if alive {
                reachable.push(addr);
            } else {
                unreachable.push(addr);
            }
        }
        reachable.sort_unstable();

        ProbeReport {
            reachable,
            unreachable,
            probed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::network::memory::MemoryNetwork;
    use crate::network::session::RequestHandler;
    use crate::network::protocol::Message;

    struct Silent;

    #[async_trait::async_trait]
    impl RequestHandler for Silent {
        async fn handle_request(&self, message: Message) -> Message {
            message
        }

        async fn handle_notify(&self, _message: Message) {}
    }

    #[test]
    fn test_membership_is_fixed_and_sorted() {
        let membership = Membership::new(20, [30, 10, 20]);
        assert_eq!(membership.members(), &[10, 20, 30]);
        assert_eq!(membership.peers().collect::<Vec<_>>(), vec![10, 30]);

        // Self is added when missing
        assert_eq!(Membership::new(40, [10, 30]).members(), &[10, 30, 40]);
    }

    #[tokio::test]
    async fn test_probe_all_partitions_members() {
        let network = Arc::new(MemoryNetwork::new());
        network.register(30, Arc::new(Silent));

        let membership = Membership::new(20, [10, 20, 30]);
        let prober = LivenessProber::new(network, Duration::from_millis(100));

        let report = membership.probe_all(&prober).await;
        assert_eq!(report.reachable, vec![20, 30]);
        assert_eq!(report.unreachable, vec![10]);
        assert_eq!(report.lowest_reachable(), Some(20));
    }
}
