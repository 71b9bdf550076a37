//! Liveness Prober
//!
//! One bounded connection attempt per call. No retries; callers that want
//! more data points probe again later.

use std::sync::Arc;
use std::time::Duration;

use super::Transport;
use crate::state::NodeAddr;

/// Probes peers through a transport with a fixed timeout
#[derive(Clone)]
pub struct LivenessProber {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl LivenessProber {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// True if `address` accepted a connection within the timeout
    pub async fn probe(&self, address: NodeAddr) -> bool {
        // Guard against transports that ignore the bound
        let reachable = tokio::time::timeout(
            self.timeout,
            self.transport.probe(address, self.timeout),
        )
        .await
        .unwrap_or(false);

        tracing::trace!("Probe {} -> {}", address, if reachable { "reachable" } else { "unreachable" });
        reachable
    }
}
