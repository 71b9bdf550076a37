//! In-Memory Network
//!
//! A message bus that stands in for TCP so whole clusters can run inside
//! one process. Registering an address makes it reachable; unregistering
//! ends every session it serves, which remote ends observe as a dropped
//! link, exactly like a crashed node.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::session::{serve, RequestHandler};
use super::{PeerLink, Transport, LINK_QUEUE};
use crate::error::{Error, Result};
use crate::state::NodeAddr;

struct Endpoint {
    handler: Arc<dyn RequestHandler>,
    shutdown: watch::Sender<bool>,
}

/// Shared in-process bus
#[derive(Default)]
pub struct MemoryNetwork {
    endpoints: RwLock<HashMap<NodeAddr, Endpoint>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `address` reachable, answered by `handler`
    ///
    /// Re-registering an address first tears down the previous endpoint.
    pub fn register(&self, address: NodeAddr, handler: Arc<dyn RequestHandler>) {
        let (shutdown, _) = watch::channel(false);
        let previous = self
            .endpoints
            .write()
            .ok()
            .and_then(|mut endpoints| endpoints.insert(address, Endpoint { handler, shutdown }));

        if let Some(previous) = previous {
            previous.shutdown.send_replace(true);
        }
        tracing::debug!("Memory endpoint {} registered", address);
    }

    /// Make `address` unreachable and drop every session it serves
    pub fn unregister(&self, address: NodeAddr) -> bool {
        let removed = self
            .endpoints
            .write()
            .ok()
            .and_then(|mut endpoints| endpoints.remove(&address));

        match removed {
            Some(endpoint) => {
                endpoint.shutdown.send_replace(true);
                tracing::debug!("Memory endpoint {} unregistered", address);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, address: NodeAddr) -> bool {
        self.endpoints
            .read()
            .map(|endpoints| endpoints.contains_key(&address))
            .unwrap_or(false)
    }

    fn lookup(&self, address: NodeAddr) -> Option<(Arc<dyn RequestHandler>, watch::Receiver<bool>)> {
        let endpoints = self.endpoints.read().ok()?;
        endpoints
            .get(&address)
            .map(|endpoint| (Arc::clone(&endpoint.handler), endpoint.shutdown.subscribe()))
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn probe(&self, address: NodeAddr, _timeout: Duration) -> bool {
        self.is_registered(address)
    }

    async fn connect(&self, address: NodeAddr, _timeout: Duration) -> Result<PeerLink> {
        let (handler, shutdown) = self.lookup(address).ok_or_else(|| Error::ConnectionFailed {
            address: format!("memory:{}", address),
            reason: "no endpoint registered".into(),
        })?;

        let (to_server_tx, to_server_rx) = mpsc::channel(LINK_QUEUE);
        let (to_client_tx, to_client_rx) = mpsc::channel(LINK_QUEUE);
        tokio::spawn(serve(
            handler,
            format!("memory:{}", address),
            to_server_rx,
            to_client_tx,
            shutdown,
        ));

        Ok(PeerLink::new(address, to_server_tx, to_client_rx))
    }
}
