//! Network Client
//!
//! TCP transport for probing and linking to other nodes.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{bridge_stream, PeerLink, Transport};
use crate::error::{Error, Result};
use crate::state::NodeAddr;

/// Reaches cluster members at `host:port` over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
}

impl TcpTransport {
    /// Create a transport for members listening on `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Socket address string for a member
    pub fn socket_address(&self, address: NodeAddr) -> String {
        format!("{}:{}", self.host, address)
    }

    /// Connect to an address
    async fn connect_stream(&self, address: NodeAddr, limit: Duration) -> Result<TcpStream> {
        let target = self.socket_address(address);
        let result = timeout(limit, TcpStream::connect(&target)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: target,
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(target)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn probe(&self, address: NodeAddr, limit: Duration) -> bool {
        match self.connect_stream(address, limit).await {
            // Dropping the stream releases the probe connection
            Ok(_stream) => true,
            Err(e) => {
                tracing::trace!("Probe of {} failed: {}", address, e);
                false
            }
        }
    }

    async fn connect(&self, address: NodeAddr, limit: Duration) -> Result<PeerLink> {
        let stream = self.connect_stream(address, limit).await?;
        let (outbound, inbound) = bridge_stream(stream, self.socket_address(address));
        Ok(PeerLink::new(address, outbound, inbound))
    }
}
