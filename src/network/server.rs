//! Network Server
//!
//! TCP server accepting links from other nodes and from dashboard clients.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::bridge_stream;
use super::session::{serve, RequestHandler};
use crate::error::Result;

/// Network server for cluster communication
pub struct NetworkServer {
    listener: TcpListener,
    /// Message handler
    handler: Arc<dyn RequestHandler>,
    /// Shutdown signal, shared with every session
    shutdown: watch::Receiver<bool>,
}

impl NetworkServer {
    /// Bind the listening socket
    pub async fn bind(
        bind_address: &str,
        handler: Arc<dyn RequestHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        tracing::info!("Network server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handler,
            shutdown,
        })
    }

    /// Port actually bound
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept connections until shutdown
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown.clone();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            if let Err(e) = socket.set_nodelay(true) {
                                tracing::debug!("set_nodelay failed for {}: {}", peer_addr, e);
                            }
                            let (outbound, inbound) = bridge_stream(socket, peer_addr.clone());
                            tokio::spawn(serve(
                                Arc::clone(&self.handler),
                                peer_addr,
                                inbound,
                                outbound,
                                self.shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }
}
