//! Network Module
//!
//! The transport seam used by every coordination component, its TCP and
//! in-memory implementations, and the framing used on the wire.

mod client;
mod server;
pub mod link;
pub mod memory;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod session;

pub use client::TcpTransport;
pub use link::PeerLink;
pub use probe::LivenessProber;
pub use protocol::{Envelope, FrameHeader, Message};
pub use registry::{PeerRegistry, RegistryEvent};
pub use server::NetworkServer;
pub use session::RequestHandler;

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::state::NodeAddr;

/// Capacity of per-link envelope queues
pub(crate) const LINK_QUEUE: usize = 256;

/// A way of reaching other nodes
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Attempt one connection; true if it completes within `timeout`
    ///
    /// The attempted connection is always released before returning.
    async fn probe(&self, address: NodeAddr, timeout: Duration) -> bool;

    /// Open a durable link to `address`
    async fn connect(&self, address: NodeAddr, timeout: Duration) -> Result<PeerLink>;
}

/// Read a framed envelope from a reader
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_BODY {
        return Err(Error::Network(format!("Frame of {} bytes exceeds limit", header.length)));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Network("Frame checksum mismatch".into()));
    }

    Ok(Envelope::deserialize(&body)?)
}

/// Write a framed envelope to a writer
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = envelope.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

/// Turn a TCP stream into a pair of envelope channels
///
/// Returns the sender feeding the socket and the receiver fed by it. The
/// write half is shut down once every sender is dropped; the receiver ends
/// when the remote closes or sends a bad frame.
pub(crate) fn bridge_stream(
    stream: TcpStream,
    peer: String,
) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(LINK_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Envelope>(LINK_QUEUE);

    let write_peer = peer.clone();
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;

        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &envelope).await {
                tracing::debug!("Write to {} failed: {}", write_peer, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(envelope) => {
                    if inbound_tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Connection closed
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error reading frame from {}: {}", peer, e);
                    break;
                }
            }
        }
    });

    (outbound_tx, inbound_rx)
}
