//! Peer Link
//!
//! One durable logical channel to a remote node. Outbound envelopes go into
//! an mpsc sender that the transport drains; replies come back on an mpsc
//! receiver and are matched to pending requests by id. The link is closed
//! when the inbound side ends or when `close` is called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::protocol::{Envelope, Message};
use crate::error::{Error, Result};
use crate::state::NodeAddr;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Message>>>>;

/// Durable request/notify channel to one remote address
pub struct PeerLink {
    address: NodeAddr,
    /// Dropped on close so the remote session sees end-of-stream
    outbound: Mutex<Option<mpsc::Sender<Envelope>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed_tx: Arc<watch::Sender<bool>>,
    closed: watch::Receiver<bool>,
    pump: JoinHandle<()>,
}

impl PeerLink {
    /// Build a link over a pair of envelope channels
    pub fn new(
        address: NodeAddr,
        outbound: mpsc::Sender<Envelope>,
        inbound: mpsc::Receiver<Envelope>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let pump = tokio::spawn(pump_replies(
            address,
            inbound,
            Arc::clone(&pending),
            Arc::clone(&closed_tx),
        ));

        Self {
            address,
            outbound: Mutex::new(Some(outbound)),
            pending,
            next_id: AtomicU64::new(1),
            closed_tx,
            closed: closed_rx,
            pump,
        }
    }

    /// Remote address
    pub fn address(&self) -> NodeAddr {
        self.address
    }

    /// Send a request and wait for its reply
    ///
    /// There is no reply timeout: a connected peer that never answers keeps
    /// the caller suspended. Callers that need a bound wrap this call.
    pub async fn request(&self, message: Message) -> Result<Message> {
        let sender = self.sender()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        // The pump may have drained the map between the check and the insert
        if self.is_closed() {
            self.forget(id);
            return Err(Error::LinkClosed(self.address));
        }

        tracing::trace!("-> {} request #{} {}", self.address, id, message.type_name());
        if sender.send(Envelope::Request { id, message }).await.is_err() {
            self.forget(id);
            return Err(Error::LinkClosed(self.address));
        }

        rx.await.map_err(|_| Error::LinkClosed(self.address))
    }

    /// Send a notification without waiting for any acknowledgement
    ///
    /// Never waits for queue space: when the outbound queue is full the
    /// notification is dropped and logged.
    pub async fn notify(&self, message: Message) -> Result<()> {
        let sender = self.sender()?;
        let kind = message.type_name();
        tracing::trace!("-> {} notify {}", self.address, kind);
        match sender.try_send(Envelope::Notify(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue to {} is full, dropped {} notification", self.address, kind);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::LinkClosed(self.address)),
        }
    }

    /// Close the link and fail every pending request
    pub fn close(&self) {
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        self.closed_tx.send_replace(true);
        self.pump.abort();
        fail_pending(&self.pending);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the link is closed
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        loop {
            if *closed.borrow_and_update() {
                return;
            }
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Envelope>> {
        if self.is_closed() {
            return Err(Error::LinkClosed(self.address));
        }
        self.outbound
            .lock()
            .ok()
            .and_then(|outbound| outbound.clone())
            .ok_or(Error::LinkClosed(self.address))
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Route replies to their waiting requests until the inbound side ends
async fn pump_replies(
    address: NodeAddr,
    mut inbound: mpsc::Receiver<Envelope>,
    pending: PendingMap,
    closed: Arc<watch::Sender<bool>>,
) {
    while let Some(envelope) = inbound.recv().await {
        match envelope {
            Envelope::Reply { id, message } => {
                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => tracing::debug!("Dropping reply #{} from {} with no waiter", id, address),
                }
            }
            other => {
                tracing::debug!("Ignoring unsolicited {:?} from {}", other, address);
            }
        }
    }

    tracing::debug!("Link to {} closed by remote", address);
    closed.send_replace(true);
    fail_pending(&pending);
}

fn fail_pending(pending: &PendingMap) {
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// A remote that echoes every request back as its reply
    fn echo_link() -> PeerLink {
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(16);
        let (in_tx, in_rx) = mpsc::channel::<Envelope>(16);

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Envelope::Request { id, message } = envelope {
                    if in_tx.send(Envelope::Reply { id, message }).await.is_err() {
                        break;
                    }
                }
            }
        });

        PeerLink::new(3002, out_tx, in_rx)
    }

    #[tokio::test]
    async fn test_request_reply() {
        let link = echo_link();
        let reply = link.request(Message::Status).await.unwrap();
        assert_eq!(reply, Message::Status);
        assert!(link.notify(Message::Abort).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_requests() {
        let link = echo_link();
        link.close();
        assert!(link.is_closed());
        assert!(matches!(link.request(Message::Status).await, Err(Error::LinkClosed(3002))));
        assert!(matches!(link.notify(Message::Abort).await, Err(Error::LinkClosed(3002))));
        tokio::time::timeout(Duration::from_secs(1), link.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_drop_closes_link() {
        let (out_tx, _out_rx) = mpsc::channel::<Envelope>(16);
        let (in_tx, in_rx) = mpsc::channel::<Envelope>(16);
        let link = Arc::new(PeerLink::new(3003, out_tx, in_rx));

        let waiter = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.request(Message::Prepare).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(in_tx);

        tokio::time::timeout(Duration::from_secs(1), link.closed()).await.unwrap();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::LinkClosed(3003))));
    }

    #[tokio::test]
    async fn test_notify_drops_when_queue_full() {
        // The remote never drains its queue
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(1);
        let (_in_tx, in_rx) = mpsc::channel::<Envelope>(1);
        let link = PeerLink::new(3004, out_tx, in_rx);

        link.notify(Message::Commit { value: 1 }).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(100), link.notify(Message::Abort)).await;
        assert!(matches!(second, Ok(Ok(()))));

        assert_eq!(out_rx.try_recv().unwrap(), Envelope::Notify(Message::Commit { value: 1 }));
        assert!(out_rx.try_recv().is_err());
    }
}
