//! Inbound Session
//!
//! Serves one inbound channel: requests are answered on their own tasks so
//! a slow prepare never blocks other requests on the same channel, while
//! notifications are applied inline in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::protocol::{Envelope, Message};

/// Handles messages arriving on any inbound channel
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer an acknowledged request
    async fn handle_request(&self, message: Message) -> Message;

    /// Apply a fire-and-forget notification
    async fn handle_notify(&self, message: Message);
}

/// Serve envelopes from `inbound` until it ends or `shutdown` flips to true
///
/// In-flight request tasks are aborted when the session ends.
pub async fn serve(
    handler: Arc<dyn RequestHandler>,
    peer: String,
    mut inbound: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut requests = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            envelope = inbound.recv() => {
                let Some(envelope) = envelope else { break };
                match envelope {
                    Envelope::Request { id, message } => {
                        tracing::trace!("Request #{} {} from {}", id, message.type_name(), peer);
                        let handler = Arc::clone(&handler);
                        let outbound = outbound.clone();
                        requests.spawn(async move {
                            let reply = handler.handle_request(message).await;
                            let _ = outbound.send(Envelope::Reply { id, message: reply }).await;
                        });
                    }
                    Envelope::Notify(message) => {
                        tracing::trace!("Notify {} from {}", message.type_name(), peer);
                        handler.handle_notify(message).await;
                    }
                    Envelope::Reply { id, .. } => {
                        tracing::debug!("Ignoring stray reply #{} from {}", id, peer);
                    }
                }
            }
            Some(_) = requests.join_next(), if !requests.is_empty() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Session with {} ended", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Slow;

    #[async_trait]
    impl RequestHandler for Slow {
        async fn handle_request(&self, message: Message) -> Message {
            if message == Message::Prepare {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            message
        }

        async fn handle_notify(&self, _message: Message) {}
    }

    #[tokio::test]
    async fn test_slow_request_does_not_block_others() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve(Arc::new(Slow), "test".into(), in_rx, out_tx, shutdown_rx));

        in_tx.send(Envelope::Request { id: 1, message: Message::Prepare }).await.unwrap();
        in_tx.send(Envelope::Request { id: 2, message: Message::Status }).await.unwrap();

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first, Envelope::Reply { id: 2, message: Message::Status });
        let second = out_rx.recv().await.unwrap();
        assert_eq!(second, Envelope::Reply { id: 1, message: Message::Prepare });
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let (_in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = tokio::spawn(serve(Arc::new(Slow), "test".into(), in_rx, out_tx, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert!(out_rx.recv().await.is_none());
    }
}
