//! In-process replication links and the peer connector seam

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ClusterError, Result};
use crate::protocol::ReplicationMessage;

const LINK_CAPACITY: usize = 1_024;

/// One end of a bidirectional replication session.
///
/// A link carries [`ReplicationMessage`]s with backpressure and in-order
/// delivery; the transport that frames them onto a network is out of scope
/// and plugs in behind [`PeerConnector`].
pub struct ReplicationLink {
    tx: mpsc::Sender<ReplicationMessage>,
    rx: mpsc::Receiver<ReplicationMessage>,
}

impl ReplicationLink {
    #[must_use]
    pub fn new(
        tx: mpsc::Sender<ReplicationMessage>,
        rx: mpsc::Receiver<ReplicationMessage>,
    ) -> Self {
        Self { tx, rx }
    }

    pub async fn send(&self, message: ReplicationMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ClusterError::LinkClosed)
    }

    /// Next message from the peer; `None` once the peer hung up
    pub async fn recv(&mut self) -> Option<ReplicationMessage> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for ReplicationLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationLink").finish_non_exhaustive()
    }
}

/// Two connected link ends, one per peer
#[must_use]
pub fn link_pair() -> (ReplicationLink, ReplicationLink) {
    let (a_tx, a_rx) = mpsc::channel(LINK_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(LINK_CAPACITY);
    (
        ReplicationLink::new(a_tx, b_rx),
        ReplicationLink::new(b_tx, a_rx),
    )
}

/// Establishes replication sessions to named peers
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, peer: &str) -> Result<ReplicationLink>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_pair_round_trip() {
        let (a, mut b) = link_pair();
        a.send(ReplicationMessage::Heartbeat).await.unwrap();
        assert_eq!(b.recv().await, Some(ReplicationMessage::Heartbeat));

        drop(a);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_peer_gone_fails() {
        let (a, b) = link_pair();
        drop(b);
        assert!(matches!(
            a.send(ReplicationMessage::Heartbeat).await,
            Err(ClusterError::LinkClosed)
        ));
    }
}
