//! Sequential acknowledged operation queue shared by the channel façades

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// One queued operation together with its acknowledgment slot
pub(crate) struct Op<T> {
    pub op: T,
    ack: oneshot::Sender<Result<()>>,
}

impl<T> Op<T> {
    /// Report the outcome to the submitting caller. Dropping the op instead
    /// fails the caller with [`Error::ChannelClosed`].
    pub fn complete(self, result: Result<()>) {
        let _ = self.ack.send(result);
    }
}

/// Submission side of a per-connection FIFO.
///
/// Operations are processed strictly in submission order by a single worker
/// task, so the registry observes one connection's intent sequentially even
/// when the callers race.
pub(crate) struct OpQueue<T> {
    tx: mpsc::Sender<Op<T>>,
}

impl<T: Send + 'static> OpQueue<T> {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Op<T>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an operation and wait for its acknowledgment
    pub async fn submit(&self, op: T) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(Op { op, ack })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        ack_rx.await.map_err(|_| Error::ChannelClosed)?
    }
}
