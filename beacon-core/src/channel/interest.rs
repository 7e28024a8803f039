//! Per-connection interest façade

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::queue::OpQueue;
use crate::error::{Error, Result};
use crate::interest::InterestSubscription;
use crate::models::{ChangeNotification, Interest};
use crate::registry::RegistryStore;

const QUEUE_CAPACITY: usize = 16;
const OUTPUT_CAPACITY: usize = 256;

enum InterestOp {
    Change(Interest),
    Close,
}

async fn next_notification(
    subscription: &mut Option<InterestSubscription>,
) -> ChangeNotification {
    match subscription {
        Some(sub) => match sub.next().await {
            Some(notification) => notification,
            // the channel owns this subscription; it only ends with us
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

/// Serializes one connection's interest changes and forwards the matching
/// notification stream.
///
/// Each accepted change replaces the previous subscription atomically with a
/// fresh snapshot, so the consumer always catches up on entries its new
/// interest matches.
pub struct InterestChannel {
    queue: OpQueue<InterestOp>,
    notifications: mpsc::Receiver<ChangeNotification>,
    closed: AtomicBool,
}

impl InterestChannel {
    #[must_use]
    pub fn new(store: Arc<RegistryStore>) -> Self {
        let (queue, mut rx) = OpQueue::new(QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CAPACITY);

        tokio::spawn(async move {
            let mut subscription: Option<InterestSubscription> = None;
            loop {
                tokio::select! {
                    op = rx.recv() => {
                        let Some(op) = op else { break };
                        match op.op {
                            InterestOp::Change(ref interest) => {
                                debug!(?interest, "interest changed");
                                subscription = Some(store.for_interest(interest.clone()));
                                op.complete(Ok(()));
                            }
                            InterestOp::Close => {
                                op.complete(Ok(()));
                                break;
                            }
                        }
                    }
                    notification = next_notification(&mut subscription) => {
                        if out_tx.send(notification).await.is_err() {
                            break;
                        }
                    }
                }
            }
            // dropping the subscription releases its index registration
        });

        Self {
            queue,
            notifications: out_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Replace this connection's interest
    pub async fn change_interest(&self, interest: Interest) -> Result<()> {
        self.queue.submit(InterestOp::Change(interest)).await
    }

    /// Next notification matching the current interest; `None` after close
    pub async fn next(&mut self) -> Option<ChangeNotification> {
        self.notifications.recv().await
    }

    /// Close the channel and stop notification delivery. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.queue.submit(InterestOp::Close).await {
            Ok(()) | Err(Error::ChannelClosed) => Ok(()),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::models::{InstanceInfo, InstanceStatus, Source};
    use tokio::time::{timeout, Duration};

    fn info(id: &str, app: &str) -> InstanceInfo {
        InstanceInfo::builder(id)
            .app(app)
            .status(InstanceStatus::Up)
            .build()
    }

    #[tokio::test]
    async fn test_change_interest_snapshots_then_streams() {
        let store = RegistryStore::new(RegistryConfig::default());
        let source = Source::local("node-a");
        store.register(info("i-1", "billing"), source.clone()).unwrap();

        let mut channel = InterestChannel::new(Arc::clone(&store));
        channel
            .change_interest(Interest::for_application("billing"))
            .await
            .unwrap();

        let snapshot = channel.next().await.unwrap();
        assert_eq!(snapshot.instance().unwrap().id.as_str(), "i-1");

        store.register(info("i-2", "billing"), source).unwrap();
        let live = channel.next().await.unwrap();
        assert_eq!(live.instance().unwrap().id.as_str(), "i-2");
    }

    #[tokio::test]
    async fn test_new_interest_replaces_old() {
        let store = RegistryStore::new(RegistryConfig::default());
        let source = Source::local("node-a");

        let mut channel = InterestChannel::new(Arc::clone(&store));
        channel
            .change_interest(Interest::for_application("billing"))
            .await
            .unwrap();
        channel
            .change_interest(Interest::for_application("payments"))
            .await
            .unwrap();

        store.register(info("i-1", "billing"), source.clone()).unwrap();
        store.register(info("i-2", "payments"), source).unwrap();

        let got = channel.next().await.unwrap();
        assert_eq!(got.instance().unwrap().id.as_str(), "i-2");
        assert!(timeout(Duration::from_millis(50), channel.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let store = RegistryStore::new(RegistryConfig::default());
        let mut channel = InterestChannel::new(Arc::clone(&store));
        channel
            .change_interest(Interest::for_full_registry())
            .await
            .unwrap();

        channel.close().await.unwrap();
        channel.close().await.unwrap();

        store
            .register(info("i-1", "billing"), Source::local("node-a"))
            .unwrap();
        assert!(channel.next().await.is_none());
        assert!(matches!(
            channel.change_interest(Interest::for_full_registry()).await,
            Err(Error::ChannelClosed)
        ));
    }
}
