//! Per-connection registration façade

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::queue::OpQueue;
use crate::error::{Error, Result};
use crate::models::{InstanceId, InstanceInfo, Source};
use crate::registry::{InstanceUpdate, RegistryStore};

const QUEUE_CAPACITY: usize = 64;

enum RegistrationOp {
    Register(InstanceInfo),
    Update(InstanceUpdate),
    Heartbeat,
    Unregister,
    Close,
}

/// Serializes one connection's register/update/heartbeat/unregister calls
/// into the store in strict submission order.
///
/// The channel tracks the connection's live registration; losing the channel
/// in any way, explicit close or plain drop, unregisters it.
pub struct RegistrationChannel {
    queue: OpQueue<RegistrationOp>,
    closed: AtomicBool,
}

impl RegistrationChannel {
    #[must_use]
    pub fn new(store: Arc<RegistryStore>, source: Source) -> Self {
        let (queue, mut rx) = OpQueue::new(QUEUE_CAPACITY);

        tokio::spawn(async move {
            let mut current: Option<InstanceId> = None;
            while let Some(op) = rx.recv().await {
                match op.op {
                    RegistrationOp::Register(ref instance) => {
                        let id = instance.id.clone();
                        if let Some(previous) = current.as_ref().filter(|prev| **prev != id) {
                            // a connection owns one registration at a time
                            let _ = store.unregister(previous, &source);
                        }
                        let result = store.register(instance.clone(), source.clone());
                        if result.is_ok() {
                            current = Some(id);
                        }
                        op.complete(result);
                    }
                    RegistrationOp::Update(ref update) => {
                        if let InstanceUpdate::Full(instance) = update {
                            // a full payload doubles as an implicit register
                            current.get_or_insert_with(|| instance.id.clone());
                        }
                        let result = store.update(update.clone(), source.clone());
                        op.complete(result);
                    }
                    RegistrationOp::Heartbeat => {
                        let result = match current.as_ref() {
                            Some(id) => store.renew(id),
                            None => {
                                warn!(%source, "heartbeat before registration ignored");
                                Ok(())
                            }
                        };
                        op.complete(result);
                    }
                    RegistrationOp::Unregister => {
                        let result = match current.take() {
                            Some(id) => store.unregister(&id, &source),
                            None => Ok(()),
                        };
                        op.complete(result);
                    }
                    RegistrationOp::Close => {
                        if let Some(id) = current.take() {
                            let _ = store.unregister(&id, &source);
                        }
                        op.complete(Ok(()));
                        break;
                    }
                }
            }
            // connection dropped without a close: the lease ends with it
            if let Some(id) = current.take() {
                debug!(instance = %id, %source, "channel dropped, unregistering");
                let _ = store.unregister(&id, &source);
            }
        });

        Self {
            queue,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn register(&self, instance: InstanceInfo) -> Result<()> {
        self.queue.submit(RegistrationOp::Register(instance)).await
    }

    pub async fn update(&self, update: InstanceUpdate) -> Result<()> {
        self.queue.submit(RegistrationOp::Update(update)).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.queue.submit(RegistrationOp::Heartbeat).await
    }

    pub async fn unregister(&self) -> Result<()> {
        self.queue.submit(RegistrationOp::Unregister).await
    }

    /// Close the channel, unregistering any live registration. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.queue.submit(RegistrationOp::Close).await {
            Ok(()) | Err(Error::ChannelClosed) => Ok(()),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::models::{Delta, InstanceStatus};

    fn info(id: &str) -> InstanceInfo {
        InstanceInfo::builder(id)
            .app("billing")
            .status(InstanceStatus::Up)
            .build()
    }

    #[tokio::test]
    async fn test_register_heartbeat_unregister() {
        let store = RegistryStore::new(RegistryConfig::default());
        let channel = RegistrationChannel::new(Arc::clone(&store), Source::local("conn-1"));

        channel.register(info("i-1")).await.unwrap();
        assert!(store.get(&"i-1".into()).is_some());

        channel.heartbeat().await.unwrap();

        channel.unregister().await.unwrap();
        assert!(store.get(&"i-1".into()).is_none());
    }

    #[tokio::test]
    async fn test_delta_update_through_channel() {
        let store = RegistryStore::new(RegistryConfig::default());
        let channel = RegistrationChannel::new(Arc::clone(&store), Source::local("conn-1"));

        channel.register(info("i-1")).await.unwrap();
        channel
            .update(InstanceUpdate::Deltas {
                id: "i-1".into(),
                deltas: vec![Delta::Status {
                    value: InstanceStatus::Down,
                }],
            })
            .await
            .unwrap();

        assert_eq!(
            store.get(&"i-1".into()).unwrap().status,
            InstanceStatus::Down
        );
    }

    #[tokio::test]
    async fn test_close_unregisters_and_is_idempotent() {
        let store = RegistryStore::new(RegistryConfig::default());
        let channel = RegistrationChannel::new(Arc::clone(&store), Source::local("conn-1"));

        channel.register(info("i-1")).await.unwrap();
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(store.get(&"i-1".into()).is_none());

        assert!(matches!(
            channel.register(info("i-2")).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let store = RegistryStore::new(RegistryConfig::default());
        let channel = RegistrationChannel::new(Arc::clone(&store), Source::local("conn-1"));

        channel.register(info("i-1")).await.unwrap();
        drop(channel);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.get(&"i-1".into()).is_none());
    }

    #[tokio::test]
    async fn test_reregistering_new_id_replaces_old() {
        let store = RegistryStore::new(RegistryConfig::default());
        let channel = RegistrationChannel::new(Arc::clone(&store), Source::local("conn-1"));

        channel.register(info("i-1")).await.unwrap();
        channel.register(info("i-2")).await.unwrap();

        assert!(store.get(&"i-1".into()).is_none());
        assert!(store.get(&"i-2".into()).is_some());
    }
}
