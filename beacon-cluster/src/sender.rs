//! Outbound replication: forwards locally-owned changes to one peer

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use beacon_core::config::ReplicationConfig;
use beacon_core::models::{buffered, ChangeNotification, Interest, Origin, Source, SourceMatcher};
use beacon_core::registry::RegistryStore;

use crate::error::{ClusterError, Result};
use crate::protocol::{ChannelState, ReplicationMessage, StateHandle};
use crate::transport::ReplicationLink;

/// Keeps only locally-owned notifications while preserving batch atomicity.
///
/// Batches are collected between their sentinels, filtered, and re-fenced,
/// so a batch that loses entries to the filter still arrives correctly
/// paired (or bare, or not at all) on the peer side.
#[derive(Default)]
struct BatchFilter {
    in_batch: bool,
    pending: Vec<ChangeNotification>,
}

impl BatchFilter {
    fn keep(notification: &ChangeNotification) -> bool {
        notification
            .source()
            .is_some_and(|source| source.origin == Origin::Local)
    }

    fn push(&mut self, notification: ChangeNotification) -> Vec<ReplicationMessage> {
        if notification.is_buffer_start() {
            self.in_batch = true;
            self.pending.clear();
            return Vec::new();
        }
        if notification.is_buffer_end() {
            self.in_batch = false;
            let batch = std::mem::take(&mut self.pending);
            return buffered(batch)
                .into_iter()
                .map(ReplicationMessage::from_notification)
                .collect();
        }
        if !Self::keep(&notification) {
            return Vec::new();
        }
        if self.in_batch {
            self.pending.push(notification);
            Vec::new()
        } else {
            vec![ReplicationMessage::from_notification(notification)]
        }
    }
}

/// Client side of a replication session.
///
/// Walks `Idle -> HandshakeSent -> Active -> Closed`. After the handshake it
/// streams every local-origin change, framed by heartbeats; the peer decides
/// during the handshake whether it wants a full snapshot first.
pub struct ReplicationSender {
    store: Arc<RegistryStore>,
    node_name: String,
    config: ReplicationConfig,
    state: StateHandle,
}

impl ReplicationSender {
    #[must_use]
    pub fn new(store: Arc<RegistryStore>, node_name: impl Into<String>, config: ReplicationConfig) -> Self {
        Self {
            store,
            node_name: node_name.into(),
            config,
            state: StateHandle::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Drive the session until the link fails or the token is cancelled
    pub async fn run(self, mut link: ReplicationLink, token: CancellationToken) -> Result<()> {
        let outcome = self.session(&mut link, &token).await;
        self.state.set(ChannelState::Closed);
        outcome
    }

    async fn session(&self, link: &mut ReplicationLink, token: &CancellationToken) -> Result<()> {
        let source = Source::local(self.node_name.clone());
        let owned = self.store.size_for(&SourceMatcher::Origin(Origin::Local));
        link.send(ReplicationMessage::Hello {
            source,
            registry_size: owned,
        })
        .await?;
        self.state.set(ChannelState::HandshakeSent);

        let handshake_timeout = Duration::from_millis(self.config.handshake_timeout_ms.max(1));
        let reply = timeout(handshake_timeout, link.recv())
            .await
            .map_err(|_| ClusterError::Handshake("no reply before timeout".to_string()))?
            .ok_or(ClusterError::LinkClosed)?;
        let send_snapshot = match reply {
            ReplicationMessage::HelloReply { send_snapshot, .. } => send_snapshot,
            other => {
                return Err(ClusterError::Handshake(format!(
                    "expected hello_reply, got {}",
                    other.kind()
                )));
            }
        };

        // subscribing under the router gate means no change can fall between
        // the snapshot and the live stream
        let mut subscription = if send_snapshot {
            info!(node = %self.node_name, "peer requested full snapshot");
            self.store.for_interest(Interest::for_full_registry())
        } else {
            self.store.for_interest_live(Interest::for_full_registry())
        };
        self.state.set(ChannelState::Active);

        let mut filter = BatchFilter::default();
        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                notification = subscription.next() => {
                    let Some(notification) = notification else { break };
                    for message in filter.push(notification) {
                        debug!(kind = message.kind(), "replicating");
                        link.send(message).await?;
                    }
                }
                _ = heartbeat.tick() => {
                    link.send(ReplicationMessage::Heartbeat).await?;
                }
                () = token.cancelled() => break,
            }
        }
        Ok(())
    }
}
