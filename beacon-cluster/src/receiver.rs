//! Inbound replication: applies one peer's stream to the local registry

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use beacon_core::config::ReplicationConfig;
use beacon_core::models::{Origin, Source, SourceMatcher};
use beacon_core::registry::RegistryStore;

use crate::error::{ClusterError, Result};
use crate::protocol::{ChannelState, ReplicationMessage, StateHandle};
use crate::transport::ReplicationLink;

/// Server side of a replication session.
///
/// Every contribution the peer streams is stored under one session-scoped
/// replicated source, so when the session ends, for any reason, everything
/// it contributed can be evicted as a single batch. A reconnect arrives with
/// a fresh generation; data left over from the previous session is fenced
/// out during the handshake.
pub struct ReplicationReceiver {
    store: Arc<RegistryStore>,
    node_name: String,
    config: ReplicationConfig,
    state: StateHandle,
    replica: Option<Source>,
}

impl ReplicationReceiver {
    #[must_use]
    pub fn new(
        store: Arc<RegistryStore>,
        node_name: impl Into<String>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            store,
            node_name: node_name.into(),
            config,
            state: StateHandle::new(),
            replica: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Drive the session until the peer disconnects, misses its heartbeats,
    /// or the token is cancelled. Whatever the exit path, the peer's
    /// contributions are evicted before this returns.
    pub async fn run(mut self, mut link: ReplicationLink, token: CancellationToken) -> Result<()> {
        let outcome = self.session(&mut link, &token).await;
        if let Some(replica) = self.replica.take() {
            let removed = self.store.evict_all(&SourceMatcher::Exact(replica.clone()));
            info!(peer = %replica, removed, "replication session ended, evicted peer contributions");
        }
        self.state.set(ChannelState::Closed);
        outcome
    }

    async fn session(&mut self, link: &mut ReplicationLink, token: &CancellationToken) -> Result<()> {
        let handshake_timeout = Duration::from_millis(self.config.handshake_timeout_ms.max(1));
        let hello = timeout(handshake_timeout, link.recv())
            .await
            .map_err(|_| ClusterError::Handshake("no hello before timeout".to_string()))?
            .ok_or(ClusterError::LinkClosed)?;
        let (peer_source, peer_size) = match hello {
            ReplicationMessage::Hello {
                source,
                registry_size,
            } => (source, registry_size),
            other => {
                return Err(ClusterError::Handshake(format!(
                    "expected hello, got {}",
                    other.kind()
                )));
            }
        };

        let replica = Source::with_generation(
            Origin::Replicated,
            peer_source.name.clone(),
            peer_source.generation,
        );

        // a reconnecting peer carries a newer generation; drop anything the
        // previous session left behind before accepting its stream
        let fenced = self.store.evict_all(&SourceMatcher::OlderGeneration {
            origin: Origin::Replicated,
            name: replica.name.clone(),
            before: replica.generation,
        });
        if fenced > 0 {
            info!(peer = %replica, fenced, "evicted stale generation on reconnect");
        }

        // any size disagreement asks for a full snapshot rather than risking
        // silent divergence from a missed delta
        let known = self.store.size_for(&SourceMatcher::Stream {
            origin: Origin::Replicated,
            name: replica.name.clone(),
        });
        let send_snapshot = peer_size != known;
        link.send(ReplicationMessage::HelloReply {
            source: Source::local(self.node_name.clone()),
            send_snapshot,
        })
        .await?;
        info!(peer = %replica, peer_size, known, send_snapshot, "replication session accepted");

        self.replica = Some(replica.clone());
        self.state.set(ChannelState::Active);

        let liveness = Duration::from_millis(
            self.config.heartbeat_interval_ms.max(1)
                * u64::from(self.config.heartbeat_miss_threshold.max(1)),
        );
        loop {
            tokio::select! {
                received = timeout(liveness, link.recv()) => match received {
                    Err(_) => return Err(ClusterError::HeartbeatTimeout),
                    Ok(None) => return Ok(()),
                    Ok(Some(message)) => self.apply(message, &replica),
                },
                () = token.cancelled() => return Ok(()),
            }
        }
    }

    fn apply(&self, message: ReplicationMessage, replica: &Source) {
        match message {
            ReplicationMessage::Add { instance, .. }
            | ReplicationMessage::Modify { instance, .. } => {
                if let Err(error) = self.store.register(instance, replica.clone()) {
                    warn!(peer = %replica, %error, "replicated write dropped");
                }
            }
            ReplicationMessage::Delete { instance, .. } => {
                if let Err(error) = self.store.unregister(&instance.id, replica) {
                    warn!(peer = %replica, %error, "replicated delete dropped");
                }
            }
            ReplicationMessage::Heartbeat => debug!(peer = %replica, "heartbeat"),
            // batch markers need no action here: each entry is applied as it
            // arrives and local subscribers get their own batching
            ReplicationMessage::BufferStart | ReplicationMessage::BufferEnd => {}
            other => {
                warn!(peer = %replica, kind = other.kind(), "unexpected message ignored");
            }
        }
    }
}
