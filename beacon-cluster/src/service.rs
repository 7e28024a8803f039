//! Peer session management: outbound connect loops and inbound accepts

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use nanoid::nanoid;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use beacon_core::config::ReplicationConfig;
use beacon_core::registry::RegistryStore;

use crate::receiver::ReplicationReceiver;
use crate::sender::ReplicationSender;
use crate::transport::{PeerConnector, ReplicationLink};

/// Owns replication for one node: a reconnecting sender per configured peer
/// and a receiver per accepted inbound link.
pub struct ReplicationService {
    store: Arc<RegistryStore>,
    node_name: String,
    config: ReplicationConfig,
    connector: Arc<dyn PeerConnector>,
    token: CancellationToken,
}

impl ReplicationService {
    #[must_use]
    pub fn new(
        store: Arc<RegistryStore>,
        node_name: impl Into<String>,
        config: ReplicationConfig,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            store,
            node_name: node_name.into(),
            config,
            connector,
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn one connect loop per configured peer
    #[must_use]
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.config
            .peers
            .iter()
            .map(|peer| self.spawn_peer_loop(peer.clone()))
            .collect()
    }

    fn spawn_peer_loop(&self, peer: String) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let node_name = self.node_name.clone();
        let config = self.config.clone();
        let connector = Arc::clone(&self.connector);
        let token = self.token.clone();
        let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms.max(1));

        tokio::spawn(async move {
            while !token.is_cancelled() {
                match connector.connect(&peer).await {
                    Ok(link) => {
                        let session = nanoid!(10);
                        info!(%peer, %session, "replication session opened");
                        let sender =
                            ReplicationSender::new(Arc::clone(&store), node_name.clone(), config.clone());
                        match sender.run(link, token.clone()).await {
                            Ok(()) => info!(%peer, %session, "replication session ended"),
                            Err(error) => {
                                warn!(%peer, %session, %error, "replication session failed");
                            }
                        }
                    }
                    Err(error) => warn!(%peer, %error, "peer connect failed"),
                }
                tokio::select! {
                    () = tokio::time::sleep(reconnect_delay) => {}
                    () = token.cancelled() => break,
                }
            }
        })
    }

    /// Run a receiver for one accepted inbound link
    pub fn accept(&self, link: ReplicationLink) -> JoinHandle<()> {
        let receiver = ReplicationReceiver::new(
            Arc::clone(&self.store),
            self.node_name.clone(),
            self.config.clone(),
        );
        let token = self.token.clone();
        tokio::spawn(async move {
            if let Err(error) = receiver.run(link, token).await {
                warn!(%error, "inbound replication session failed");
            }
        })
    }

    /// Cancel every session and wait for the handles to finish
    pub async fn shutdown(self, handles: Vec<JoinHandle<()>>) {
        self.token.cancel();
        join_all(handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClusterError, Result};
    use crate::transport::link_pair;
    use async_trait::async_trait;
    use beacon_core::config::RegistryConfig;
    use beacon_core::models::{InstanceInfo, InstanceStatus, Source};
    use parking_lot::Mutex;

    /// Hands out pre-wired link ends, one per connect call
    struct StaticConnector {
        links: Mutex<Vec<ReplicationLink>>,
    }

    #[async_trait]
    impl PeerConnector for StaticConnector {
        async fn connect(&self, _peer: &str) -> Result<ReplicationLink> {
            self.links
                .lock()
                .pop()
                .ok_or_else(|| ClusterError::Handshake("no link available".to_string()))
        }
    }

    #[tokio::test]
    async fn test_two_nodes_converge() {
        let store_a = RegistryStore::new(RegistryConfig::default());
        let store_b = RegistryStore::new(RegistryConfig::default());

        store_a
            .register(
                InstanceInfo::builder("i-1")
                    .app("billing")
                    .status(InstanceStatus::Up)
                    .build(),
                Source::local("conn-1"),
            )
            .unwrap();

        let (outbound, inbound) = link_pair();
        let config = ReplicationConfig {
            peers: vec!["node-b".to_string()],
            reconnect_delay_ms: 10_000,
            ..ReplicationConfig::default()
        };

        let service_a = ReplicationService::new(
            Arc::clone(&store_a),
            "node-a",
            config.clone(),
            Arc::new(StaticConnector {
                links: Mutex::new(vec![outbound]),
            }),
        );
        let service_b = ReplicationService::new(
            Arc::clone(&store_b),
            "node-b",
            config,
            Arc::new(StaticConnector {
                links: Mutex::new(Vec::new()),
            }),
        );

        let mut handles = service_a.start();
        handles.push(service_b.accept(inbound));

        // wait for the registration to arrive on node B
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while store_b.size() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "no convergence");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(
            store_b.get(&"i-1".into()).unwrap().status,
            InstanceStatus::Up
        );

        service_a.token().cancel();
        service_b.shutdown(handles).await;
        // sender hung up, so node B evicted node A's contributions
        assert_eq!(store_b.size(), 0);
    }
}
