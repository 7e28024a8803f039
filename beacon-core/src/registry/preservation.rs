//! Self-preservation: eviction quota from observed renewal rates

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::eviction::EvictionQueue;
use super::store::RegistryStore;
use crate::config::RegistryConfig;

/// Grants eviction quota only while the client population looks healthy.
///
/// Each window the controller compares observed lease renewals against the
/// number of live leases. When too few renewals arrive, the likely cause is
/// a partition between this node and its clients rather than mass client
/// death, so the controller withholds quota and the registry keeps serving
/// the last known state.
pub struct EvictionController {
    store: Arc<RegistryStore>,
    queue: Arc<EvictionQueue>,
    renewal_threshold: f64,
    window: Duration,
}

impl EvictionController {
    #[must_use]
    pub fn new(store: Arc<RegistryStore>, config: &RegistryConfig) -> Self {
        let queue = store.eviction_queue();
        Self {
            store,
            queue,
            renewal_threshold: config.renewal_threshold,
            window: Duration::from_millis(config.renewal_window_ms.max(1)),
        }
    }

    /// One controller decision: read this window's renewals and grant quota
    /// for everything pending, or nothing
    pub fn tick(&self) {
        let observed = self.store.take_renewals();
        let pending = self.queue.size();
        if pending == 0 {
            return;
        }

        let expected = self.store.lease_count();
        let healthy =
            expected == 0 || observed as f64 >= self.renewal_threshold * expected as f64;
        if healthy {
            info!(pending, observed, "granting eviction quota");
            self.queue.grant_quota(pending as u64);
        } else {
            warn!(
                observed,
                expected,
                pending,
                "renewal rate below threshold, self-preservation withholding evictions"
            );
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately and would see zero renewals
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick(),
                    () = token.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceInfo, InstanceStatus, Source};

    fn store_with(config: RegistryConfig) -> Arc<RegistryStore> {
        RegistryStore::new(config)
    }

    fn register(store: &RegistryStore, id: &str) {
        store
            .register(
                InstanceInfo::builder(id)
                    .app("app")
                    .status(InstanceStatus::Up)
                    .build(),
                Source::local("node-a"),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_withholds_quota_when_renewals_collapse() {
        let store = store_with(RegistryConfig::default());
        for i in 0..4 {
            register(&store, &format!("i-{i}"));
        }
        // one expired instance pending, zero renewals observed
        store.eviction_queue().add(
            InstanceInfo::builder("dead")
                .app("app")
                .status(InstanceStatus::Up)
                .build(),
            Source::local("node-a"),
        );

        let controller = EvictionController::new(Arc::clone(&store), &RegistryConfig::default());
        controller.tick();
        assert_eq!(store.eviction_queue().quota(), 0);
    }

    #[tokio::test]
    async fn test_grants_quota_when_healthy() {
        let store = store_with(RegistryConfig::default());
        for i in 0..4 {
            register(&store, &format!("i-{i}"));
        }
        for i in 0..4 {
            store.renew(&format!("i-{i}").into()).unwrap();
        }
        store.eviction_queue().add(
            InstanceInfo::builder("dead")
                .app("app")
                .status(InstanceStatus::Up)
                .build(),
            Source::local("node-a"),
        );

        let controller = EvictionController::new(Arc::clone(&store), &RegistryConfig::default());
        controller.tick();
        assert_eq!(store.eviction_queue().quota(), 1);
    }

    #[tokio::test]
    async fn test_no_leases_means_no_preservation() {
        let store = store_with(RegistryConfig::default());
        store.eviction_queue().add(
            InstanceInfo::builder("dead")
                .app("app")
                .status(InstanceStatus::Up)
                .build(),
            Source::local("node-a"),
        );

        let controller = EvictionController::new(Arc::clone(&store), &RegistryConfig::default());
        controller.tick();
        assert_eq!(store.eviction_queue().quota(), 1);
    }
}
