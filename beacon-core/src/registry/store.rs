//! Multi-source registry store with conflict resolution and change fan-out

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::eviction::EvictionQueue;
use super::holder::{HolderChange, InstanceHolder};
use super::lease::Lease;
use crate::clock::now_millis;
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::interest::{InterestSubscription, NotificationRouter};
use crate::models::{
    ChangeNotification, Delta, InstanceId, InstanceInfo, Interest, Origin, Source, SourceMatcher,
};

/// Payload of an update operation: either field deltas against the current
/// record, or a full replacement that doubles as an implicit registration
/// when the instance is unknown
#[derive(Debug, Clone)]
pub enum InstanceUpdate {
    Deltas { id: InstanceId, deltas: Vec<Delta> },
    Full(InstanceInfo),
}

struct LeaseEntry {
    lease: Lease,
    source: Source,
}

/// The authoritative in-memory registry.
///
/// Every mutation resolves the winning view inside the affected holder only
/// and reports the outcome through the notification router while holding its
/// gate, so holder state and the notification stream can never disagree.
/// Leases track locally-registered instances; replicated contributions are
/// owned by their peer's lifecycle and leave via [`Self::evict_all`].
pub struct RegistryStore {
    entries: DashMap<InstanceId, InstanceHolder>,
    leases: DashMap<InstanceId, LeaseEntry>,
    router: Arc<NotificationRouter>,
    eviction: Arc<EvictionQueue>,
    config: RegistryConfig,
    renewals: AtomicU64,
}

impl RegistryStore {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            leases: DashMap::new(),
            router: Arc::new(NotificationRouter::new(config.subscriber_queue_capacity)),
            eviction: Arc::new(EvictionQueue::new(
                config.eviction_timeout_ms,
                config.eviction_poll_interval_ms,
            )),
            config,
            renewals: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn eviction_queue(&self) -> Arc<EvictionQueue> {
        Arc::clone(&self.eviction)
    }

    /// Insert or update the contribution from `source` for this instance.
    ///
    /// Re-registration with identical data emits nothing but still bumps the
    /// stored version. A local registration creates or renews the lease.
    pub fn register(&self, instance: InstanceInfo, source: Source) -> Result<()> {
        let _gate = self.router.mutation_gate();
        let id = instance.id.clone();
        let change = self
            .entries
            .entry(id.clone())
            .or_insert_with(|| InstanceHolder::new(id.clone()))
            .upsert(instance, source.clone(), now_millis());

        if source.origin == Origin::Local && !matches!(change, HolderChange::StaleGeneration) {
            self.touch_lease(&id, &source);
        }
        self.emit(change, source);
        Ok(())
    }

    /// Apply an update from `source`.
    ///
    /// A full payload for an unknown instance is recovered as an implicit
    /// registration. A delta payload needs a prior registration from the
    /// same origin stream; without one the update is dropped and the error
    /// is reported to the caller only.
    pub fn update(&self, update: InstanceUpdate, source: Source) -> Result<()> {
        match update {
            InstanceUpdate::Full(instance) => self.register(instance, source),
            InstanceUpdate::Deltas { id, deltas } => {
                let _gate = self.router.mutation_gate();
                let change = match self.entries.get_mut(&id) {
                    Some(mut holder) => {
                        holder.apply_deltas(&deltas, source.clone(), now_millis())?
                    }
                    None => {
                        warn!(instance = %id, %source, "delta update for unknown instance dropped");
                        return Err(Error::UnknownInstance(id));
                    }
                };
                if source.origin == Origin::Local {
                    self.touch_lease(&id, &source);
                }
                self.emit(change, source);
                Ok(())
            }
        }
    }

    /// Remove the contribution from `source`. Unregistering an instance the
    /// source never registered is a no-op.
    pub fn unregister(&self, id: &InstanceId, source: &Source) -> Result<()> {
        let _gate = self.router.mutation_gate();
        let change = match self.entries.get_mut(id) {
            None => return Ok(()),
            Some(mut holder) => holder.remove(source),
        };
        if matches!(change, HolderChange::Removed(_)) {
            self.entries.remove_if(id, |_, holder| holder.is_empty());
        }
        if source.origin == Origin::Local {
            if let Some(mut entry) = self.leases.get_mut(id) {
                entry.lease.cancel();
            }
            self.leases.remove(id);
        }
        self.emit(change, source.clone());
        Ok(())
    }

    /// Renew the lease for a locally-registered instance
    pub fn renew(&self, id: &InstanceId) -> Result<()> {
        match self.leases.get_mut(id) {
            Some(mut entry) => {
                entry.lease.renew();
                self.renewals.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Error::UnknownInstance(id.clone())),
        }
    }

    /// Atomically remove every contribution whose source matches.
    ///
    /// All resulting view changes go out as one buffered batch, so a peer
    /// disconnect never looks like a flood of unrelated single deletes.
    /// Returns the number of holders removed entirely.
    pub fn evict_all(&self, matcher: &SourceMatcher) -> usize {
        let _gate = self.router.mutation_gate();
        let mut notifications = Vec::new();
        let mut emptied = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let prior_source = entry.winning_source().cloned();
            match entry.value_mut().remove_matching(matcher) {
                HolderChange::Removed(instance) => {
                    emptied.push(instance.id.clone());
                    if let Some(source) = prior_source {
                        notifications.push(ChangeNotification::Delete { instance, source });
                    }
                }
                HolderChange::Modified { instance, deltas } => {
                    if let Some(source) = prior_source {
                        notifications.push(ChangeNotification::Modify {
                            instance,
                            deltas,
                            source,
                        });
                    }
                }
                _ => {}
            }
        }

        let removed = emptied.len();
        for id in emptied {
            self.entries.remove_if(&id, |_, holder| holder.is_empty());
            self.leases.remove(&id);
        }
        if !notifications.is_empty() {
            info!(removed, changes = notifications.len(), "bulk eviction");
            self.router.publish_batch(notifications);
        }
        removed
    }

    /// Live notification stream for `interest`, preceded by a one-time
    /// buffered snapshot of currently-matching entries
    #[must_use]
    pub fn for_interest(self: &Arc<Self>, interest: Interest) -> InterestSubscription {
        let store = Arc::clone(self);
        let snapshot_interest = interest.clone();
        self.router
            .subscribe(interest, move || store.snapshot_matching(&snapshot_interest))
    }

    /// Live notification stream for `interest` without the catch-up snapshot
    #[must_use]
    pub fn for_interest_live(self: &Arc<Self>, interest: Interest) -> InterestSubscription {
        self.router.subscribe(interest, Vec::new)
    }

    /// Current winning view of one instance
    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<InstanceInfo> {
        self.entries.get(id).and_then(|holder| holder.winning().cloned())
    }

    /// Number of registered instances
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Number of instances with at least one contribution from a matching
    /// source; used by the replication handshake to detect divergence
    #[must_use]
    pub fn size_for(&self, matcher: &SourceMatcher) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.sources().any(|source| matcher.matches(source)))
            .count()
    }

    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Renewals observed since the last call; the self-preservation
    /// controller reads this once per window
    pub fn take_renewals(&self) -> u64 {
        self.renewals.swap(0, Ordering::Relaxed)
    }

    /// Move expired leases into the eviction queue. Each expired lease is
    /// removed here; actual registry removal happens when the eviction drain
    /// is granted quota.
    pub fn sweep_expired_leases(&self) {
        let now = now_millis();
        let expired: Vec<InstanceId> = self
            .leases
            .iter()
            .filter(|entry| entry.lease.is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired {
            let Some((_, entry)) = self.leases.remove(&id) else {
                continue;
            };
            let Some(view) = self.get(&id) else {
                continue;
            };
            debug!(instance = %id, "lease expired");
            self.eviction.add(view, entry.source);
        }
    }

    /// Periodic lease sweeper; stops when the token is cancelled
    pub fn spawn_lease_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = Duration::from_millis(store.config.eviction_sweep_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => store.sweep_expired_leases(),
                    () = token.cancelled() => break,
                }
            }
        })
    }

    /// Drain the eviction queue as quota permits, removing each released
    /// registration from the store. Takes the queue's single drain slot.
    pub fn spawn_eviction_drain(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut stream = self.eviction.pending_evictions()?;
        let store = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    item = stream.next() => {
                        info!(instance = %item.instance.id, source = %item.source, "evicting expired registration");
                        if let Err(error) = store.unregister(&item.instance.id, &item.source) {
                            warn!(instance = %item.instance.id, %error, "eviction failed");
                        }
                    }
                    () = token.cancelled() => break,
                }
            }
        }))
    }

    fn snapshot_matching(&self, interest: &Interest) -> Vec<ChangeNotification> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let view = entry.winning()?;
                if !interest.matches(view) {
                    return None;
                }
                let source = entry.winning_source()?;
                Some(ChangeNotification::Add {
                    instance: view.clone(),
                    source: source.clone(),
                })
            })
            .collect()
    }

    fn touch_lease(&self, id: &InstanceId, source: &Source) {
        match self.leases.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().lease.is_cancelled() {
                    occupied.insert(LeaseEntry {
                        lease: Lease::new(self.config.lease_duration_ms),
                        source: source.clone(),
                    });
                } else {
                    occupied.get_mut().lease.renew();
                    occupied.get_mut().source = source.clone();
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry {
                    lease: Lease::new(self.config.lease_duration_ms),
                    source: source.clone(),
                });
            }
        }
    }

    fn emit(&self, change: HolderChange, source: Source) {
        match change {
            HolderChange::Added(instance) => {
                self.router
                    .publish(ChangeNotification::Add { instance, source });
            }
            HolderChange::Modified { instance, deltas } => {
                self.router.publish(ChangeNotification::Modify {
                    instance,
                    deltas,
                    source,
                });
            }
            HolderChange::Removed(instance) => {
                self.router
                    .publish(ChangeNotification::Delete { instance, source });
            }
            HolderChange::Unchanged => {}
            HolderChange::StaleGeneration => {
                debug!(%source, "mutation from stale generation discarded");
            }
        }
    }
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStore")
            .field("instances", &self.size())
            .field("leases", &self.lease_count())
            .finish()
    }
}
