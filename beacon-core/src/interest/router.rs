//! Fan-out of registry change notifications to interest subscribers

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::index::InterestIndex;
use crate::models::{buffered, ChangeNotification, Interest};

#[derive(Default)]
struct QueueInner {
    batches: VecDeque<Vec<ChangeNotification>>,
    queued: usize,
}

/// Per-subscriber bounded delivery queue.
///
/// Notifications are queued in whole batches so buffer sentinel pairing can
/// never be split by overflow handling. When a slow subscriber overruns its
/// capacity, the oldest batches are dropped whole and counted.
struct SubscriberState {
    inner: Mutex<QueueInner>,
    notify: Notify,
    closed: AtomicBool,
    dropped_batches: AtomicU64,
}

impl SubscriberState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped_batches: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, subscriber: u64, batch: Vec<ChangeNotification>, capacity: usize) {
        if batch.is_empty() {
            return;
        }
        let len = batch.len();
        let mut dropped = 0u64;
        {
            let mut inner = self.inner.lock();
            while inner.queued + len > capacity {
                match inner.batches.pop_front() {
                    Some(old) => {
                        inner.queued -= old.len();
                        dropped += 1;
                    }
                    // a batch larger than the whole capacity is delivered
                    // anyway, it cannot be split
                    None => break,
                }
            }
            inner.batches.push_back(batch);
            inner.queued += len;
        }
        if dropped > 0 {
            self.dropped_batches.fetch_add(dropped, Ordering::Relaxed);
            warn!(subscriber, dropped, "slow subscriber, dropped oldest batches");
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct SubscriberEntry {
    interest: Interest,
    state: Arc<SubscriberState>,
}

/// Multiplexes the registry's change stream to many concurrent subscribers.
///
/// The gate lock orders mutations against subscriptions: every mutation
/// holds it shared while it updates the store and publishes, and `subscribe`
/// takes it exclusively while it snapshots and registers. A new subscriber
/// therefore sees every change exactly once, either inside its snapshot or
/// as a live notification, never both and never neither.
pub struct NotificationRouter {
    gate: RwLock<()>,
    index: InterestIndex,
    subscribers: DashMap<u64, SubscriberEntry>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl NotificationRouter {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            gate: RwLock::new(()),
            index: InterestIndex::new(),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Acquire the shared side of the gate. Mutators hold this across the
    /// store update and the publish that reports it.
    #[must_use]
    pub fn mutation_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Register a subscriber and atomically pre-load it with a snapshot.
    ///
    /// `snapshot` runs under the exclusive gate, so it observes a registry
    /// state no in-flight mutation can straddle. Two or more snapshot
    /// entries are fenced as one buffered batch; a single entry is bare.
    pub fn subscribe<F>(self: &Arc<Self>, interest: Interest, snapshot: F) -> InterestSubscription
    where
        F: FnOnce() -> Vec<ChangeNotification>,
    {
        let gate = self.gate.write();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriberState::new());

        let catch_up = buffered(snapshot());
        if !catch_up.is_empty() {
            state.enqueue(id, catch_up, self.queue_capacity);
        }

        self.index.register(id, &interest);
        self.subscribers.insert(
            id,
            SubscriberEntry {
                interest: interest.clone(),
                state: Arc::clone(&state),
            },
        );
        drop(gate);

        debug!(subscriber = id, ?interest, "interest subscribed");
        InterestSubscription {
            id,
            interest,
            router: Arc::clone(self),
            state,
            pending: VecDeque::new(),
        }
    }

    /// Deliver one notification to every subscriber it matches. The caller
    /// must hold the mutation gate.
    pub fn publish(&self, notification: ChangeNotification) {
        let Some(instance) = notification.instance() else {
            return;
        };
        let targets = self.index.route(instance);
        for id in targets {
            if let Some(entry) = self.subscribers.get(&id) {
                entry
                    .state
                    .enqueue(id, vec![notification.clone()], self.queue_capacity);
            }
        }
    }

    /// Deliver a group of data notifications as one atomic batch per
    /// subscriber. Each subscriber receives only the notifications its
    /// interest matches, re-fenced after filtering so sentinel pairing
    /// stays intact. The caller must hold the mutation gate.
    pub fn publish_batch(&self, notifications: Vec<ChangeNotification>) {
        let mut per_subscriber: BTreeMap<u64, Vec<ChangeNotification>> = BTreeMap::new();
        for notification in &notifications {
            let Some(instance) = notification.instance() else {
                continue;
            };
            for id in self.index.route(instance) {
                per_subscriber
                    .entry(id)
                    .or_default()
                    .push(notification.clone());
            }
        }
        for (id, batch) in per_subscriber {
            if let Some(entry) = self.subscribers.get(&id) {
                entry.state.enqueue(id, buffered(batch), self.queue_capacity);
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn unsubscribe(&self, id: u64, interest: &Interest) {
        // exclusive gate: no publish is mid-route, so delivery stops here
        let gate = self.gate.write();
        self.index.unregister(id, interest);
        if let Some((_, entry)) = self.subscribers.remove(&id) {
            entry.state.close();
        }
        drop(gate);
        debug!(subscriber = id, "interest unsubscribed");
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live notification stream for one interest.
///
/// Dropping the subscription synchronously releases its index registration;
/// other subscribers of the same interest are unaffected.
pub struct InterestSubscription {
    id: u64,
    interest: Interest,
    router: Arc<NotificationRouter>,
    state: Arc<SubscriberState>,
    pending: VecDeque<ChangeNotification>,
}

impl InterestSubscription {
    /// Next notification, in the order the registry produced them.
    ///
    /// Returns `None` once the subscription has been closed and the queue is
    /// fully drained.
    pub async fn next(&mut self) -> Option<ChangeNotification> {
        loop {
            if let Some(notification) = self.pending.pop_front() {
                return Some(notification);
            }
            let batch = {
                let mut inner = self.state.inner.lock();
                match inner.batches.pop_front() {
                    Some(batch) => {
                        inner.queued -= batch.len();
                        Some(batch)
                    }
                    None => None,
                }
            };
            match batch {
                Some(batch) => self.pending = batch.into(),
                None => {
                    if self.state.closed.load(Ordering::Acquire) {
                        return None;
                    }
                    self.state.notify.notified().await;
                }
            }
        }
    }

    #[must_use]
    pub const fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Number of whole batches discarded because this subscriber fell behind
    #[must_use]
    pub fn dropped_batches(&self) -> u64 {
        self.state.dropped_batches.load(Ordering::Relaxed)
    }
}

impl Drop for InterestSubscription {
    fn drop(&mut self) {
        self.router.unsubscribe(self.id, &self.interest);
    }
}
