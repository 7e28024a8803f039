//! Rate-limited deferred-removal queue for expired registrations

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::clock::now_millis;
use crate::error::{Error, Result};
use crate::models::{InstanceInfo, Source};

/// An expired registration waiting for its grace period and an eviction grant
#[derive(Debug, Clone)]
pub struct EvictionItem {
    pub instance: InstanceInfo,
    pub source: Source,
    pub expiry: u64,
}

/// FIFO queue of expired registrations, drained by exactly one consumer.
///
/// Items only become visible after a grace period on top of the lease
/// timeout, and the consumer spends quota for every item it takes. Both
/// mechanisms exist to slow mass eviction down: quota is granted externally
/// from observed renewal rates, so a network partition that silences many
/// clients at once does not empty the registry.
pub struct EvictionQueue {
    items: Mutex<VecDeque<EvictionItem>>,
    quota: AtomicU64,
    notify: Notify,
    subscribed: AtomicBool,
    eviction_timeout_ms: u64,
    poll_interval: Duration,
}

impl EvictionQueue {
    #[must_use]
    pub fn new(eviction_timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            quota: AtomicU64::new(0),
            notify: Notify::new(),
            subscribed: AtomicBool::new(false),
            eviction_timeout_ms,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
        }
    }

    /// Append an expired registration; it becomes eligible for eviction once
    /// the grace period elapses
    pub fn add(&self, instance: InstanceInfo, source: Source) {
        let item = EvictionItem {
            instance,
            source,
            expiry: now_millis() + self.eviction_timeout_ms,
        };
        debug!(instance = %item.instance.id, expiry = item.expiry, "queued for eviction");
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    /// Current queue depth, read without draining
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    /// Allow the consumer to evict `n` more items
    pub fn grant_quota(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.quota.fetch_add(n, Ordering::AcqRel);
        self.notify.notify_one();
    }

    #[must_use]
    pub fn quota(&self) -> u64 {
        self.quota.load(Ordering::Acquire)
    }

    /// Take the single drain handle for this queue.
    ///
    /// Quota accounting only works with one consumer; a second concurrent
    /// subscription is a contract violation and fails immediately without
    /// affecting the first.
    pub fn pending_evictions(self: &Arc<Self>) -> Result<EvictionStream> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadySubscribed);
        }
        Ok(EvictionStream {
            queue: Arc::clone(self),
        })
    }

    /// Pop the head if it is both past expiry and covered by quota; otherwise
    /// report how long to wait before checking again.
    fn try_pop(&self) -> std::result::Result<EvictionItem, Option<Duration>> {
        let mut items = self.items.lock();
        let Some(head) = items.front() else {
            return Err(None);
        };
        let now = now_millis();
        if head.expiry > now {
            return Err(Some(Duration::from_millis(head.expiry - now)));
        }
        // single consumer, so load-then-subtract cannot race another taker
        if self.quota.load(Ordering::Acquire) == 0 {
            return Err(Some(self.poll_interval));
        }
        self.quota.fetch_sub(1, Ordering::AcqRel);
        match items.pop_front() {
            Some(item) => Ok(item),
            None => Err(None),
        }
    }
}

impl std::fmt::Debug for EvictionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionQueue")
            .field("size", &self.size())
            .field("quota", &self.quota())
            .finish()
    }
}

/// Single-subscriber pull handle over an [`EvictionQueue`].
///
/// Dropping the stream releases the subscription slot.
pub struct EvictionStream {
    queue: Arc<EvictionQueue>,
}

impl EvictionStream {
    /// Wait for the next item that is past expiry and covered by quota.
    ///
    /// Pends until the head item matures, quota is granted, or a new item
    /// arrives into an empty queue.
    pub async fn next(&mut self) -> EvictionItem {
        loop {
            match self.queue.try_pop() {
                Ok(item) => return item,
                Err(None) => self.queue.notify.notified().await,
                Err(Some(wait)) => {
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = self.queue.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Depth of the underlying queue
    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.size()
    }
}

impl Drop for EvictionStream {
    fn drop(&mut self) {
        self.queue.subscribed.store(false, Ordering::Release);
    }
}
