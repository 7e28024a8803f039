//! Per-instance multi-source entry with winning-view resolution

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::models::{diff, Delta, InstanceId, InstanceInfo, Origin, Source, SourceMatcher};

/// One source's latest contribution to a registry entry
#[derive(Debug, Clone)]
pub struct SourcedEntry {
    pub source: Source,
    pub instance: InstanceInfo,
    pub updated_at: u64,
}

/// How a holder mutation changed the winning view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderChange {
    /// The holder gained its first contribution; this is the new view
    Added(InstanceInfo),
    /// The winning view changed
    Modified {
        instance: InstanceInfo,
        deltas: Vec<Delta>,
    },
    /// The last contribution was removed; this was the final view
    Removed(InstanceInfo),
    /// The mutation was applied but the winning view is unaffected
    Unchanged,
    /// The mutation carried a generation older than one already seen for the
    /// same origin stream and was discarded
    StaleGeneration,
}

/// Registry entry for one instance id.
///
/// Holds the latest contribution per origin stream, most recently active
/// stream last. The winning view is the contribution with the highest origin
/// precedence, ties broken by latest update time, then by source generation
/// so equal-timestamp resolution stays deterministic.
#[derive(Debug)]
pub struct InstanceHolder {
    id: InstanceId,
    entries: IndexMap<(Origin, String), SourcedEntry>,
}

impl InstanceHolder {
    #[must_use]
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            entries: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &InstanceId {
        &self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.entries.values().map(|entry| &entry.source)
    }

    /// The current winning view, if any source contributes
    #[must_use]
    pub fn winning(&self) -> Option<&InstanceInfo> {
        self.winning_entry().map(|entry| &entry.instance)
    }

    #[must_use]
    pub fn winning_source(&self) -> Option<&Source> {
        self.winning_entry().map(|entry| &entry.source)
    }

    fn winning_entry(&self) -> Option<&SourcedEntry> {
        self.entries.values().max_by_key(|entry| {
            (
                entry.source.origin.precedence(),
                entry.updated_at,
                entry.source.generation,
            )
        })
    }

    /// Insert or replace the contribution from `source`'s origin stream.
    ///
    /// The stored version is bumped past every version already present so
    /// replication peers can detect convergence even when the data itself is
    /// unchanged.
    pub fn upsert(&mut self, instance: InstanceInfo, source: Source, now: u64) -> HolderChange {
        let key = source.stream_key();
        if let Some(existing) = self.entries.get(&key) {
            if existing.source.generation > source.generation {
                return HolderChange::StaleGeneration;
            }
        }

        let previous_view = self.winning().cloned();

        let max_version = self
            .entries
            .values()
            .map(|entry| entry.instance.version)
            .max()
            .unwrap_or(0);
        let version = instance.version.max(max_version + 1);
        let stored = instance.to_builder().version(version).build();

        // re-insert so the most recently active stream sits last
        self.entries.shift_remove(&key);
        self.entries.insert(
            key,
            SourcedEntry {
                source,
                instance: stored,
                updated_at: now,
            },
        );

        self.view_change_since(previous_view)
    }

    /// Apply field deltas to the contribution already registered by
    /// `source`'s origin stream
    pub fn apply_deltas(
        &mut self,
        deltas: &[Delta],
        source: Source,
        now: u64,
    ) -> Result<HolderChange> {
        let key = source.stream_key();
        let current = match self.entries.get(&key) {
            Some(entry) => {
                if entry.source.generation > source.generation {
                    return Ok(HolderChange::StaleGeneration);
                }
                entry.instance.clone()
            }
            None => return Err(Error::UnknownInstance(self.id.clone())),
        };

        let updated = current.to_builder().apply_all(deltas).build();
        Ok(self.upsert(updated, source, now))
    }

    /// Remove the contribution from `source`'s origin stream.
    ///
    /// Removing a stream that never contributed is a no-op; a removal tagged
    /// with a stale generation is discarded.
    pub fn remove(&mut self, source: &Source) -> HolderChange {
        let key = source.stream_key();
        match self.entries.get(&key) {
            None => return HolderChange::Unchanged,
            Some(entry) if entry.source.generation > source.generation => {
                return HolderChange::StaleGeneration;
            }
            Some(_) => {}
        }

        let Some(previous_view) = self.winning().cloned() else {
            return HolderChange::Unchanged;
        };
        self.entries.shift_remove(&key);

        if self.entries.is_empty() {
            return HolderChange::Removed(previous_view);
        }
        self.view_change_since(Some(previous_view))
    }

    /// Remove every contribution whose source matches the predicate
    pub fn remove_matching(&mut self, matcher: &SourceMatcher) -> HolderChange {
        let keys: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| matcher.matches(&entry.source))
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return HolderChange::Unchanged;
        }

        let Some(previous_view) = self.winning().cloned() else {
            return HolderChange::Unchanged;
        };
        for key in keys {
            self.entries.shift_remove(&key);
        }

        if self.entries.is_empty() {
            return HolderChange::Removed(previous_view);
        }
        self.view_change_since(Some(previous_view))
    }

    fn view_change_since(&self, previous: Option<InstanceInfo>) -> HolderChange {
        let Some(current) = self.winning() else {
            // callers handle emptiness before getting here
            return HolderChange::Unchanged;
        };
        match previous {
            None => HolderChange::Added(current.clone()),
            Some(ref old) if old.same_data(current) => HolderChange::Unchanged,
            Some(ref old) => HolderChange::Modified {
                instance: current.clone(),
                deltas: diff(old, current),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstanceStatus;

    fn info(id: &str, status: InstanceStatus) -> InstanceInfo {
        InstanceInfo::builder(id).app("billing").status(status).build()
    }

    #[test]
    fn test_first_contribution_adds() {
        let mut holder = InstanceHolder::new("i-1".into());
        let change = holder.upsert(info("i-1", InstanceStatus::Up), Source::local("node-a"), 10);
        assert!(matches!(change, HolderChange::Added(_)));
        assert_eq!(holder.len(), 1);
    }

    #[test]
    fn test_local_wins_over_replicated_either_order() {
        for local_first in [true, false] {
            let mut holder = InstanceHolder::new("i-1".into());
            let local = (info("i-1", InstanceStatus::Up), Source::local("node-a"));
            let replicated = (
                info("i-1", InstanceStatus::Down),
                Source::new(Origin::Replicated, "peer-1"),
            );

            let (first, second) = if local_first {
                (local, replicated)
            } else {
                (replicated, local)
            };
            holder.upsert(first.0, first.1, 10);
            holder.upsert(second.0, second.1, 20);

            let winner = holder.winning().unwrap();
            assert_eq!(winner.status, InstanceStatus::Up, "local_first={local_first}");
        }
    }

    #[test]
    fn test_equal_origin_latest_update_wins() {
        let mut holder = InstanceHolder::new("i-1".into());
        holder.upsert(
            info("i-1", InstanceStatus::Up),
            Source::new(Origin::Replicated, "peer-1"),
            10,
        );
        holder.upsert(
            info("i-1", InstanceStatus::Down),
            Source::new(Origin::Replicated, "peer-2"),
            20,
        );
        assert_eq!(holder.winning().unwrap().status, InstanceStatus::Down);
    }

    #[test]
    fn test_equal_timestamp_tie_breaks_on_generation() {
        let mut holder = InstanceHolder::new("i-1".into());
        holder.upsert(
            info("i-1", InstanceStatus::Up),
            Source::with_generation(Origin::Replicated, "peer-1", 3),
            10,
        );
        holder.upsert(
            info("i-1", InstanceStatus::Down),
            Source::with_generation(Origin::Replicated, "peer-2", 7),
            10,
        );
        assert_eq!(holder.winning().unwrap().status, InstanceStatus::Down);
    }

    #[test]
    fn test_stale_generation_discarded() {
        let mut holder = InstanceHolder::new("i-1".into());
        holder.upsert(
            info("i-1", InstanceStatus::Up),
            Source::with_generation(Origin::Replicated, "peer-1", 5),
            10,
        );
        let change = holder.upsert(
            info("i-1", InstanceStatus::Down),
            Source::with_generation(Origin::Replicated, "peer-1", 4),
            20,
        );
        assert_eq!(change, HolderChange::StaleGeneration);
        assert_eq!(holder.winning().unwrap().status, InstanceStatus::Up);

        let change = holder.remove(&Source::with_generation(Origin::Replicated, "peer-1", 4));
        assert_eq!(change, HolderChange::StaleGeneration);
        assert_eq!(holder.len(), 1);
    }

    #[test]
    fn test_idempotent_reregistration_bumps_version_only() {
        let mut holder = InstanceHolder::new("i-1".into());
        let source = Source::local("node-a");
        holder.upsert(info("i-1", InstanceStatus::Up), source.clone(), 10);
        let v1 = holder.winning().unwrap().version;

        let change = holder.upsert(info("i-1", InstanceStatus::Up), source, 20);
        assert_eq!(change, HolderChange::Unchanged);
        assert!(holder.winning().unwrap().version > v1);
    }

    #[test]
    fn test_remove_last_contribution_reports_final_view() {
        let mut holder = InstanceHolder::new("i-1".into());
        let source = Source::local("node-a");
        holder.upsert(info("i-1", InstanceStatus::Up), source.clone(), 10);

        match holder.remove(&source) {
            HolderChange::Removed(instance) => assert_eq!(instance.status, InstanceStatus::Up),
            other => panic!("expected Removed, got {other:?}"),
        }
        assert!(holder.is_empty());
    }

    #[test]
    fn test_remove_losing_source_keeps_view() {
        let mut holder = InstanceHolder::new("i-1".into());
        let replicated = Source::new(Origin::Replicated, "peer-1");
        holder.upsert(info("i-1", InstanceStatus::Up), Source::local("node-a"), 10);
        holder.upsert(info("i-1", InstanceStatus::Down), replicated.clone(), 20);

        assert_eq!(holder.remove(&replicated), HolderChange::Unchanged);
        assert_eq!(holder.winning().unwrap().status, InstanceStatus::Up);
    }

    #[test]
    fn test_remove_winning_source_falls_back_with_deltas() {
        let mut holder = InstanceHolder::new("i-1".into());
        let local = Source::local("node-a");
        holder.upsert(
            info("i-1", InstanceStatus::Down),
            Source::new(Origin::Replicated, "peer-1"),
            10,
        );
        holder.upsert(info("i-1", InstanceStatus::Up), local.clone(), 20);

        match holder.remove(&local) {
            HolderChange::Modified { instance, deltas } => {
                assert_eq!(instance.status, InstanceStatus::Down);
                assert_eq!(deltas.len(), 1);
            }
            other => panic!("expected Modified, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_deltas_requires_prior_register() {
        let mut holder = InstanceHolder::new("i-1".into());
        let result = holder.apply_deltas(
            &[Delta::Status {
                value: InstanceStatus::Down,
            }],
            Source::local("node-a"),
            10,
        );
        assert!(matches!(result, Err(Error::UnknownInstance(_))));
    }

    #[test]
    fn test_remove_matching_clears_peer_contributions() {
        let mut holder = InstanceHolder::new("i-1".into());
        let peer = Source::new(Origin::Replicated, "peer-1");
        holder.upsert(info("i-1", InstanceStatus::Down), peer.clone(), 10);
        holder.upsert(info("i-1", InstanceStatus::Up), Source::local("node-a"), 20);

        let change = holder.remove_matching(&SourceMatcher::Exact(peer));
        assert_eq!(change, HolderChange::Unchanged);
        assert_eq!(holder.len(), 1);

        let change = holder.remove_matching(&SourceMatcher::Origin(Origin::Local));
        assert!(matches!(change, HolderChange::Removed(_)));
        assert!(holder.is_empty());
    }
}
