//! Keyed routing index from interest atoms to subscriber ids

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::models::{InstanceId, InstanceInfo, Interest, VipMatchMode};

/// Routes a mutation to the subscribers whose interest selects it.
///
/// Atoms with an exact key (instance id, application, vip equality) are
/// indexed so routing one notification costs a few map lookups instead of a
/// scan over all subscribers. Full-registry and vip-prefix atoms cannot be
/// keyed and live in a small scan table evaluated per notification.
#[derive(Default)]
pub(crate) struct InterestIndex {
    by_instance: DashMap<InstanceId, BTreeSet<u64>>,
    by_app: DashMap<String, BTreeSet<u64>>,
    by_vip: DashMap<String, BTreeSet<u64>>,
    scans: RwLock<BTreeMap<u64, Vec<Interest>>>,
}

impl InterestIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, subscriber: u64, interest: &Interest) {
        for atom in interest.atoms() {
            match atom {
                Interest::Instance(id) => {
                    self.by_instance
                        .entry(id.clone())
                        .or_default()
                        .insert(subscriber);
                }
                Interest::Application(app) => {
                    self.by_app.entry(app.clone()).or_default().insert(subscriber);
                }
                Interest::Vip {
                    name,
                    mode: VipMatchMode::Equals,
                } => {
                    self.by_vip.entry(name.clone()).or_default().insert(subscriber);
                }
                scan => {
                    self.scans
                        .write()
                        .entry(subscriber)
                        .or_default()
                        .push(scan.clone());
                }
            }
        }
    }

    pub(crate) fn unregister(&self, subscriber: u64, interest: &Interest) {
        for atom in interest.atoms() {
            match atom {
                Interest::Instance(id) => {
                    Self::drop_from(&self.by_instance, id, subscriber);
                }
                Interest::Application(app) => {
                    Self::drop_from(&self.by_app, app, subscriber);
                }
                Interest::Vip {
                    name,
                    mode: VipMatchMode::Equals,
                } => {
                    Self::drop_from(&self.by_vip, name, subscriber);
                }
                _ => {}
            }
        }
        self.scans.write().remove(&subscriber);
    }

    fn drop_from<K: std::hash::Hash + Eq>(
        map: &DashMap<K, BTreeSet<u64>>,
        key: &K,
        subscriber: u64,
    ) {
        if let Some(mut set) = map.get_mut(key) {
            set.remove(&subscriber);
            if set.is_empty() {
                drop(set);
                map.remove_if(key, |_, set| set.is_empty());
            }
        }
    }

    /// Subscriber ids whose interest selects this instance. The set union
    /// de-duplicates subscribers matched by more than one of their atoms.
    pub(crate) fn route(&self, instance: &InstanceInfo) -> BTreeSet<u64> {
        let mut targets = BTreeSet::new();
        if let Some(set) = self.by_instance.get(&instance.id) {
            targets.extend(set.iter().copied());
        }
        if let Some(set) = self.by_app.get(&instance.app) {
            targets.extend(set.iter().copied());
        }
        if let Some(vip) = &instance.vip_address {
            if let Some(set) = self.by_vip.get(vip) {
                targets.extend(set.iter().copied());
            }
        }
        for (subscriber, atoms) in self.scans.read().iter() {
            if atoms.iter().any(|atom| atom.matches(instance)) {
                targets.insert(*subscriber);
            }
        }
        targets
    }
}
