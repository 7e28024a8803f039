use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::instance::{InstanceId, InstanceInfo};

/// How a vip interest compares against an instance's vip address
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VipMatchMode {
    Equals,
    Prefix,
}

/// Subscription predicate over instance records.
///
/// Interests compare by value so the notification router can share one index
/// registration between identical subscriptions. `Multiple` has union
/// semantics; de-duplication of overlapping matches is the router's job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interest {
    Instance(InstanceId),
    Application(String),
    Vip { name: String, mode: VipMatchMode },
    FullRegistry,
    Multiple(BTreeSet<Interest>),
}

impl Interest {
    #[must_use]
    pub fn for_instance(id: impl Into<InstanceId>) -> Self {
        Self::Instance(id.into())
    }

    #[must_use]
    pub fn for_application(app: impl Into<String>) -> Self {
        Self::Application(app.into())
    }

    #[must_use]
    pub fn for_vip(name: impl Into<String>, mode: VipMatchMode) -> Self {
        Self::Vip {
            name: name.into(),
            mode,
        }
    }

    #[must_use]
    pub const fn for_full_registry() -> Self {
        Self::FullRegistry
    }

    /// Union of several interests. A single element collapses to itself.
    #[must_use]
    pub fn for_some(interests: impl IntoIterator<Item = Interest>) -> Self {
        let mut set: BTreeSet<Interest> = BTreeSet::new();
        for interest in interests {
            match interest {
                Self::Multiple(inner) => set.extend(inner),
                other => {
                    set.insert(other);
                }
            }
        }
        if set.len() == 1 {
            return set.into_iter().next().unwrap_or(Self::FullRegistry);
        }
        Self::Multiple(set)
    }

    /// Flatten into the atomic sub-interests this predicate is a union of
    #[must_use]
    pub fn atoms(&self) -> Vec<&Interest> {
        match self {
            Self::Multiple(set) => set.iter().flat_map(Interest::atoms).collect(),
            atomic => vec![atomic],
        }
    }

    /// Does this predicate select the given instance?
    #[must_use]
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            Self::Instance(id) => instance.id == *id,
            Self::Application(app) => instance.app == *app,
            Self::Vip { name, mode } => match (&instance.vip_address, mode) {
                (Some(vip), VipMatchMode::Equals) => vip == name,
                (Some(vip), VipMatchMode::Prefix) => vip.starts_with(name.as_str()),
                (None, _) => false,
            },
            Self::FullRegistry => true,
            Self::Multiple(set) => set.iter().any(|interest| interest.matches(instance)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instance::InstanceStatus;

    fn instance(id: &str, app: &str, vip: &str) -> InstanceInfo {
        InstanceInfo::builder(id)
            .app(app)
            .vip_address(vip)
            .status(InstanceStatus::Up)
            .build()
    }

    #[test]
    fn test_atomic_matching() {
        let info = instance("i-1", "billing", "billing.internal");

        assert!(Interest::for_instance("i-1").matches(&info));
        assert!(!Interest::for_instance("i-2").matches(&info));
        assert!(Interest::for_application("billing").matches(&info));
        assert!(Interest::for_vip("billing.internal", VipMatchMode::Equals).matches(&info));
        assert!(Interest::for_vip("billing", VipMatchMode::Prefix).matches(&info));
        assert!(!Interest::for_vip("billing", VipMatchMode::Equals).matches(&info));
        assert!(Interest::for_full_registry().matches(&info));
    }

    #[test]
    fn test_multiple_is_a_union() {
        let info = instance("i-1", "billing", "billing.internal");
        let interest = Interest::for_some([
            Interest::for_application("payments"),
            Interest::for_instance("i-1"),
        ]);

        assert!(interest.matches(&info));
        assert_eq!(interest.atoms().len(), 2);
    }

    #[test]
    fn test_for_some_collapses_single() {
        let interest = Interest::for_some([Interest::for_application("billing")]);
        assert_eq!(interest, Interest::for_application("billing"));
    }

    #[test]
    fn test_for_some_flattens_nested() {
        let nested = Interest::for_some([
            Interest::for_application("a"),
            Interest::for_some([
                Interest::for_application("b"),
                Interest::for_application("a"),
            ]),
        ]);
        assert_eq!(nested.atoms().len(), 2);
    }

    #[test]
    fn test_value_equality_for_index_reuse() {
        let a = Interest::for_some([
            Interest::for_application("x"),
            Interest::for_application("y"),
        ]);
        let b = Interest::for_some([
            Interest::for_application("y"),
            Interest::for_application("x"),
        ]);
        assert_eq!(a, b);
    }
}
