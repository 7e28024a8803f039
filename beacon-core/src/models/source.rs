use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide generation counter. Every source minted by this process gets
/// a strictly increasing generation, so a reconnecting peer channel is always
/// distinguishable from the channel it replaces.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Origin class of a contribution to a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    Replicated,
    Bridge,
}

impl Origin {
    /// Precedence used by winning-view resolution. Local contributions always
    /// beat replicated and bridged ones.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Local => 2,
            Self::Replicated | Self::Bridge => 1,
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Replicated => write!(f, "replicated"),
            Self::Bridge => write!(f, "bridge"),
        }
    }
}

/// Identity of one origin stream contributing data to the registry.
///
/// Two sources belong to the same stream when origin and name match; the
/// generation tells replays from a dead connection apart from data sent over
/// its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub origin: Origin,
    pub name: String,
    pub generation: u64,
}

impl Source {
    /// Mint a source with a fresh process-wide generation
    #[must_use]
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Rebuild a source observed elsewhere, keeping its generation
    #[must_use]
    pub fn with_generation(origin: Origin, name: impl Into<String>, generation: u64) -> Self {
        Self {
            origin,
            name: name.into(),
            generation,
        }
    }

    #[must_use]
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(Origin::Local, name)
    }

    /// True when `other` carries data for the same origin stream,
    /// regardless of generation
    #[must_use]
    pub fn same_stream(&self, other: &Self) -> bool {
        self.origin == other.origin && self.name == other.name
    }

    /// Key identifying the origin stream within a holder
    #[must_use]
    pub fn stream_key(&self) -> (Origin, String) {
        (self.origin, self.name.clone())
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.origin, self.name, self.generation)
    }
}

/// Predicate over sources, used for bulk eviction and replication filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMatcher {
    /// Matches every source
    Any,
    /// Matches any source with the given origin
    Origin(Origin),
    /// Matches any generation of one origin stream
    Stream { origin: Origin, name: String },
    /// Matches exactly one source including its generation
    Exact(Source),
    /// Matches generations of one stream older than `before`. Used to clear
    /// out a previous connection's data when a peer reconnects.
    OlderGeneration {
        origin: Origin,
        name: String,
        before: u64,
    },
}

impl SourceMatcher {
    #[must_use]
    pub fn matches(&self, source: &Source) -> bool {
        match self {
            Self::Any => true,
            Self::Origin(origin) => source.origin == *origin,
            Self::Stream { origin, name } => source.origin == *origin && source.name == *name,
            Self::Exact(exact) => source == exact,
            Self::OlderGeneration {
                origin,
                name,
                before,
            } => source.origin == *origin && source.name == *name && source.generation < *before,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generations_are_monotonic() {
        let a = Source::local("node-a");
        let b = Source::local("node-a");
        assert!(b.generation > a.generation);
        assert!(a.same_stream(&b));
    }

    #[test]
    fn test_same_stream_ignores_generation() {
        let a = Source::with_generation(Origin::Replicated, "peer-1", 3);
        let b = Source::with_generation(Origin::Replicated, "peer-1", 9);
        let c = Source::with_generation(Origin::Replicated, "peer-2", 3);

        assert!(a.same_stream(&b));
        assert!(!a.same_stream(&c));
    }

    #[test]
    fn test_local_precedence_beats_replicated() {
        assert!(Origin::Local.precedence() > Origin::Replicated.precedence());
        assert_eq!(Origin::Replicated.precedence(), Origin::Bridge.precedence());
    }

    #[test]
    fn test_matcher_variants() {
        let source = Source::with_generation(Origin::Replicated, "peer-1", 5);

        assert!(SourceMatcher::Any.matches(&source));
        assert!(SourceMatcher::Origin(Origin::Replicated).matches(&source));
        assert!(!SourceMatcher::Origin(Origin::Local).matches(&source));
        assert!(SourceMatcher::Stream {
            origin: Origin::Replicated,
            name: "peer-1".to_string(),
        }
        .matches(&source));
        assert!(SourceMatcher::Exact(source.clone()).matches(&source));
        assert!(SourceMatcher::OlderGeneration {
            origin: Origin::Replicated,
            name: "peer-1".to_string(),
            before: 6,
        }
        .matches(&source));
        assert!(!SourceMatcher::OlderGeneration {
            origin: Origin::Replicated,
            name: "peer-1".to_string(),
            before: 5,
        }
        .matches(&source));
    }
}
