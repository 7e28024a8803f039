use serde::{Deserialize, Serialize};

use super::instance::{Delta, InstanceInfo};
use super::source::Source;

/// Marks the boundaries of an atomically-applicable batch in a
/// notification stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    BufferStart,
    BufferEnd,
}

/// One change in the registry's winning view, as observed by subscribers.
///
/// Data variants carry the source whose contribution produced the new view;
/// replication uses it to forward only locally-owned changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeNotification {
    Add {
        instance: InstanceInfo,
        source: Source,
    },
    Modify {
        instance: InstanceInfo,
        deltas: Vec<Delta>,
        source: Source,
    },
    Delete {
        instance: InstanceInfo,
        source: Source,
    },
    BufferSentinel(BufferState),
}

impl ChangeNotification {
    /// Short name of the notification kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Modify { .. } => "modify",
            Self::Delete { .. } => "delete",
            Self::BufferSentinel(BufferState::BufferStart) => "buffer_start",
            Self::BufferSentinel(BufferState::BufferEnd) => "buffer_end",
        }
    }

    /// The instance this notification is about, if it carries data
    #[must_use]
    pub const fn instance(&self) -> Option<&InstanceInfo> {
        match self {
            Self::Add { instance, .. }
            | Self::Modify { instance, .. }
            | Self::Delete { instance, .. } => Some(instance),
            Self::BufferSentinel(_) => None,
        }
    }

    /// The source that produced this change, if it carries data
    #[must_use]
    pub const fn source(&self) -> Option<&Source> {
        match self {
            Self::Add { source, .. }
            | Self::Modify { source, .. }
            | Self::Delete { source, .. } => Some(source),
            Self::BufferSentinel(_) => None,
        }
    }

    #[must_use]
    pub const fn is_data(&self) -> bool {
        !matches!(self, Self::BufferSentinel(_))
    }

    #[must_use]
    pub const fn is_buffer_start(&self) -> bool {
        matches!(self, Self::BufferSentinel(BufferState::BufferStart))
    }

    #[must_use]
    pub const fn is_buffer_end(&self) -> bool {
        matches!(self, Self::BufferSentinel(BufferState::BufferEnd))
    }
}

/// Fence a batch with buffer sentinels.
///
/// Groups of two or more notifications must be applied atomically by
/// consumers, so they are wrapped in a start/end pair. A single notification
/// is emitted bare, and an empty batch stays empty.
#[must_use]
pub fn buffered(batch: Vec<ChangeNotification>) -> Vec<ChangeNotification> {
    if batch.len() < 2 {
        return batch;
    }
    let mut fenced = Vec::with_capacity(batch.len() + 2);
    fenced.push(ChangeNotification::BufferSentinel(BufferState::BufferStart));
    fenced.extend(batch);
    fenced.push(ChangeNotification::BufferSentinel(BufferState::BufferEnd));
    fenced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instance::InstanceStatus;

    fn add(id: &str) -> ChangeNotification {
        ChangeNotification::Add {
            instance: InstanceInfo::builder(id)
                .app("app")
                .status(InstanceStatus::Up)
                .build(),
            source: Source::local("node-a"),
        }
    }

    #[test]
    fn test_buffered_wraps_two_or_more() {
        let fenced = buffered(vec![add("a"), add("b")]);
        assert_eq!(fenced.len(), 4);
        assert!(fenced[0].is_buffer_start());
        assert!(fenced[3].is_buffer_end());
    }

    #[test]
    fn test_buffered_leaves_single_bare() {
        let fenced = buffered(vec![add("a")]);
        assert_eq!(fenced.len(), 1);
        assert!(fenced[0].is_data());
    }

    #[test]
    fn test_buffered_empty_is_empty() {
        assert!(buffered(Vec::new()).is_empty());
    }

    #[test]
    fn test_notification_serialization() {
        let note = add("i-1");
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("\"kind\":\"add\""));

        let back: ChangeNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, note);
    }
}
