//! Logical replication message contract and channel lifecycle states

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use beacon_core::models::{BufferState, ChangeNotification, Delta, InstanceInfo, Source};

/// Messages exchanged between replication peers.
///
/// This is the logical contract; wire framing belongs to the transport
/// carrying the link and is not defined here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationMessage {
    /// Opens a session: the sender's identity and how many instances it owns
    Hello { source: Source, registry_size: usize },
    /// Handshake reply; `send_snapshot` asks the peer for a full resync
    HelloReply { source: Source, send_snapshot: bool },
    Heartbeat,
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
    BufferStart,
    BufferEnd,
}

impl ReplicationMessage {
    /// Convert a registry change into its replication framing
    #[must_use]
    pub fn from_notification(notification: ChangeNotification) -> Self {
        match notification {
            ChangeNotification::Add { instance, source } => Self::Add { instance, source },
            ChangeNotification::Modify {
                instance,
                deltas,
                source,
            } => Self::Modify {
                instance,
                deltas,
                source,
            },
            ChangeNotification::Delete { instance, source } => Self::Delete { instance, source },
            ChangeNotification::BufferSentinel(BufferState::BufferStart) => Self::BufferStart,
            ChangeNotification::BufferSentinel(BufferState::BufferEnd) => Self::BufferEnd,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::HelloReply { .. } => "hello_reply",
            Self::Heartbeat => "heartbeat",
            Self::Add { .. } => "add",
            Self::Modify { .. } => "modify",
            Self::Delete { .. } => "delete",
            Self::BufferStart => "buffer_start",
            Self::BufferEnd => "buffer_end",
        }
    }
}

/// Lifecycle of one replication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    HandshakeSent,
    Active,
    Closed,
}

impl ChannelState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::HandshakeSent => 1,
            Self::Active => 2,
            Self::Closed => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::HandshakeSent,
            2 => Self::Active,
            3 => Self::Closed,
            _ => Self::Idle,
        }
    }
}

/// Shared observer of a channel's state. `Closed` is terminal; setting it
/// twice is harmless and later transitions are ignored.
#[derive(Debug, Clone)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ChannelState::Idle.as_u8())))
    }

    #[must_use]
    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ChannelState) {
        let closed = ChannelState::Closed.as_u8();
        if self.0.load(Ordering::Acquire) == closed {
            return;
        }
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::models::InstanceStatus;

    #[test]
    fn test_message_serialization_tagged() {
        let message = ReplicationMessage::Hello {
            source: Source::local("node-a"),
            registry_size: 3,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"hello\""));

        let back: ReplicationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_notification_conversion() {
        let note = ChangeNotification::Add {
            instance: InstanceInfo::builder("i-1")
                .app("app")
                .status(InstanceStatus::Up)
                .build(),
            source: Source::local("node-a"),
        };
        assert_eq!(ReplicationMessage::from_notification(note).kind(), "add");
        assert_eq!(
            ReplicationMessage::from_notification(ChangeNotification::BufferSentinel(
                BufferState::BufferStart
            )),
            ReplicationMessage::BufferStart
        );
    }

    #[test]
    fn test_closed_state_is_terminal() {
        let state = StateHandle::new();
        state.set(ChannelState::HandshakeSent);
        assert_eq!(state.get(), ChannelState::HandshakeSent);
        state.set(ChannelState::Closed);
        state.set(ChannelState::Active);
        assert_eq!(state.get(), ChannelState::Closed);
    }
}
