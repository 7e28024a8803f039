//! Peer replication for the Beacon registry.
//!
//! Each node streams its locally-owned registrations to every configured
//! peer and applies the streams it accepts, so any node can answer any query
//! with an eventually-consistent view. Sessions negotiate snapshot-vs-delta
//! at handshake and evict a peer's contributions when its session ends.

pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod service;
pub mod transport;

pub use error::{ClusterError, Result};
pub use protocol::{ChannelState, ReplicationMessage, StateHandle};
pub use receiver::ReplicationReceiver;
pub use sender::ReplicationSender;
pub use service::ReplicationService;
pub use transport::{link_pair, PeerConnector, ReplicationLink};
