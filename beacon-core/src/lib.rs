//! Core of the Beacon service registry.
//!
//! Instances register and lease their presence with heartbeats; subscribers
//! receive live, incrementally-updated views filtered by an interest
//! predicate. The store accepts contributions from multiple sources (local
//! clients, replication peers) and resolves one winning view per instance.

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod interest;
pub mod logging;
pub mod models;
pub mod registry;

pub use channel::{InterestChannel, RegistrationChannel};
pub use config::Config;
pub use error::{Error, Result};
pub use interest::{InterestSubscription, NotificationRouter};
pub use registry::{EvictionController, InstanceUpdate, RegistryStore};
