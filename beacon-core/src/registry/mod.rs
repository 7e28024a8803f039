// Module: registry

pub mod eviction;
pub mod holder;
pub mod lease;
pub mod preservation;
pub mod store;

pub use eviction::{EvictionItem, EvictionQueue, EvictionStream};
pub use holder::{HolderChange, InstanceHolder, SourcedEntry};
pub use lease::{Lease, DEFAULT_LEASE_DURATION_MS};
pub use preservation::EvictionController;
pub use store::{InstanceUpdate, RegistryStore};
