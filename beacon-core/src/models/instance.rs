use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Instance ID type (stable identity assigned by the registering client)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    OutOfService,
    Unknown,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A named service port exposed by an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    pub secure: bool,
}

impl ServicePort {
    #[must_use]
    pub const fn new(port: u16, secure: bool) -> Self {
        Self { port, secure }
    }
}

/// Where an instance is deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataCenterInfo {
    Basic {
        name: String,
        address: Option<String>,
    },
    Aws {
        region: String,
        zone: String,
        instance_id: String,
        public_address: Option<String>,
        private_address: Option<String>,
    },
}

impl Default for DataCenterInfo {
    fn default() -> Self {
        Self::Basic {
            name: "default".to_string(),
            address: None,
        }
    }
}

/// Immutable snapshot of a registered instance.
///
/// `version` increases monotonically with every accepted write for this
/// instance id, including no-op re-registrations, so replication peers can
/// detect convergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub app: String,
    pub vip_address: Option<String>,
    pub status: InstanceStatus,
    pub ports: BTreeSet<ServicePort>,
    pub data_center: DataCenterInfo,
    pub metadata: BTreeMap<String, String>,
    pub version: u64,
}

impl InstanceInfo {
    /// Start building an instance record for the given id
    #[must_use]
    pub fn builder(id: impl Into<InstanceId>) -> InstanceInfoBuilder {
        InstanceInfoBuilder {
            id: id.into(),
            app: String::new(),
            vip_address: None,
            status: InstanceStatus::default(),
            ports: BTreeSet::new(),
            data_center: DataCenterInfo::default(),
            metadata: BTreeMap::new(),
            version: 0,
        }
    }

    /// Re-open this record as a builder, e.g. to apply a delta
    #[must_use]
    pub fn to_builder(&self) -> InstanceInfoBuilder {
        InstanceInfoBuilder {
            id: self.id.clone(),
            app: self.app.clone(),
            vip_address: self.vip_address.clone(),
            status: self.status,
            ports: self.ports.clone(),
            data_center: self.data_center.clone(),
            metadata: self.metadata.clone(),
            version: self.version,
        }
    }

    /// Equality ignoring the version counter. Used to detect idempotent
    /// re-registrations that must not produce a notification.
    #[must_use]
    pub fn same_data(&self, other: &Self) -> bool {
        self.id == other.id
            && self.app == other.app
            && self.vip_address == other.vip_address
            && self.status == other.status
            && self.ports == other.ports
            && self.data_center == other.data_center
            && self.metadata == other.metadata
    }
}

/// Builder for [`InstanceInfo`]
#[derive(Debug, Clone)]
pub struct InstanceInfoBuilder {
    id: InstanceId,
    app: String,
    vip_address: Option<String>,
    status: InstanceStatus,
    ports: BTreeSet<ServicePort>,
    data_center: DataCenterInfo,
    metadata: BTreeMap<String, String>,
    version: u64,
}

impl InstanceInfoBuilder {
    #[must_use]
    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    #[must_use]
    pub fn vip_address(mut self, vip: impl Into<String>) -> Self {
        self.vip_address = Some(vip.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn port(mut self, port: ServicePort) -> Self {
        self.ports.insert(port);
        self
    }

    #[must_use]
    pub fn ports(mut self, ports: impl IntoIterator<Item = ServicePort>) -> Self {
        self.ports = ports.into_iter().collect();
        self
    }

    #[must_use]
    pub fn data_center(mut self, data_center: DataCenterInfo) -> Self {
        self.data_center = data_center;
        self
    }

    #[must_use]
    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Apply a single field delta, leaving unrelated fields untouched
    #[must_use]
    pub fn apply(mut self, delta: &Delta) -> Self {
        match delta {
            Delta::Status { value } => self.status = *value,
            Delta::Ports { value } => self.ports = value.clone(),
            Delta::VipAddress { value } => self.vip_address = value.clone(),
            Delta::Metadata { value } => self.metadata = value.clone(),
        }
        self
    }

    /// Apply a sequence of deltas in order
    #[must_use]
    pub fn apply_all<'a>(mut self, deltas: impl IntoIterator<Item = &'a Delta>) -> Self {
        for delta in deltas {
            self = self.apply(delta);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            app: self.app,
            vip_address: self.vip_address,
            status: self.status,
            ports: self.ports,
            data_center: self.data_center,
            metadata: self.metadata,
            version: self.version,
        }
    }
}

/// A single-field change to an instance record.
///
/// Deltas are explicit, versioned structs; there is no reflection-driven
/// field marshalling anywhere in the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum Delta {
    Status { value: InstanceStatus },
    Ports { value: BTreeSet<ServicePort> },
    VipAddress { value: Option<String> },
    Metadata { value: BTreeMap<String, String> },
}

impl Delta {
    /// Name of the field this delta touches
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Ports { .. } => "ports",
            Self::VipAddress { .. } => "vip_address",
            Self::Metadata { .. } => "metadata",
        }
    }
}

/// Compute the field deltas that turn `old` into `new`.
///
/// Only mutable fields participate; identity fields (id, app, data center)
/// changing means the caller should re-register instead.
#[must_use]
pub fn diff(old: &InstanceInfo, new: &InstanceInfo) -> Vec<Delta> {
    let mut deltas = Vec::new();
    if old.status != new.status {
        deltas.push(Delta::Status { value: new.status });
    }
    if old.ports != new.ports {
        deltas.push(Delta::Ports {
            value: new.ports.clone(),
        });
    }
    if old.vip_address != new.vip_address {
        deltas.push(Delta::VipAddress {
            value: new.vip_address.clone(),
        });
    }
    if old.metadata != new.metadata {
        deltas.push(Delta::Metadata {
            value: new.metadata.clone(),
        });
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_instance() -> InstanceInfo {
        InstanceInfo::builder("inst-1")
            .app("billing")
            .vip_address("billing.internal")
            .status(InstanceStatus::Up)
            .port(ServicePort::new(8080, false))
            .build()
    }

    #[test]
    fn test_builder_round_trip() {
        let info = base_instance();
        assert_eq!(info.id.as_str(), "inst-1");
        assert_eq!(info.app, "billing");
        assert_eq!(info.status, InstanceStatus::Up);

        let copy = info.to_builder().build();
        assert_eq!(info, copy);
    }

    #[test]
    fn test_delta_applies_single_field() {
        let info = base_instance();
        let updated = info
            .to_builder()
            .apply(&Delta::Status {
                value: InstanceStatus::Down,
            })
            .build();

        assert_eq!(updated.status, InstanceStatus::Down);
        assert_eq!(updated.app, info.app);
        assert_eq!(updated.ports, info.ports);
        assert_eq!(updated.vip_address, info.vip_address);
    }

    #[test]
    fn test_diff_detects_changed_fields() {
        let old = base_instance();
        let new = old
            .to_builder()
            .status(InstanceStatus::OutOfService)
            .metadata_entry("weight", "0")
            .build();

        let deltas = diff(&old, &new);
        let fields: Vec<_> = deltas.iter().map(Delta::field).collect();
        assert_eq!(fields, vec!["status", "metadata"]);
    }

    #[test]
    fn test_diff_empty_for_identical() {
        let old = base_instance();
        let new = old.to_builder().version(7).build();
        assert!(diff(&old, &new).is_empty());
        assert!(old.same_data(&new));
        assert_ne!(old, new);
    }

    #[test]
    fn test_delta_serialization_tagged() {
        let delta = Delta::Status {
            value: InstanceStatus::Down,
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"field\":\"status\""));

        let back: Delta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, delta);
    }
}
