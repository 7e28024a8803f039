use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub replication: ReplicationConfig,
    pub logging: LoggingConfig,
}

/// Registry, lease, and eviction tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Lease validity window; a lease not renewed within this window expires
    pub lease_duration_ms: u64,
    /// Grace period between lease expiry and eligibility for eviction.
    /// A second, system-wide circuit breaker on top of the lease timeout.
    pub eviction_timeout_ms: u64,
    /// How often the lease sweeper looks for expired leases
    pub eviction_sweep_interval_ms: u64,
    /// Re-poll interval of the eviction drain while quota is exhausted
    pub eviction_poll_interval_ms: u64,
    /// Maximum notifications buffered per interest subscriber before the
    /// oldest batch is dropped
    pub subscriber_queue_capacity: usize,
    /// Fraction of expected heartbeat renewals that must be observed per
    /// window for evictions to be allowed
    pub renewal_threshold: f64,
    /// Length of the renewal observation window
    pub renewal_window_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: 90_000,
            eviction_timeout_ms: 30_000,
            eviction_sweep_interval_ms: 5_000,
            eviction_poll_interval_ms: 1_000,
            subscriber_queue_capacity: 4_096,
            renewal_threshold: 0.85,
            renewal_window_ms: 60_000,
        }
    }
}

/// Peer replication tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Peer node identifiers to replicate to
    pub peers: Vec<String>,
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeats before the connection is considered failed
    pub heartbeat_miss_threshold: u32,
    pub reconnect_delay_ms: u64,
    /// How long the handshake may take before the channel is abandoned
    pub handshake_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            heartbeat_interval_ms: 5_000,
            heartbeat_miss_threshold: 3,
            reconnect_delay_ms: 5_000,
            handshake_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (BEACON_REGISTRY_LEASE_DURATION_MS, etc.)
        builder = builder.add_source(
            Environment::with_prefix("BEACON")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry.lease_duration_ms, 90_000);
        assert_eq!(config.replication.heartbeat_miss_threshold, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.registry.eviction_sweep_interval_ms, 5_000);
    }
}
