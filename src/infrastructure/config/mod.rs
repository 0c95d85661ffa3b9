//! Configuration management infrastructure.
//!
//! Hierarchical configuration using figment: compiled-in defaults,
//! an optional YAML file, then environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};

use serde::{Deserialize, Serialize};

use crate::infrastructure::logging::LogConfig;

/// Top-level process configuration.
///
/// The eight fields below mirror the environment variables named in
/// the external interface exactly; everything else is project
/// configuration with no external stability guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub heartbeat_timeout_sec: u64,
    pub quarantine_threshold: u8,
    pub storm_threshold_eps: u32,
    pub circuit_breaker_eps_10s: u32,
    pub circuit_cooldown_sec: u64,
    pub queue_depth_warn: usize,
    pub queue_depth_critical: usize,
    pub verify_interval_sec: u64,

    pub default_queue_capacity: usize,
    pub trust_increase_rate: u8,
    pub trust_decrease_rate: u8,
    pub heartbeat_check_interval_sec: u64,
    pub cascade_depth_limit: usize,
    pub min_htm_workers: usize,
    pub scheduler_heartbeat_timeout_sec: u64,
    pub layer2_check_interval_sec: u64,

    pub log_path: Option<std::path::PathBuf>,
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_timeout_sec: 60,
            quarantine_threshold: 30,
            storm_threshold_eps: 100,
            circuit_breaker_eps_10s: 500,
            circuit_cooldown_sec: 60,
            queue_depth_warn: 500,
            queue_depth_critical: 2000,
            verify_interval_sec: 60,

            default_queue_capacity: 1024,
            trust_increase_rate: 5,
            trust_decrease_rate: 10,
            heartbeat_check_interval_sec: 30,
            cascade_depth_limit: 10,
            min_htm_workers: 3,
            scheduler_heartbeat_timeout_sec: 30,
            layer2_check_interval_sec: 15,

            log_path: None,
            logging: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.heartbeat_timeout_sec, 60);
        assert_eq!(config.quarantine_threshold, 30);
        assert_eq!(config.storm_threshold_eps, 100);
        assert_eq!(config.circuit_breaker_eps_10s, 500);
        assert_eq!(config.circuit_cooldown_sec, 60);
        assert_eq!(config.queue_depth_warn, 500);
        assert_eq!(config.queue_depth_critical, 2000);
        assert_eq!(config.verify_interval_sec, 60);
    }
}
