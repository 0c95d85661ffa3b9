//! Layered configuration loading: defaults -> YAML file -> environment.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("quarantine_threshold must be in [0, 100], got {0}")]
    InvalidQuarantineThreshold(u8),

    #[error("heartbeat_timeout_sec must be positive, got {0}")]
    InvalidHeartbeatTimeout(u64),

    #[error("verify_interval_sec must be positive, got {0}")]
    InvalidVerifyInterval(u64),

    #[error("queue_depth_warn ({warn}) must be less than queue_depth_critical ({critical})")]
    InvalidQueueDepthOrdering { warn: usize, critical: usize },

    #[error("default_queue_capacity must be positive, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("failed to extract configuration: {0}")]
    Extraction(#[from] figment::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults.
    /// 2. `orchestrator.yaml` in the working directory, if present.
    /// 3. The eight bare environment variables named in the external
    ///    interface (`HEARTBEAT_TIMEOUT_SEC`, ...), unprefixed because
    ///    they are part of the stable external contract.
    /// 4. `ORCHESTRATOR_`-prefixed environment variables for everything
    ///    else (log format, config file path overrides).
    pub fn load() -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("orchestrator.yaml"))
            .merge(Env::raw().only(&[
                "HEARTBEAT_TIMEOUT_SEC",
                "QUARANTINE_THRESHOLD",
                "STORM_THRESHOLD_EPS",
                "CIRCUIT_BREAKER_EPS_10S",
                "CIRCUIT_COOLDOWN_SEC",
                "QUEUE_DEPTH_WARN",
                "QUEUE_DEPTH_CRITICAL",
                "VERIFY_INTERVAL_SEC",
            ]))
            .merge(Env::prefixed("ORCHESTRATOR_").split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.quarantine_threshold > 100 {
            return Err(ConfigError::InvalidQuarantineThreshold(
                config.quarantine_threshold,
            ));
        }
        if config.heartbeat_timeout_sec == 0 {
            return Err(ConfigError::InvalidHeartbeatTimeout(
                config.heartbeat_timeout_sec,
            ));
        }
        if config.verify_interval_sec == 0 {
            return Err(ConfigError::InvalidVerifyInterval(
                config.verify_interval_sec,
            ));
        }
        if config.queue_depth_warn >= config.queue_depth_critical {
            return Err(ConfigError::InvalidQueueDepthOrdering {
                warn: config.queue_depth_warn,
                critical: config.queue_depth_critical,
            });
        }
        if config.default_queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(
                config.default_queue_capacity,
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        Ok(())
    }
}
