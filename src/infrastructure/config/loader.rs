//! Daemon settings loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::MonitorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid cycle interval: {0}. Must be at least 1 second")]
    InvalidCycleInterval(u64),

    #[error("invalid disk usage threshold: {0}. Must be between 0 and 100")]
    InvalidDiskThreshold(f64),

    #[error("invalid {name}: {value}")]
    InvalidEnvOverride { name: String, value: String },
}

/// Loads the daemon settings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `argus.yaml` in the working directory
    /// 3. Environment variables (`ARGUS_*` prefix)
    /// 4. The legacy threshold variables (`DEFAULT_DISK_USAGE_THRESHOLD`,
    ///    `EXPIRING_CERTIFICATE_WARN_DAYS`, `YELLOW_LAST_FAILURE_THRESHOLD`)
    pub fn load() -> Result<MonitorConfig> {
        Self::load_from(Figment::new().merge(Yaml::file("argus.yaml")))
    }

    /// Load from a specific settings file instead of the default path.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<MonitorConfig> {
        Self::load_from(Figment::new().merge(Yaml::file(path.as_ref())))
    }

    fn load_from(file_layer: Figment) -> Result<MonitorConfig> {
        let mut config: MonitorConfig = Figment::new()
            .merge(Serialized::defaults(MonitorConfig::default()))
            .merge(file_layer)
            .merge(Env::prefixed("ARGUS_").split("__"))
            .extract()
            .context("failed to extract configuration")?;

        Self::apply_legacy_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn apply_legacy_env(config: &mut MonitorConfig) -> Result<(), ConfigError> {
        fn read<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
            match std::env::var(name) {
                Ok(value) => value.parse().map(Some).map_err(|_| {
                    ConfigError::InvalidEnvOverride {
                        name: name.to_string(),
                        value,
                    }
                }),
                Err(_) => Ok(None),
            }
        }

        if let Some(threshold) = read::<f64>("DEFAULT_DISK_USAGE_THRESHOLD")? {
            config.thresholds.default_disk_usage_percent = threshold;
        }
        if let Some(days) = read::<i64>("EXPIRING_CERTIFICATE_WARN_DAYS")? {
            config.thresholds.certificate_warn_days = days;
        }
        if let Some(minutes) = read::<i64>("YELLOW_LAST_FAILURE_THRESHOLD")? {
            config.thresholds.recent_failure_minutes = minutes;
        }
        Ok(())
    }

    /// Validate configuration after loading; violations are fatal.
    pub fn validate(config: &MonitorConfig) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.checks.cycle_interval_secs == 0 {
            return Err(ConfigError::InvalidCycleInterval(
                config.checks.cycle_interval_secs,
            ));
        }

        let threshold = config.thresholds.default_disk_usage_percent;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::InvalidDiskThreshold(threshold));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.checks.cycle_interval_secs, 10);
        assert_eq!(config.thresholds.default_disk_usage_percent, 80.0);
        assert_eq!(config.thresholds.certificate_warn_days, 30);
        assert_eq!(config.thresholds.recent_failure_minutes, 60);
    }

    #[test]
    fn test_legacy_env_overrides() {
        temp_env::with_vars(
            [
                ("DEFAULT_DISK_USAGE_THRESHOLD", Some("90")),
                ("EXPIRING_CERTIFICATE_WARN_DAYS", Some("14")),
            ],
            || {
                let mut config = MonitorConfig::default();
                ConfigLoader::apply_legacy_env(&mut config).unwrap();
                assert_eq!(config.thresholds.default_disk_usage_percent, 90.0);
                assert_eq!(config.thresholds.certificate_warn_days, 14);
                assert_eq!(config.thresholds.recent_failure_minutes, 60);
            },
        );
    }

    #[test]
    fn test_unparseable_legacy_env_is_fatal() {
        temp_env::with_var("DEFAULT_DISK_USAGE_THRESHOLD", Some("lots"), || {
            let mut config = MonitorConfig::default();
            assert!(ConfigLoader::apply_legacy_env(&mut config).is_err());
        });
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = MonitorConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
