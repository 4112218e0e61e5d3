//! Daemon configuration, built once at startup and passed around immutably.

use serde::{Deserialize, Serialize};

/// Main configuration structure for the monitor daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Database configuration for the time-series store.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Check scheduling configuration.
    #[serde(default)]
    pub checks: CheckConfig,

    /// Alert thresholds.
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Managed-bean query agent assets.
    #[serde(default)]
    pub jmx_agent: JmxAgentConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            checks: CheckConfig::default(),
            thresholds: ThresholdConfig::default(),
            jmx_agent: JmxAgentConfig::default(),
        }
    }
}

/// Time-series database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Whether the time-series store is enabled at all. When disabled the
    /// checkers still run but nothing is persisted.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

const fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    "argus.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json or pretty.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// When set, logs also rotate daily into this directory.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

/// Scheduling knobs of the checking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckConfig {
    /// Pause between checker cycles, in seconds.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Default repeat interval of an individual check, in seconds.
    #[serde(default = "default_repeat_interval")]
    pub repeat_interval_secs: u64,

    /// Minimum pause before an unchanged alarm is sent again, in seconds.
    #[serde(default = "default_resend_threshold")]
    pub resend_threshold_secs: u64,

    /// Minimum pause between image registry scans, in minutes.
    #[serde(default = "default_repo_scan_interval")]
    pub repo_scan_interval_minutes: u64,
}

const fn default_cycle_interval() -> u64 {
    10
}

const fn default_repeat_interval() -> u64 {
    60
}

const fn default_resend_threshold() -> u64 {
    600
}

const fn default_repo_scan_interval() -> u64 {
    10
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            repeat_interval_secs: default_repeat_interval(),
            resend_threshold_secs: default_resend_threshold(),
            repo_scan_interval_minutes: default_repo_scan_interval(),
        }
    }
}

/// Alert thresholds, overridable through the legacy environment variables
/// `DEFAULT_DISK_USAGE_THRESHOLD`, `EXPIRING_CERTIFICATE_WARN_DAYS` and
/// `YELLOW_LAST_FAILURE_THRESHOLD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThresholdConfig {
    /// Environment-wide disk usage threshold, in percent.
    #[serde(default = "default_disk_usage")]
    pub default_disk_usage_percent: f64,

    /// Warn when a certificate expires within this many days.
    #[serde(default = "default_cert_warn_days")]
    pub certificate_warn_days: i64,

    /// Highlight targets that failed within this many minutes.
    #[serde(default = "default_recent_failure")]
    pub recent_failure_minutes: i64,
}

const fn default_disk_usage() -> f64 {
    80.0
}

const fn default_cert_warn_days() -> i64 {
    30
}

const fn default_recent_failure() -> i64 {
    60
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            default_disk_usage_percent: default_disk_usage(),
            certificate_warn_days: default_cert_warn_days(),
            recent_failure_minutes: default_recent_failure(),
        }
    }
}

/// Locations of the managed-bean query agent build assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JmxAgentConfig {
    /// Dockerfile of the agent image.
    #[serde(default = "default_agent_dockerfile")]
    pub dockerfile: String,

    /// Query agent jar copied into the image and executed via `java -jar`.
    #[serde(default = "default_agent_jar")]
    pub jar: String,
}

fn default_agent_dockerfile() -> String {
    "agent/Dockerfile".to_string()
}

fn default_agent_jar() -> String {
    "agent/JMXQuery-0.1.8.jar".to_string()
}

impl Default for JmxAgentConfig {
    fn default() -> Self {
        Self {
            dockerfile: default_agent_dockerfile(),
            jar: default_agent_jar(),
        }
    }
}
