//! Status records, runtime statistics and per-checker inventories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::check::HealthState;

/// Disk usage of one mount point, as reported by a probe or a host agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    /// `None` when the total size is zero (pseudo-filesystems).
    pub usage_percentage: Option<f64>,
}

impl DiskUsage {
    pub fn new(mount_point: impl Into<String>, total_bytes: u64, used_bytes: u64) -> Self {
        let usage_percentage = if total_bytes > 0 {
            #[allow(clippy::cast_precision_loss)]
            Some(100.0 * used_bytes as f64 / total_bytes as f64)
        } else {
            None
        };
        Self {
            mount_point: mount_point.into(),
            total_bytes,
            used_bytes,
            usage_percentage,
        }
    }
}

/// Runtime statistics gathered for one target each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub cpu_usage_percent: Option<f64>,
    pub memory_usage_bytes: Option<u64>,
    pub memory_available_bytes: Option<u64>,
    pub memory_usage_percent: Option<f64>,
    pub pids: Option<u64>,
    pub network_received_bytes: Option<u64>,
    pub network_sent_bytes: Option<u64>,
    pub blkio_written_bytes: Option<u64>,
    pub blkio_read_bytes: Option<u64>,
    pub uptime_seconds: Option<f64>,
    #[serde(default)]
    pub disk_usage: Vec<DiskUsage>,
}

/// Last-known state of one target as published to the outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Free-form metric map; shape depends on the checker family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_update_available: Option<bool>,
    /// User-defined managed-bean values, keyed by configured alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_defined: Option<serde_json::Value>,
}

impl TargetStatus {
    pub fn ok() -> Self {
        Self {
            status: HealthState::Ok,
            friendly_name: None,
            desc: None,
            panel: None,
            src: None,
            stats: None,
            last_failure: None,
            update_available: None,
            src_update_available: None,
            user_defined: None,
        }
    }
}

/// One time-series record: the full status map of a checker at one instant.
///
/// Records are append-only and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub timestamp: DateTime<Utc>,
    pub status: HashMap<String, TargetStatus>,
}

/// Previous-cycle observation of a container, used for transition detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub name: String,
    pub short_id: String,
    pub status: String,
    pub created: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: i64,
    pub env: Vec<String>,
    pub networks: Vec<String>,
    pub stats: RuntimeStats,
    pub update_available: Option<bool>,
    pub src_update_available: Option<bool>,
}

/// Previous-cycle observation of a managed-bean service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JmxDescriptor {
    pub started_at: Option<DateTime<Utc>>,
    pub stats: BTreeMap<String, serde_json::Value>,
    pub user_defined: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_usage_percentage() {
        let du = DiskUsage::new("/", 1000, 250);
        assert_eq!(du.usage_percentage, Some(25.0));
    }

    #[test]
    fn test_disk_usage_zero_total_has_no_percentage() {
        let du = DiskUsage::new("/proc", 0, 0);
        assert_eq!(du.usage_percentage, None);
    }
}
