//! Alarm severities and the persistent history log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity attached to every alarm message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSeverity {
    Info,
    Warning,
    Alarm,
}

impl AlarmSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Alarm => "alarm",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "alarm" => Some(Self::Alarm),
            _ => None,
        }
    }
}

/// One line of the human-readable alarm history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: AlarmSeverity,
}

impl HistoryEntry {
    pub fn new(message: impl Into<String>, severity: AlarmSeverity) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
        }
    }
}
