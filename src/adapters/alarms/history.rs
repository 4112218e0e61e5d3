//! Alarm sink that records every alarm in the persistent history log.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::models::{AlarmSeverity, HistoryEntry};
use crate::domain::ports::{AlarmSink, StatusStore};

/// Writes alarms into the time-series store's history collection.
///
/// Like every sink, delivery is best-effort: storage errors are logged
/// and swallowed so that later sinks still receive the message.
pub struct HistoryAlarmSink {
    store: Arc<dyn StatusStore>,
}

impl HistoryAlarmSink {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlarmSink for HistoryAlarmSink {
    async fn push(&self, message: &str, severity: AlarmSeverity) {
        let entry = HistoryEntry::new(message, severity);
        if let Err(err) = self.store.append_history(&entry).await {
            tracing::error!(error = %err, "failed to record alarm in history");
        }
    }
}
