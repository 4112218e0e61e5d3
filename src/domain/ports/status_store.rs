//! Time-series store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    HealthState, HistoryEntry, ObjectKind, ObjectRef, RestartNotification, StatusRecord,
};

/// Maximum number of entries returned by log-style queries.
pub const LOG_QUERY_LIMIT: usize = 100;

/// One point of a projected status series.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPoint {
    pub timestamp: DateTime<Utc>,
    pub status: Option<HealthState>,
}

/// One point of a projected metric series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<serde_json::Value>,
}

/// Append-only persistence for status records, the alarm history and
/// restart notifications.
///
/// Records are keyed by a descending timestamp index per collection and
/// are never mutated.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Append one status record to the collection of `kind`.
    async fn append_status(&self, kind: ObjectKind, record: &StatusRecord) -> DomainResult<()>;

    /// Most recent status record of `kind`, used for warm-starting the
    /// in-memory status view on process restart.
    async fn latest_status(&self, kind: ObjectKind) -> DomainResult<Option<StatusRecord>>;

    /// All records of `kind` with `timestamp > since`, oldest first.
    async fn status_since(
        &self,
        kind: ObjectKind,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StatusRecord>>;

    /// Projection of one target's aggregate status over time.
    async fn status_series(
        &self,
        kind: ObjectKind,
        target: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StatusPoint>>;

    /// Projection of one target's metric (`stats.<metric>`) over time.
    async fn stat_series(
        &self,
        kind: ObjectKind,
        target: &str,
        metric: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>>;

    /// Projection of one user-defined managed-bean value over time.
    async fn user_defined_series(
        &self,
        kind: ObjectKind,
        target: &str,
        param: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>>;

    /// Append one line to the alarm history.
    async fn append_history(&self, entry: &HistoryEntry) -> DomainResult<()>;

    /// Alarm history with `timestamp > since`, newest first, bounded to
    /// [`LOG_QUERY_LIMIT`] entries.
    async fn history_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<HistoryEntry>>;

    /// Persist one restart notification.
    async fn add_notification(&self, notification: &RestartNotification) -> DomainResult<()>;

    /// Whether at least one stored notification covers `object` at `at`.
    async fn has_covering_notification(
        &self,
        object: &ObjectRef,
        at: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Notifications created after `since`, newest first, bounded to
    /// [`LOG_QUERY_LIMIT`] entries.
    async fn notifications_since(
        &self,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<RestartNotification>>;
}

/// No-op store used when the time-series database is disabled.
#[derive(Debug, Default)]
pub struct NullStatusStore;

#[async_trait]
impl StatusStore for NullStatusStore {
    async fn append_status(&self, _kind: ObjectKind, _record: &StatusRecord) -> DomainResult<()> {
        Ok(())
    }

    async fn latest_status(&self, _kind: ObjectKind) -> DomainResult<Option<StatusRecord>> {
        Ok(None)
    }

    async fn status_since(
        &self,
        _kind: ObjectKind,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<StatusRecord>> {
        Ok(vec![])
    }

    async fn status_series(
        &self,
        _kind: ObjectKind,
        _target: &str,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<StatusPoint>> {
        Ok(vec![])
    }

    async fn stat_series(
        &self,
        _kind: ObjectKind,
        _target: &str,
        _metric: &str,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>> {
        Ok(vec![])
    }

    async fn user_defined_series(
        &self,
        _kind: ObjectKind,
        _target: &str,
        _param: &str,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>> {
        Ok(vec![])
    }

    async fn append_history(&self, _entry: &HistoryEntry) -> DomainResult<()> {
        Ok(())
    }

    async fn history_since(&self, _since: DateTime<Utc>) -> DomainResult<Vec<HistoryEntry>> {
        Ok(vec![])
    }

    async fn add_notification(&self, _notification: &RestartNotification) -> DomainResult<()> {
        Ok(())
    }

    async fn has_covering_notification(
        &self,
        _object: &ObjectRef,
        _at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        Ok(false)
    }

    async fn notifications_since(
        &self,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<RestartNotification>> {
        Ok(vec![])
    }
}
