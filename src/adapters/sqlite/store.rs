//! SQLite implementation of the time-series store.
//!
//! Status maps are stored as one JSON document per cycle; projections use
//! `json_extract` so that per-target series never deserialize whole
//! records.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AlarmSeverity, HealthState, HistoryEntry, ObjectKind, ObjectRef, RestartNotification,
    StatusRecord,
};
use crate::domain::ports::{MetricPoint, StatusPoint, StatusStore, LOG_QUERY_LIMIT};

/// Fixed-width UTC text form; lexicographic order equals chronological.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| DomainError::SerializationError(format!("bad timestamp {raw}: {err}")))
}

/// JSON path to a field of one target's entry, with the target name
/// quoted so that dashes and dots survive.
fn json_path(target: &str, tail: &str) -> String {
    let escaped = target.replace('"', "");
    format!("$.\"{escaped}\".{tail}")
}

#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn value_series(
        &self,
        kind: ObjectKind,
        path: String,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>> {
        let rows = sqlx::query(
            "SELECT timestamp, json_quote(json_extract(status, ?)) AS value
             FROM status_records
             WHERE kind = ? AND timestamp > ?
             ORDER BY timestamp ASC",
        )
        .bind(path)
        .bind(kind.as_str())
        .bind(encode_ts(since))
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp = decode_ts(&row.get::<String, _>("timestamp"))?;
            let value = row
                .get::<Option<String>, _>("value")
                .and_then(|raw| serde_json::from_str(&raw).ok());
            points.push(MetricPoint { timestamp, value });
        }
        Ok(points)
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn append_status(&self, kind: ObjectKind, record: &StatusRecord) -> DomainResult<()> {
        let status_json = serde_json::to_string(&record.status)?;
        sqlx::query("INSERT INTO status_records (kind, timestamp, status) VALUES (?, ?, ?)")
            .bind(kind.as_str())
            .bind(encode_ts(record.timestamp))
            .bind(status_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_status(&self, kind: ObjectKind) -> DomainResult<Option<StatusRecord>> {
        let row = sqlx::query(
            "SELECT timestamp, status FROM status_records
             WHERE kind = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let timestamp = decode_ts(&row.get::<String, _>("timestamp"))?;
                let status = serde_json::from_str(&row.get::<String, _>("status"))?;
                Ok(Some(StatusRecord { timestamp, status }))
            }
            None => Ok(None),
        }
    }

    async fn status_since(
        &self,
        kind: ObjectKind,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StatusRecord>> {
        let rows = sqlx::query(
            "SELECT timestamp, status FROM status_records
             WHERE kind = ? AND timestamp > ?
             ORDER BY timestamp ASC",
        )
        .bind(kind.as_str())
        .bind(encode_ts(since))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(StatusRecord {
                timestamp: decode_ts(&row.get::<String, _>("timestamp"))?,
                status: serde_json::from_str(&row.get::<String, _>("status"))?,
            });
        }
        Ok(records)
    }

    async fn status_series(
        &self,
        kind: ObjectKind,
        target: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<StatusPoint>> {
        let points = self
            .value_series(kind, json_path(target, "status"), since)
            .await?;
        Ok(points
            .into_iter()
            .map(|point| StatusPoint {
                timestamp: point.timestamp,
                status: point
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .and_then(HealthState::from_str),
            })
            .collect())
    }

    async fn stat_series(
        &self,
        kind: ObjectKind,
        target: &str,
        metric: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>> {
        let metric = metric.replace('"', "");
        self.value_series(kind, json_path(target, &format!("stats.\"{metric}\"")), since)
            .await
    }

    async fn user_defined_series(
        &self,
        kind: ObjectKind,
        target: &str,
        param: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<MetricPoint>> {
        let param = param.replace('"', "");
        self.value_series(
            kind,
            json_path(target, &format!("user_defined.\"{param}\"")),
            since,
        )
        .await
    }

    async fn append_history(&self, entry: &HistoryEntry) -> DomainResult<()> {
        sqlx::query("INSERT INTO history (timestamp, message, severity) VALUES (?, ?, ?)")
            .bind(encode_ts(entry.timestamp))
            .bind(&entry.message)
            .bind(entry.severity.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn history_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT timestamp, message, severity FROM history
             WHERE timestamp > ?
             ORDER BY timestamp DESC
             LIMIT ?",
        )
        .bind(encode_ts(since))
        .bind(i64::try_from(LOG_QUERY_LIMIT).unwrap_or(100))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(HistoryEntry {
                timestamp: decode_ts(&row.get::<String, _>("timestamp"))?,
                message: row.get("message"),
                severity: AlarmSeverity::from_str(&row.get::<String, _>("severity"))
                    .unwrap_or(AlarmSeverity::Info),
            });
        }
        Ok(entries)
    }

    async fn add_notification(&self, notification: &RestartNotification) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO restart_notifications
             (id, creation_time, affected_object, object_type, valid_from, valid_until)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(notification.id.to_string())
        .bind(encode_ts(notification.creation_time))
        .bind(&notification.object.name)
        .bind(notification.object.kind.as_str())
        .bind(encode_ts(notification.valid_from))
        .bind(encode_ts(notification.valid_until))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_covering_notification(
        &self,
        object: &ObjectRef,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM restart_notifications
             WHERE valid_from <= ? AND valid_until >= ?
               AND affected_object = ? AND object_type = ?",
        )
        .bind(encode_ts(at))
        .bind(encode_ts(at))
        .bind(&object.name)
        .bind(object.kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn notifications_since(
        &self,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<RestartNotification>> {
        let rows = sqlx::query(
            "SELECT id, creation_time, affected_object, object_type, valid_from, valid_until
             FROM restart_notifications
             WHERE creation_time > ?
             ORDER BY creation_time DESC
             LIMIT ?",
        )
        .bind(encode_ts(since))
        .bind(i64::try_from(LOG_QUERY_LIMIT).unwrap_or(100))
        .fetch_all(&self.pool)
        .await?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_raw: String = row.get("object_type");
            let kind = ObjectKind::from_str(&kind_raw).ok_or_else(|| {
                DomainError::SerializationError(format!("unknown object kind {kind_raw}"))
            })?;
            notifications.push(RestartNotification {
                id: Uuid::parse_str(&row.get::<String, _>("id"))
                    .map_err(|err| DomainError::SerializationError(err.to_string()))?,
                creation_time: decode_ts(&row.get::<String, _>("creation_time"))?,
                object: ObjectRef::new(kind, row.get::<String, _>("affected_object")),
                valid_from: decode_ts(&row.get::<String, _>("valid_from"))?,
                valid_until: decode_ts(&row.get::<String, _>("valid_until"))?,
            });
        }
        Ok(notifications)
    }
}
