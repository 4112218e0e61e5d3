//! Embedded schema migrations for the time-series store.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to execute migration {version}: {source}")]
    ExecutionError {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// The full schema, applied in order on startup.
pub fn embedded_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "status records, history log and restart notifications",
        sql: r"
            CREATE TABLE IF NOT EXISTS status_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_status_records_kind_ts
                ON status_records (kind, timestamp DESC);

            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                message TEXT NOT NULL,
                severity TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_ts ON history (timestamp DESC);

            CREATE TABLE IF NOT EXISTS restart_notifications (
                id TEXT PRIMARY KEY,
                creation_time TEXT NOT NULL,
                affected_object TEXT NOT NULL,
                object_type TEXT NOT NULL,
                valid_from TEXT NOT NULL,
                valid_until TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_restart_notifications_window
                ON restart_notifications
                (valid_from DESC, valid_until DESC, affected_object ASC, object_type ASC);
            CREATE INDEX IF NOT EXISTS idx_restart_notifications_created
                ON restart_notifications (creation_time DESC);
        ",
    }]
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply all pending embedded migrations; returns how many ran.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current = self.current_version().await?;
        let pending: Vec<_> = embedded_migrations()
            .into_iter()
            .filter(|m| m.version > current)
            .collect();

        for migration in &pending {
            sqlx::raw_sql(migration.sql)
                .execute(&self.pool)
                .await
                .map_err(|source| MigrationError::ExecutionError {
                    version: migration.version,
                    source,
                })?;
            sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
                .bind(migration.version)
                .bind(migration.description)
                .execute(&self.pool)
                .await
                .map_err(|source| MigrationError::ExecutionError {
                    version: migration.version,
                    source,
                })?;
            tracing::info!(version = migration.version, "applied migration");
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|source| MigrationError::ExecutionError { version: 0, source })?;
        Ok(())
    }

    async fn current_version(&self) -> Result<i64, MigrationError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await
                .map_err(MigrationError::VersionCheckError)?;
        Ok(version.unwrap_or(0))
    }
}
