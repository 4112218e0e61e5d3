//! Checker port: one family of checks run together against one class of
//! targets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ObjectKind, StatusRecord, TargetStatus};

/// Read view of a checker's published status, shared with the API surface.
///
/// The owning worker replaces entries under a write lock held only for the
/// duration of the swap; readers accept eventually-consistent snapshots.
pub type StatusView = Arc<RwLock<HashMap<String, TargetStatus>>>;

/// A family of checks run periodically against one class of targets.
#[async_trait]
pub trait Checker: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// The class of objects this checker observes.
    fn kind(&self) -> ObjectKind;

    /// Run one full cycle over all configured targets.
    async fn check(&mut self) -> DomainResult<()>;

    /// Persist the current status map as one time-series record.
    async fn store_status(&self) -> DomainResult<()>;

    /// Cooperative stop flag, examined between target iterations.
    fn stop_flag(&self) -> Arc<AtomicBool>;

    /// The published status view.
    fn status(&self) -> StatusView;

    /// Status records of this checker with `timestamp > since`.
    async fn status_timeseries(&self, since: DateTime<Utc>) -> DomainResult<Vec<StatusRecord>>;
}
