//! Published status of one checker: the rolling per-target view, the
//! aggregate transition alarms, and persistence of cycle records.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AlarmSeverity, HealthState, ObjectKind, ObjectRef, StatusRecord, TargetStatus,
};
use crate::domain::ports::{AlarmSink, StatusStore, StatusView};
use crate::services::restart_window::RestartWindowService;

/// Target metadata carried into the published view.
#[derive(Debug, Clone, Default)]
pub struct TargetMeta {
    pub friendly_name: Option<String>,
    pub desc: Option<String>,
    pub panel: Option<String>,
    pub src: Option<String>,
}

/// Rolling status view of one checker family plus the machinery shared by
/// all checkers at the end of a target cycle: folding the accumulator
/// into `OK`/`NOK`, alarming on transitions, and writing cycle records.
pub struct StatusBoard {
    kind: ObjectKind,
    view: StatusView,
    store: Arc<dyn StatusStore>,
    alarms: Arc<dyn AlarmSink>,
    window: Arc<RestartWindowService>,
}

impl StatusBoard {
    pub fn new(
        kind: ObjectKind,
        store: Arc<dyn StatusStore>,
        alarms: Arc<dyn AlarmSink>,
        window: Arc<RestartWindowService>,
    ) -> Self {
        Self {
            kind,
            view: Arc::new(RwLock::new(HashMap::new())),
            store,
            alarms,
            window,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn view(&self) -> StatusView {
        self.view.clone()
    }

    /// Install the initial `OK` entry plus configured metadata for a target.
    pub fn seed_target(&self, name: &str, meta: TargetMeta) {
        let mut entry = TargetStatus::ok();
        entry.friendly_name = meta.friendly_name;
        entry.desc = meta.desc;
        entry.panel = meta.panel;
        entry.src = meta.src;
        self.view
            .write()
            .expect("status view lock poisoned")
            .insert(name.to_string(), entry);
    }

    /// Merge status and stats of the latest stored record into the view,
    /// so a process restart does not reset every target to `OK`.
    pub async fn warm_start(&self) -> DomainResult<()> {
        let Some(last) = self.store.latest_status(self.kind).await? else {
            return Ok(());
        };

        let mut view = self.view.write().expect("status view lock poisoned");
        for (name, stored) in last.status {
            if let Some(entry) = view.get_mut(&name) {
                entry.status = stored.status;
                entry.stats = stored.stats;
                entry.last_failure = stored.last_failure;
            }
        }
        Ok(())
    }

    /// Update one target's entry under a short write lock.
    pub fn update_entry(&self, name: &str, update: impl FnOnce(&mut TargetStatus)) {
        let mut view = self.view.write().expect("status view lock poisoned");
        let entry = view.entry(name.to_string()).or_insert_with(TargetStatus::ok);
        update(entry);
    }

    /// Fold one cycle's accumulator value for a target: emit a transition
    /// alarm when the aggregate flipped, record the failure time, and
    /// publish the new state.
    pub async fn apply_cycle_outcome(&self, name: &str, all_ok: bool) -> HealthState {
        let status = if all_ok {
            HealthState::Ok
        } else {
            HealthState::Nok
        };

        let previous = {
            let view = self.view.read().expect("status view lock poisoned");
            view.get(name).map(|entry| entry.status)
        };

        if previous.is_some() && previous != Some(status) {
            let noun = self.kind.describe();
            if status == HealthState::Ok {
                tracing::info!(target_name = name, "{noun} has been repaired");
                self.alarms
                    .push(&format!("{noun} {name} is OK again"), AlarmSeverity::Info)
                    .await;
            } else {
                let object = ObjectRef::new(self.kind, name);
                let planned = self.window.classify(&object).await;
                tracing::warn!(target_name = name, "{noun} is BROKEN ({})", planned.label());
                self.alarms
                    .push(
                        &format!("{noun} {name} is BROKEN ({})", planned.label()),
                        planned.severity(),
                    )
                    .await;
            }
        }

        self.update_entry(name, |entry| {
            entry.status = status;
            if status != HealthState::Ok {
                entry.last_failure = Some(Utc::now());
            }
        });

        status
    }

    /// Persist the current view as one time-series record.
    pub async fn store_now(&self) -> DomainResult<()> {
        let record = StatusRecord {
            timestamp: Utc::now(),
            status: self.snapshot(),
        };
        self.store.append_status(self.kind, &record).await
    }

    pub fn snapshot(&self) -> HashMap<String, TargetStatus> {
        self.view
            .read()
            .expect("status view lock poisoned")
            .clone()
    }

    /// Status records of this checker with `timestamp > since`.
    pub async fn timeseries(&self, since: DateTime<Utc>) -> DomainResult<Vec<StatusRecord>> {
        self.store.status_since(self.kind, since).await
    }
}
