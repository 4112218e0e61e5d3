//! Restart-notification windows: planned maintenance awareness.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AlarmSeverity, ObjectRef, RestartNotification};
use crate::domain::ports::{AlarmSink, StatusStore};

/// Whether an event at some instant falls into a planned window, and the
/// alarm decoration that follows from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedState {
    Planned,
    Unplanned,
}

impl PlannedState {
    /// Label appended to alarm messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Planned => "as planned",
            Self::Unplanned => "UNPLANNED",
        }
    }

    /// Severity an alarm produced under this state carries.
    pub fn severity(&self) -> AlarmSeverity {
        match self {
            Self::Planned => AlarmSeverity::Info,
            Self::Unplanned => AlarmSeverity::Alarm,
        }
    }
}

/// Records planned maintenance windows and answers "is an event for
/// object X at time T planned?".
pub struct RestartWindowService {
    store: Arc<dyn StatusStore>,
    alarms: Arc<dyn AlarmSink>,
}

impl RestartWindowService {
    pub fn new(store: Arc<dyn StatusStore>, alarms: Arc<dyn AlarmSink>) -> Self {
        Self { store, alarms }
    }

    /// Persist a new window and announce it with an informational alarm.
    pub async fn add(
        &self,
        object: ObjectRef,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> DomainResult<RestartNotification> {
        let notification = RestartNotification::new(object, valid_from, valid_until);
        self.store.add_notification(&notification).await?;

        let message = format!(
            "{} is scheduled to be restarted between {} and {}",
            notification.object, valid_from, valid_until
        );
        tracing::info!("{message}");
        self.alarms.push(&message, AlarmSeverity::Info).await;

        Ok(notification)
    }

    /// Whether at least one stored window covers `object` at `at`.
    pub async fn covers(&self, object: &ObjectRef, at: DateTime<Utc>) -> bool {
        match self.store.has_covering_notification(object, at).await {
            Ok(covered) => covered,
            Err(err) => {
                tracing::error!(object = %object, error = %err, "notification lookup failed");
                false
            }
        }
    }

    /// Planned/unplanned classification of an event happening now.
    pub async fn classify(&self, object: &ObjectRef) -> PlannedState {
        if self.covers(object, Utc::now()).await {
            PlannedState::Planned
        } else {
            PlannedState::Unplanned
        }
    }

    /// Recent notifications, newest first, bounded to 100.
    pub async fn list(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<Vec<RestartNotification>> {
        let since = since.unwrap_or_else(|| Utc::now() - Duration::days(1));
        self.store.notifications_since(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_state_labels() {
        assert_eq!(PlannedState::Planned.label(), "as planned");
        assert_eq!(PlannedState::Unplanned.label(), "UNPLANNED");
        assert_eq!(PlannedState::Planned.severity(), AlarmSeverity::Info);
        assert_eq!(PlannedState::Unplanned.severity(), AlarmSeverity::Alarm);
    }
}
