//! The check primitive: scheduling, status tracking and alarm debounce
//! for one atomic check.
//!
//! Every concrete check owns a [`CheckTask`] plus its own typed cached
//! return value. The task decides whether an external probe is due at
//! all, records status transitions, and gates alarm sending so that an
//! unchanged condition is re-alarmed no earlier than the resend
//! threshold.

use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{AlarmSeverity, CheckResult, ObjectRef, StatusAccumulator};
use crate::domain::ports::AlarmSink;
use crate::services::restart_window::RestartWindowService;

/// Everything a check needs besides its probe input: the per-target
/// accumulator, the alarm fan-out and the planned-maintenance windows.
pub struct CheckContext<'a> {
    pub acc: &'a StatusAccumulator,
    pub alarms: &'a dyn AlarmSink,
    pub window: &'a RestartWindowService,
}

/// Scheduling parameters of one check.
#[derive(Debug, Clone, Copy)]
pub struct CheckSchedule {
    /// Minimum pause between external probes. `None` probes every cycle.
    pub repeat_interval: Option<Duration>,
    /// Minimum pause before an unchanged alarm is sent again.
    pub resend_threshold: Duration,
}

impl Default for CheckSchedule {
    fn default() -> Self {
        Self {
            repeat_interval: Some(Duration::seconds(60)),
            resend_threshold: Duration::seconds(600),
        }
    }
}

impl CheckSchedule {
    pub fn every(seconds: i64) -> Self {
        Self {
            repeat_interval: Some(Duration::seconds(seconds)),
            ..Self::default()
        }
    }

    pub fn with_resend_threshold(mut self, threshold: Duration) -> Self {
        self.resend_threshold = threshold;
        self
    }
}

/// Scheduling and notification bookkeeping of one check instance.
///
/// Lives for the process lifetime; transitions happen only through
/// [`record_status`], which updates the status-change timestamp only when
/// the value actually changes.
///
/// [`record_status`]: CheckTask::record_status
#[derive(Debug)]
pub struct CheckTask {
    object: ObjectRef,
    schedule: CheckSchedule,
    /// The status this check reports when its target is healthy. Checks
    /// without a polarity (pure data collectors) carry `None` and never
    /// touch the accumulator on the cached path.
    healthy_when: Option<CheckResult>,
    last_execution_time: Option<DateTime<Utc>>,
    last_status: CheckResult,
    last_status_change: Option<DateTime<Utc>>,
    last_notification_sent: Option<DateTime<Utc>>,
}

impl CheckTask {
    pub fn new(object: ObjectRef, healthy_when: Option<CheckResult>, schedule: CheckSchedule) -> Self {
        Self {
            object,
            schedule,
            healthy_when,
            last_execution_time: None,
            last_status: CheckResult::Missing,
            last_status_change: None,
            last_notification_sent: None,
        }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn last_status(&self) -> CheckResult {
        self.last_status
    }

    pub fn last_status_change(&self) -> Option<DateTime<Utc>> {
        self.last_status_change
    }

    pub fn last_execution_time(&self) -> Option<DateTime<Utc>> {
        self.last_execution_time
    }

    /// Whether the repeat interval has elapsed and the probe may run.
    pub fn shall_repeat(&self) -> bool {
        self.shall_repeat_at(Utc::now())
    }

    pub(crate) fn shall_repeat_at(&self, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.schedule.repeat_interval else {
            return true;
        };
        match self.last_execution_time {
            None => true,
            Some(last) => now - last > interval,
        }
    }

    /// Mark the start of an external probe.
    pub fn begin_probe(&mut self) {
        self.last_execution_time = Some(Utc::now());
    }

    #[cfg(test)]
    pub(crate) fn begin_probe_at(&mut self, now: DateTime<Utc>) {
        self.last_execution_time = Some(now);
    }

    /// Record a probe outcome. The transition timestamp moves only when
    /// the status differs from the previous one.
    pub fn record_status(&mut self, status: CheckResult) {
        self.record_status_at(status, Utc::now());
    }

    pub(crate) fn record_status_at(&mut self, status: CheckResult, now: DateTime<Utc>) {
        if self.last_status != status {
            self.last_status_change = Some(now);
        }
        self.last_status = status;
    }

    /// On the cached path, propagate a deviation from the healthy
    /// polarity into the per-target accumulator.
    pub fn propagate_cached(&self, acc: &StatusAccumulator) {
        if let Some(healthy) = self.healthy_when {
            if self.last_status != healthy {
                acc.fail();
            }
        }
    }

    fn status_changed_after_last_notification(&self) -> bool {
        match (self.last_status_change, self.last_notification_sent) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(change), Some(sent)) => sent < change,
        }
    }

    /// Whether an alarm is due: the status changed since the last send,
    /// or the resend threshold elapsed.
    pub fn should_send_notification(&self) -> bool {
        self.should_send_notification_at(Utc::now())
    }

    pub(crate) fn should_send_notification_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_notification_sent {
            None => self.status_changed_after_last_notification(),
            Some(sent) => {
                self.status_changed_after_last_notification()
                    || now - sent > self.schedule.resend_threshold
            }
        }
    }

    pub fn mark_notification_sent(&mut self) {
        self.last_notification_sent = Some(Utc::now());
    }

    #[cfg(test)]
    pub(crate) fn mark_notification_sent_at(&mut self, now: DateTime<Utc>) {
        self.last_notification_sent = Some(now);
    }

    /// Send `message` through the sink iff the debounce gate is open.
    pub async fn send_smart_alarm(
        &mut self,
        alarms: &dyn AlarmSink,
        message: &str,
        severity: AlarmSeverity,
    ) {
        if self.should_send_notification() {
            alarms.push(message, severity).await;
            self.mark_notification_sent();
        }
    }

    /// Debug line emitted at the start of every probe.
    pub fn report(&self, check_name: &str) {
        tracing::debug!(
            object = %self.object,
            check = check_name,
            last_executed = ?self.last_execution_time,
            status = self.last_status.as_str(),
            "running check"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ObjectKind;

    fn task(healthy_when: Option<CheckResult>) -> CheckTask {
        CheckTask::new(
            ObjectRef::new(ObjectKind::Container, "svc-a"),
            healthy_when,
            CheckSchedule::default(),
        )
    }

    #[test]
    fn test_repeats_immediately_when_never_executed() {
        let t = task(Some(CheckResult::Positive));
        assert!(t.shall_repeat_at(Utc::now()));
    }

    #[test]
    fn test_does_not_repeat_within_interval() {
        let now = Utc::now();
        let mut t = task(Some(CheckResult::Positive));
        t.begin_probe_at(now);
        assert!(!t.shall_repeat_at(now + Duration::seconds(30)));
        assert!(t.shall_repeat_at(now + Duration::seconds(61)));
    }

    #[test]
    fn test_no_interval_always_repeats() {
        let mut t = CheckTask::new(
            ObjectRef::container("svc-a"),
            None,
            CheckSchedule {
                repeat_interval: None,
                resend_threshold: Duration::seconds(600),
            },
        );
        let now = Utc::now();
        t.begin_probe_at(now);
        assert!(t.shall_repeat_at(now));
    }

    #[test]
    fn test_status_change_timestamp_moves_only_on_change() {
        let t0 = Utc::now();
        let mut t = task(Some(CheckResult::Positive));

        t.record_status_at(CheckResult::Positive, t0);
        assert_eq!(t.last_status_change(), Some(t0));

        let t1 = t0 + Duration::seconds(10);
        t.record_status_at(CheckResult::Positive, t1);
        assert_eq!(t.last_status_change(), Some(t0));

        let t2 = t0 + Duration::seconds(20);
        t.record_status_at(CheckResult::Negative, t2);
        assert_eq!(t.last_status_change(), Some(t2));
    }

    #[test]
    fn test_cached_path_fails_accumulator_on_polarity_deviation() {
        let acc = StatusAccumulator::new();
        let mut t = task(Some(CheckResult::Positive));

        t.record_status_at(CheckResult::Positive, Utc::now());
        t.propagate_cached(&acc);
        assert!(acc.is_ok());

        t.record_status_at(CheckResult::Negative, Utc::now());
        t.propagate_cached(&acc);
        assert!(!acc.is_ok());
    }

    #[test]
    fn test_cached_path_without_polarity_never_touches_accumulator() {
        let acc = StatusAccumulator::new();
        let mut t = task(None);
        t.record_status_at(CheckResult::ExecFailure, Utc::now());
        t.propagate_cached(&acc);
        assert!(acc.is_ok());
    }

    #[test]
    fn test_first_notification_requires_a_status_change() {
        let t = task(Some(CheckResult::Positive));
        // no status recorded yet, nothing to tell
        assert!(!t.should_send_notification_at(Utc::now()));
    }

    #[test]
    fn test_notification_debounce() {
        let t0 = Utc::now();
        let mut t = task(Some(CheckResult::Positive));

        t.record_status_at(CheckResult::Negative, t0);
        assert!(t.should_send_notification_at(t0));
        t.mark_notification_sent_at(t0);

        // unchanged status, threshold not elapsed: hold
        assert!(!t.should_send_notification_at(t0 + Duration::seconds(300)));

        // unchanged status, threshold elapsed: resend
        assert!(t.should_send_notification_at(t0 + Duration::seconds(601)));

        // changed status: send immediately
        t.record_status_at(CheckResult::Positive, t0 + Duration::seconds(30));
        assert!(t.should_send_notification_at(t0 + Duration::seconds(31)));
    }
}
