//! End-to-end container checker scenarios against a scripted host.

mod common;

use chrono::{Duration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use argus::domain::models::{
    AlarmSeverity, CheckConfig, HealthState, ObjectKind, ObjectRef, ThresholdConfig,
};
use argus::domain::ports::{Checker, StatusStore};
use argus::services::gitlab::SourceCompareClient;
use argus::services::{ContainerChecker, HostPool, RestartWindowService};

use common::{running_container, scratch_store, CollectingSink, MockConnector, MockHost};

fn blueprint(yaml: &str) -> Vec<argus::domain::models::ContainerSpec> {
    serde_yaml::from_str(yaml).expect("test blueprint parses")
}

/// Probe on every cycle so consecutive `check()` calls observe changes.
fn fast_config() -> CheckConfig {
    CheckConfig {
        repeat_interval_secs: 0,
        ..CheckConfig::default()
    }
}

async fn build_checker(
    host: Arc<MockHost>,
    store: Arc<dyn StatusStore>,
    sink: Arc<CollectingSink>,
    blueprint: Vec<argus::domain::models::ContainerSpec>,
) -> ContainerChecker {
    let pool = Arc::new(
        HostPool::connect(Arc::new(MockConnector::new(host)), &[])
            .await
            .expect("pool"),
    );
    let window = Arc::new(RestartWindowService::new(store.clone(), sink.clone()));
    ContainerChecker::new(
        blueprint,
        pool,
        store,
        sink,
        window,
        Arc::new(SourceCompareClient::new()),
        &fast_config(),
        &ThresholdConfig::default(),
    )
    .await
    .expect("checker")
}

#[tokio::test]
async fn test_healthy_container_reports_ok_without_alarms() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let mut checker = build_checker(
        host,
        store.clone(),
        sink.clone(),
        blueprint("- name: svc-a\n  ports: [8080]\n"),
    )
    .await;

    checker.check().await.expect("cycle");
    checker.store_status().await.expect("store");

    let view = checker.status();
    let entry = view.read().unwrap()["svc-a"].clone();
    assert_eq!(entry.status, HealthState::Ok);
    assert!(sink.messages().is_empty(), "no alarm expected: {:?}", sink.messages());

    // exactly one record was written
    let latest = store
        .latest_status(ObjectKind::Container)
        .await
        .expect("latest")
        .expect("record written");
    assert_eq!(latest.status["svc-a"].status, HealthState::Ok);
}

#[tokio::test]
async fn test_status_transition_raises_unplanned_alarm() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let mut checker = build_checker(host.clone(), store, sink.clone(), blueprint("- name: svc-a\n")).await;

    checker.check().await.expect("first cycle");
    assert!(sink.messages().is_empty());

    host.set_status("svc-a", "exited");
    checker.check().await.expect("second cycle");

    let view = checker.status();
    assert_eq!(view.read().unwrap()["svc-a"].status, HealthState::Nok);

    let messages = sink.messages();
    let transition = messages
        .iter()
        .find(|(m, _)| m.contains("status changed from running to exited"))
        .expect("status-change alarm present");
    assert!(transition.0.contains("container svc-a"));
    assert!(transition.0.contains("(UNPLANNED)"));
    assert_eq!(transition.1, AlarmSeverity::Alarm);
    assert!(sink.contains("container svc-a is BROKEN (UNPLANNED)"));
}

#[tokio::test]
async fn test_planned_window_downgrades_alarm_to_info() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let window = Arc::new(RestartWindowService::new(store.clone(), sink.clone()));

    let pool = Arc::new(
        HostPool::connect(Arc::new(MockConnector::new(host.clone())), &[])
            .await
            .expect("pool"),
    );
    let mut checker = ContainerChecker::new(
        blueprint("- name: svc-a\n"),
        pool,
        store.clone(),
        sink.clone(),
        window.clone(),
        Arc::new(SourceCompareClient::new()),
        &fast_config(),
        &ThresholdConfig::default(),
    )
    .await
    .expect("checker");

    checker.check().await.expect("first cycle");

    window
        .add(
            ObjectRef::container("svc-a"),
            Utc::now() - Duration::minutes(5),
            Utc::now() + Duration::minutes(30),
        )
        .await
        .expect("notification stored");
    sink.clear();

    host.set_status("svc-a", "restarting");
    checker.check().await.expect("second cycle");

    let messages = sink.messages();
    let transition = messages
        .iter()
        .find(|(m, _)| m.contains("status changed from running to restarting"))
        .expect("status-change alarm present");
    assert!(transition.0.contains("(as planned)"));
    assert_eq!(transition.1, AlarmSeverity::Info);
}

#[tokio::test]
async fn test_missing_container_preserves_previous_status() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let mut checker =
        build_checker(host.clone(), store, sink.clone(), blueprint("- name: svc-a\n")).await;

    checker.check().await.expect("first cycle");
    host.containers.lock().unwrap().remove("svc-a");
    checker.check().await.expect("second cycle");

    let view = checker.status();
    assert_eq!(view.read().unwrap()["svc-a"].status, HealthState::Ok);
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_registry_rate_limit_keeps_update_flag() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    host.registry_rate_limited.store(true, Ordering::SeqCst);
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let mut checker =
        build_checker(host, store, sink.clone(), blueprint("- name: svc-a\n")).await;

    checker.check().await.expect("cycle");

    let view = checker.status();
    let entry = view.read().unwrap()["svc-a"].clone();
    // the probe failed; the published flag falls back to its default and
    // no alarm is raised
    assert_eq!(entry.update_available, Some(false));
    assert_eq!(entry.status, HealthState::Ok);
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_closed_port_fails_target_and_alarms_once() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    host.close_port(8080);
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let mut checker = build_checker(
        host,
        store,
        sink.clone(),
        blueprint("- name: svc-a\n  ports: [8080]\n"),
    )
    .await;

    checker.check().await.expect("first cycle");
    let view = checker.status();
    assert_eq!(view.read().unwrap()["svc-a"].status, HealthState::Nok);
    assert!(sink.contains("container svc-a is not responding on port 8080 (UNPLANNED)"));

    // a second probe with the condition unchanged stays inside the
    // resend threshold and does not duplicate the alarm
    let port_alarms_before = sink
        .messages()
        .iter()
        .filter(|(m, _)| m.contains("not responding on port"))
        .count();
    checker.check().await.expect("second cycle");
    let port_alarms_after = sink
        .messages()
        .iter()
        .filter(|(m, _)| m.contains("not responding on port"))
        .count();
    assert_eq!(port_alarms_before, port_alarms_after);
    assert_eq!(
        checker.status().read().unwrap()["svc-a"].status,
        HealthState::Nok
    );
}

#[tokio::test]
async fn test_repeat_interval_suppresses_probing() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("svc-a", Utc::now()));
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let pool = Arc::new(
        HostPool::connect(Arc::new(MockConnector::new(host.clone())), &[])
            .await
            .expect("pool"),
    );
    let window = Arc::new(RestartWindowService::new(store.clone(), sink.clone()));
    let mut checker = ContainerChecker::new(
        blueprint("- name: svc-a\n  ports: [8080]\n"),
        pool,
        store,
        sink,
        window,
        Arc::new(SourceCompareClient::new()),
        &CheckConfig::default(),
        &ThresholdConfig::default(),
    )
    .await
    .expect("checker");

    checker.check().await.expect("first cycle");
    let probes_after_first = host.probe_count.load(Ordering::SeqCst);
    assert!(probes_after_first > 0);

    // within the 60 s repeat interval every check answers from its cache
    checker.check().await.expect("second cycle");
    assert_eq!(host.probe_count.load(Ordering::SeqCst), probes_after_first);
}
