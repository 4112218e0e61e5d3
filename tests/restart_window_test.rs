//! Restart-notification window behaviour over the real store.

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use argus::domain::models::{AlarmSeverity, ObjectRef};
use argus::services::{PlannedState, RestartWindowService};

use common::{scratch_store, CollectingSink};

#[tokio::test]
async fn test_add_persists_and_announces_the_window() {
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let window = RestartWindowService::new(store, sink.clone());

    let from = Utc::now() - Duration::minutes(1);
    let until = Utc::now() + Duration::hours(1);
    window
        .add(ObjectRef::container("svc-a"), from, until)
        .await
        .expect("add");

    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].0.contains("container svc-a is scheduled to be restarted"));
    assert_eq!(messages[0].1, AlarmSeverity::Info);

    assert!(window.covers(&ObjectRef::container("svc-a"), Utc::now()).await);
    assert!(
        !window
            .covers(&ObjectRef::container("svc-b"), Utc::now())
            .await
    );
}

#[tokio::test]
async fn test_classification_follows_coverage() {
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let window = RestartWindowService::new(store, sink);

    let object = ObjectRef::service("api");
    assert_eq!(window.classify(&object).await, PlannedState::Unplanned);

    window
        .add(
            object.clone(),
            Utc::now() - Duration::minutes(5),
            Utc::now() + Duration::minutes(5),
        )
        .await
        .expect("add");
    assert_eq!(window.classify(&object).await, PlannedState::Planned);
}

#[tokio::test]
async fn test_expired_window_does_not_cover_now() {
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let window = RestartWindowService::new(store, sink);

    let object = ObjectRef::jmx("billing");
    window
        .add(
            object.clone(),
            Utc::now() - Duration::hours(2),
            Utc::now() - Duration::hours(1),
        )
        .await
        .expect("add");

    // the record persists, only the coverage query filters by time
    assert_eq!(window.list(None).await.expect("list").len(), 1);
    assert_eq!(window.classify(&object).await, PlannedState::Unplanned);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let window = RestartWindowService::new(store, sink);

    for name in ["a", "b", "c"] {
        window
            .add(
                ObjectRef::container(name),
                Utc::now(),
                Utc::now() + Duration::minutes(1),
            )
            .await
            .expect("add");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let listed = window.list(None).await.expect("list");
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].object.name, "c");
    assert!(listed[0].creation_time >= listed[2].creation_time);
}
