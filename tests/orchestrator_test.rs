//! Orchestrator worker lifecycle: periodic cycles, failure isolation and
//! cooperative stop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use argus::domain::errors::{DomainError, DomainResult};
use argus::domain::models::{ObjectKind, StatusRecord};
use argus::domain::ports::{Checker, StatusView};
use argus::services::Orchestrator;

struct FakeChecker {
    name: &'static str,
    cycles: Arc<AtomicUsize>,
    stored: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    failing: bool,
}

impl FakeChecker {
    fn new(name: &'static str, failing: bool) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let cycles = Arc::new(AtomicUsize::new(0));
        let stored = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                cycles: cycles.clone(),
                stored: stored.clone(),
                stop: Arc::new(AtomicBool::new(false)),
                failing,
            },
            cycles,
            stored,
        )
    }
}

#[async_trait]
impl Checker for FakeChecker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Service
    }

    async fn check(&mut self) -> DomainResult<()> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(DomainError::ProbeFailed("scripted failure".to_string()));
        }
        Ok(())
    }

    async fn store_status(&self) -> DomainResult<()> {
        self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn status(&self) -> StatusView {
        Arc::new(RwLock::new(HashMap::new()))
    }

    async fn status_timeseries(&self, _since: DateTime<Utc>) -> DomainResult<Vec<StatusRecord>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_workers_cycle_periodically_and_stop_on_request() {
    let (checker, cycles, stored) = FakeChecker::new("healthy", false);

    let orchestrator = Orchestrator::start(vec![Box::new(checker)], Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.stop(Duration::from_secs(1)).await;

    let cycles_at_stop = cycles.load(Ordering::SeqCst);
    assert!(cycles_at_stop >= 3, "expected several cycles, got {cycles_at_stop}");
    assert!(stored.load(Ordering::SeqCst) >= 3);

    // no further cycles after stop returned
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cycles.load(Ordering::SeqCst), cycles_at_stop);
}

#[tokio::test]
async fn test_failing_checker_does_not_crash_its_sibling() {
    let (failing, failing_cycles, failing_stored) = FakeChecker::new("failing", true);
    let (healthy, healthy_cycles, _) = FakeChecker::new("healthy", false);

    let orchestrator = Orchestrator::start(
        vec![Box::new(failing), Box::new(healthy)],
        Duration::from_millis(10),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.stop(Duration::from_secs(1)).await;

    // the failing worker kept retrying instead of dying
    assert!(failing_cycles.load(Ordering::SeqCst) >= 3);
    // and still stored its status each cycle
    assert!(failing_stored.load(Ordering::SeqCst) >= 3);
    assert!(healthy_cycles.load(Ordering::SeqCst) >= 3);
}
