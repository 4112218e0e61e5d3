//! The orchestrator: one worker per checker, periodic cycles, graceful
//! stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::ports::Checker;

struct Worker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the checker workers. Each worker runs
/// `check(); store_status(); sleep` until stopped; a failing cycle is
/// logged and the worker carries on, so no checker failure can crash a
/// sibling.
pub struct Orchestrator {
    workers: Vec<Worker>,
    shutdown: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Spawn one worker per checker.
    pub fn start(checkers: Vec<Box<dyn Checker>>, cycle_interval: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let mut workers = Vec::new();

        for mut checker in checkers {
            let name = checker.name();
            let stop = checker.stop_flag();
            let worker_stop = stop.clone();
            let mut shutdown_rx = shutdown.subscribe();

            let handle = tokio::spawn(async move {
                tracing::info!(checker = name, "checker worker started");

                loop {
                    if worker_stop.load(Ordering::SeqCst) {
                        break;
                    }

                    if let Err(err) = checker.check().await {
                        tracing::error!(checker = name, error = %err, "checker cycle failed");
                    }
                    if let Err(err) = checker.store_status().await {
                        tracing::error!(checker = name, error = %err, "storing status failed");
                    }

                    tokio::select! {
                        () = tokio::time::sleep(cycle_interval) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }

                tracing::info!(checker = name, "checker worker stopped");
            });

            workers.push(Worker { name, stop, handle });
        }

        Self { workers, shutdown }
    }

    /// Signal every worker to stop and wait for them, bounded by
    /// `timeout` per worker. A probe that is already blocked completes or
    /// times out naturally; we do not abort mid-probe.
    pub async fn stop(self, timeout: Duration) {
        for worker in &self.workers {
            worker.stop.store(true, Ordering::SeqCst);
        }
        // wake workers sleeping between cycles
        let _ = self.shutdown.send(());

        for worker in self.workers {
            match tokio::time::timeout(timeout, worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(checker = worker.name, error = %err, "worker join failed");
                }
                Err(_) => {
                    tracing::warn!(checker = worker.name, "worker did not stop in time");
                }
            }
        }
    }
}
