//! Shared test doubles: an in-memory container host, a connector for it,
//! an alarm collector and a scratch time-series store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus::adapters::sqlite::{create_pool, Migrator, SqliteStatusStore};
use argus::domain::models::AlarmSeverity;
use argus::domain::ports::{
    AlarmSink, ContainerDetails, ContainerHost, ContainerSummary, ExecOutput, HostConnector,
    HostError, HostInfo, ImageDetails, LaunchSpec, ProbeOutput, ProcessTable, RegistryAuth,
    StatsSample,
};

pub const RUNNING_DF_OUTPUT: &str = "Filesystem     1024-blocks    Used Available Capacity Mounted on\n\
     /dev/sda1          1000000  250000    750000      25% /dir_to_check\n";

/// A container that is up and healthy.
pub fn running_container(name: &str, started_at: DateTime<Utc>) -> ContainerDetails {
    ContainerDetails {
        id: format!("{name}-id-0123456789abcdef"),
        short_id: format!("{name}-short"),
        name: name.to_string(),
        status: "running".to_string(),
        created: Some("2024-01-01T00:00:00Z".to_string()),
        started_at: Some(started_at),
        restart_count: 0,
        env: vec!["PATH=/usr/bin".to_string()],
        networks: vec!["bridge".to_string()],
        mounts: vec![],
        image: "registry.example.org/svc:latest".to_string(),
    }
}

pub fn healthy_stats() -> StatsSample {
    StatsSample {
        cpu_total_usage: 2_000,
        precpu_total_usage: 1_000,
        system_cpu_usage: 20_000,
        presystem_cpu_usage: 10_000,
        online_cpus: 2,
        memory_usage: 512,
        memory_cache: 12,
        memory_limit: 2_048,
        pids: 5,
        networks: vec![],
        blkio: vec![],
    }
}

/// Scripted in-memory container host.
#[derive(Default)]
pub struct MockHost {
    pub containers: Mutex<HashMap<String, ContainerDetails>>,
    pub stats: Mutex<HashMap<String, StatsSample>>,
    /// Exit status per probed port; missing ports answer 0 (open).
    pub port_status: Mutex<HashMap<String, i64>>,
    pub df_output: Mutex<String>,
    pub images: Mutex<HashMap<String, ImageDetails>>,
    pub registry_digests: Mutex<HashMap<String, String>>,
    pub registry_rate_limited: AtomicBool,
    pub probe_count: AtomicUsize,
    pub exec_results: Mutex<HashMap<String, ExecOutput>>,
}

impl MockHost {
    pub fn new() -> Self {
        let host = Self::default();
        *host.df_output.lock().unwrap() = RUNNING_DF_OUTPUT.to_string();
        host
    }

    pub fn insert_container(&self, details: ContainerDetails) {
        let image = ImageDetails {
            id: "sha256:current".to_string(),
            repo_tags: vec![details.image.clone()],
            repo_digests: vec![format!(
                "{}@sha256:current",
                details.image.split(':').next().unwrap()
            )],
            created: Some(Utc::now()),
        };
        self.images
            .lock()
            .unwrap()
            .insert(details.image.clone(), image);
        self.registry_digests
            .lock()
            .unwrap()
            .insert(details.image.clone(), "sha256:current".to_string());
        self.stats
            .lock()
            .unwrap()
            .insert(details.name.clone(), healthy_stats());
        self.containers
            .lock()
            .unwrap()
            .insert(details.name.clone(), details);
    }

    pub fn set_status(&self, name: &str, status: &str) {
        if let Some(details) = self.containers.lock().unwrap().get_mut(name) {
            details.status = status.to_string();
        }
    }

    pub fn close_port(&self, port: u16) {
        self.port_status
            .lock()
            .unwrap()
            .insert(port.to_string(), 1);
    }
}

#[async_trait]
impl ContainerHost for MockHost {
    async fn info(&self) -> Result<HostInfo, HostError> {
        Ok(HostInfo {
            name: "mock-engine".to_string(),
            server_version: "0.0-test".to_string(),
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, HostError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                status: c.status.clone(),
            })
            .collect())
    }

    async fn container(&self, name: &str) -> Result<ContainerDetails, HostError> {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    async fn stats(&self, name: &str) -> Result<StatsSample, HostError> {
        Ok(self
            .stats
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn exec(&self, name: &str, _command: &[String]) -> Result<ExecOutput, HostError> {
        self.exec_results
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, HostError> {
        Ok(spec.name.clone().unwrap_or_else(|| "mock-aux".to_string()))
    }

    async fn wait(&self, _id: &str, _timeout: Duration) -> Result<i64, HostError> {
        Ok(0)
    }

    async fn logs(&self, _name: &str, _tail: Option<usize>) -> Result<String, HostError> {
        Ok(String::new())
    }

    async fn logs_stream(&self, _name: &str) -> Result<BoxStream<'static, String>, HostError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn remove(&self, _id: &str) -> Result<(), HostError> {
        Ok(())
    }

    async fn copy_from(&self, _id: &str, _path: &str) -> Result<Vec<u8>, HostError> {
        Err(HostError::Unsupported("copy_from".to_string()))
    }

    async fn run_probe(
        &self,
        spec: &LaunchSpec,
        _timeout: Duration,
    ) -> Result<ProbeOutput, HostError> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        let command = spec.command.clone().unwrap_or_default();
        match command.first().map(String::as_str) {
            Some("df") => Ok(ProbeOutput {
                status_code: 0,
                output: self.df_output.lock().unwrap().clone(),
            }),
            Some("nc") => {
                let port = command.get(3).cloned().unwrap_or_default();
                let status_code = self
                    .port_status
                    .lock()
                    .unwrap()
                    .get(&port)
                    .copied()
                    .unwrap_or(0);
                Ok(ProbeOutput {
                    status_code,
                    output: String::new(),
                })
            }
            _ => Ok(ProbeOutput {
                status_code: 0,
                output: String::new(),
            }),
        }
    }

    async fn image(&self, reference: &str) -> Result<ImageDetails, HostError> {
        self.images
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| HostError::NotFound(reference.to_string()))
    }

    async fn list_images(&self, _repository: &str) -> Result<Vec<ImageDetails>, HostError> {
        Ok(self.images.lock().unwrap().values().cloned().collect())
    }

    async fn registry_digest(
        &self,
        reference: &str,
        _auth: Option<&RegistryAuth>,
    ) -> Result<String, HostError> {
        if self.registry_rate_limited.load(Ordering::SeqCst) {
            return Err(HostError::RateLimited);
        }
        self.registry_digests
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| HostError::NotFound(reference.to_string()))
    }

    async fn build_image(&self, _context: Vec<u8>, _tag: &str) -> Result<(), HostError> {
        Ok(())
    }

    async fn prune_images(&self) -> Result<(), HostError> {
        Ok(())
    }

    async fn top(&self, _name: &str) -> Result<ProcessTable, HostError> {
        Ok(ProcessTable {
            titles: vec!["PID".to_string(), "CMD".to_string()],
            processes: vec![],
        })
    }
}

/// Connector that always hands out one shared mock host.
pub struct MockConnector {
    pub host: Arc<MockHost>,
    pub fail: Arc<AtomicBool>,
    pub connect_count: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(host: Arc<MockHost>) -> Self {
        Self {
            host,
            fail: Arc::new(AtomicBool::new(false)),
            connect_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl HostConnector for MockConnector {
    async fn connect(&self, _url: Option<&str>) -> Result<Arc<dyn ContainerHost>, HostError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::ConnectionFailed("scripted failure".to_string()));
        }
        Ok(self.host.clone())
    }
}

/// Sink that records every pushed alarm.
#[derive(Default)]
pub struct CollectingSink {
    pub received: Mutex<Vec<(String, AlarmSeverity)>>,
}

impl CollectingSink {
    pub fn messages(&self) -> Vec<(String, AlarmSeverity)> {
        self.received.lock().unwrap().clone()
    }

    pub fn contains(&self, fragment: &str) -> bool {
        self.messages().iter().any(|(m, _)| m.contains(fragment))
    }

    pub fn clear(&self) {
        self.received.lock().unwrap().clear();
    }
}

#[async_trait]
impl AlarmSink for CollectingSink {
    async fn push(&self, message: &str, severity: AlarmSeverity) {
        self.received
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
    }
}

/// A migrated scratch store on a temp database file.
pub async fn scratch_store() -> (tempfile::TempDir, Arc<SqliteStatusStore>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("argus-test.db");
    let pool = create_pool(path.to_str().unwrap(), 2).await.expect("pool");
    Migrator::new(pool.clone()).run().await.expect("migrations");
    (dir, Arc::new(SqliteStatusStore::new(pool)))
}
