//! Container host port: the abstract interface to a container engine.
//!
//! The checking engine only ever talks to container hosts through this
//! trait. The production adapter speaks the Docker engine API; tests use
//! in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a container host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry answered with a rate-limit response (HTTP 429).
    #[error("registry rate limit exceeded")]
    RateLimited,

    #[error("engine API error: {0}")]
    Api(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

/// Identity of a connected engine.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub name: String,
    pub server_version: String,
}

/// One entry of a container listing.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
}

/// A bind mount of a container.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub source: Option<String>,
    pub destination: Option<String>,
}

/// Inspection result for one container.
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub short_id: String,
    pub name: String,
    /// Raw engine status string, e.g. `running`, `exited`, `restarting`.
    pub status: String,
    pub created: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: i64,
    pub env: Vec<String>,
    /// Names of the networks the container is attached to.
    pub networks: Vec<String>,
    pub mounts: Vec<MountSpec>,
    /// Image reference the container was created from.
    pub image: String,
}

/// Per-interface network counters from a stats sample.
#[derive(Debug, Clone)]
pub struct InterfaceStats {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// One block-IO service-bytes entry.
#[derive(Debug, Clone)]
pub struct BlkioEntry {
    pub op: String,
    pub value: u64,
}

/// A single-frame stats sample of one container, raw enough for the
/// checker to apply the documented CPU and memory formulas.
#[derive(Debug, Clone, Default)]
pub struct StatsSample {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    /// Page-cache portion of the memory usage, zero on cgroup v2.
    pub memory_cache: u64,
    pub memory_limit: u64,
    pub pids: u64,
    pub networks: Vec<InterfaceStats>,
    pub blkio: Vec<BlkioEntry>,
}

/// Demultiplexed output of an in-container command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Output of a finished probe container.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    pub status_code: i64,
    pub output: String,
}

/// Launch parameters for auxiliary containers (probes, proxies, actions).
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub image: String,
    pub command: Option<Vec<String>>,
    pub name: Option<String>,
    pub network: Option<String>,
    /// e.g. `container:<name>` to share a target's network namespace.
    pub network_mode: Option<String>,
    /// Bind mounts in `source:destination[:ro]` form.
    pub binds: Vec<String>,
    pub volumes_from: Vec<String>,
    pub devices: Vec<String>,
    pub environment: Vec<String>,
    pub privileged: bool,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub auto_remove: bool,
}

impl LaunchSpec {
    pub fn probe(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command: Some(command),
            ..Self::default()
        }
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }
}

/// Inspection result for one image.
#[derive(Debug, Clone)]
pub struct ImageDetails {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub created: Option<DateTime<Utc>>,
}

/// Registry credentials, passed through only when both parts are present.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

/// Process listing of one container.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

/// Abstract interface to one container engine.
///
/// Every method blocks on the wire; callers run them from worker tasks.
#[async_trait]
pub trait ContainerHost: Send + Sync {
    /// Engine identity, also used as a connectivity probe.
    async fn info(&self) -> Result<HostInfo, HostError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, HostError>;

    /// Inspect a container by name.
    async fn container(&self, name: &str) -> Result<ContainerDetails, HostError>;

    /// One-shot stats sample (no streaming).
    async fn stats(&self, name: &str) -> Result<StatsSample, HostError>;

    /// Run a command inside a running container, demultiplexing output.
    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput, HostError>;

    /// Create and start an auxiliary container; returns its id.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, HostError>;

    /// Wait for a container to exit; returns its exit status code.
    async fn wait(&self, id: &str, timeout: Duration) -> Result<i64, HostError>;

    /// Collected log output of a container.
    async fn logs(&self, name: &str, tail: Option<usize>) -> Result<String, HostError>;

    /// Follow log output of a container as it is produced.
    async fn logs_stream(&self, name: &str) -> Result<BoxStream<'static, String>, HostError>;

    async fn remove(&self, id: &str) -> Result<(), HostError>;

    /// Fetch a path from a container's filesystem as a tar archive.
    async fn copy_from(&self, id: &str, path: &str) -> Result<Vec<u8>, HostError>;

    /// Launch a throwaway probe container, wait for it and collect output.
    async fn run_probe(&self, spec: &LaunchSpec, timeout: Duration)
        -> Result<ProbeOutput, HostError>;

    /// Inspect an image by reference.
    async fn image(&self, reference: &str) -> Result<ImageDetails, HostError>;

    /// List local images of one repository.
    async fn list_images(&self, repository: &str) -> Result<Vec<ImageDetails>, HostError>;

    /// Digest of an image reference as known to its registry.
    async fn registry_digest(
        &self,
        reference: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<String, HostError>;

    /// Build an image from an in-memory tar build context.
    async fn build_image(&self, context: Vec<u8>, tag: &str) -> Result<(), HostError>;

    async fn prune_images(&self) -> Result<(), HostError>;

    /// Process listing of a running container.
    async fn top(&self, name: &str) -> Result<ProcessTable, HostError>;
}

/// Factory for container host connections.
///
/// `url == None` connects to the ambient environment engine.
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, url: Option<&str>) -> Result<Arc<dyn ContainerHost>, HostError>;
}
