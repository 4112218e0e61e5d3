//! On-demand actions: run a configured container once and collect its
//! logs or artifact paths.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::ActionSpec;
use crate::domain::ports::{HostError, LaunchSpec};
use crate::services::host_pool::HostPool;

/// How long an action container may run.
const ACTION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("container host not initialised")]
    HostUnavailable,

    #[error("action image not found: {0}")]
    ImageNotFound(String),

    #[error("engine error: {0}")]
    Host(#[from] HostError),

    #[error("artifact bundling failed: {0}")]
    Artifacts(#[from] std::io::Error),
}

/// Result of one action run.
pub enum ActionOutcome {
    /// Container log output (no artifacts configured).
    Logs(String),
    /// Gzipped tar bundle of the configured artifact paths.
    Artifacts(Vec<u8>),
}

/// Executes one configured action in a throwaway container.
pub struct ActionRunner {
    spec: ActionSpec,
    pool: Arc<HostPool>,
}

impl ActionRunner {
    pub fn new(spec: ActionSpec, pool: Arc<HostPool>) -> Self {
        Self { spec, pool }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub async fn run(&self) -> Result<ActionOutcome, ActionError> {
        tracing::info!(action = %self.spec.name, "executing action");

        let host = match self.pool.for_target(self.spec.docker.as_deref()).await {
            Ok(Some(host)) => host,
            _ => return Err(ActionError::HostUnavailable),
        };

        let launch = LaunchSpec {
            image: self.spec.image.clone(),
            command: self
                .spec
                .command
                .as_ref()
                .map(|c| c.split_whitespace().map(String::from).collect()),
            network: self.spec.network.clone(),
            network_mode: self.spec.network_mode.clone(),
            binds: self.spec.volumes.clone(),
            volumes_from: self.spec.volumes_from.iter().cloned().collect(),
            devices: self.spec.devices.clone(),
            environment: self.spec.environment.clone(),
            privileged: self.spec.privileged,
            user: self.spec.user.clone(),
            working_dir: self.spec.working_dir.clone(),
            ..LaunchSpec::default()
        };

        let id = match host.launch(&launch).await {
            Ok(id) => id,
            Err(HostError::NotFound(reference)) => {
                tracing::error!(image = %self.spec.image, "action image not found");
                return Err(ActionError::ImageNotFound(reference));
            }
            Err(err) => return Err(err.into()),
        };

        let outcome = self.collect(&host, &id).await;
        if let Err(err) = host.remove(&id).await {
            tracing::warn!(container = %id, error = %err, "failed to remove action container");
        }
        outcome
    }

    async fn collect(
        &self,
        host: &Arc<dyn crate::domain::ports::ContainerHost>,
        id: &str,
    ) -> Result<ActionOutcome, ActionError> {
        host.wait(id, ACTION_TIMEOUT).await?;

        if self.spec.artifacts.is_empty() {
            let logs = host.logs(id, None).await?;
            return Ok(ActionOutcome::Logs(logs));
        }

        let mut bundle = bundle_builder()?;
        for path in &self.spec.artifacts {
            let archive = host.copy_from(id, path).await?;
            append_archive(&mut bundle, &archive)?;
        }
        Ok(ActionOutcome::Artifacts(finish_bundle(bundle)?))
    }
}

type Bundle = tar::Builder<GzEncoder<Vec<u8>>>;

fn bundle_builder() -> std::io::Result<Bundle> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    Ok(tar::Builder::new(encoder))
}

/// Re-file the entries of one per-path archive into the combined bundle,
/// buffering through a truncated-and-rewound scoped temp file.
fn append_archive(bundle: &mut Bundle, archive_bytes: &[u8]) -> std::io::Result<()> {
    let mut spool = tempfile::tempfile()?;
    spool.write_all(archive_bytes)?;
    spool.flush()?;
    spool.seek(SeekFrom::Start(0))?;

    let mut archive = tar::Archive::new(spool);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let mut header = entry.header().clone();
        let path = entry.path()?.into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        header.set_size(data.len() as u64);
        header.set_cksum();
        bundle.append_data(&mut header, path, data.as_slice())?;
    }
    Ok(())
}

fn finish_bundle(bundle: Bundle) -> std::io::Result<Vec<u8>> {
    let encoder = bundle.into_inner()?;
    encoder.finish()
}
