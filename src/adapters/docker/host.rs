//! Bollard-backed implementation of the abstract container host.

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, StatsOptions, TopOptions,
    WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::models::{DeviceMapping, HostConfig};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::ports::{
    BlkioEntry, ContainerDetails, ContainerHost, ContainerSummary, ExecOutput, HostConnector,
    HostError, HostInfo, ImageDetails, InterfaceStats, LaunchSpec, MountSpec, ProbeOutput,
    ProcessTable, RegistryAuth, StatsSample,
};

const USER_AGENT: &str = concat!("argus/", env!("CARGO_PKG_VERSION"));

fn map_err(err: bollard::errors::Error) -> HostError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => HostError::NotFound(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 429, ..
        } => HostError::RateLimited,
        other => HostError::Api(other.to_string()),
    }
}

fn parse_engine_ts(raw: &str) -> Option<DateTime<Utc>> {
    // the engine reports a zero timestamp for never-started containers
    if raw.starts_with("0001-") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn parse_device(spec: &str) -> DeviceMapping {
    let mut parts = spec.splitn(3, ':');
    let host_path = parts.next().unwrap_or_default().to_string();
    let container_path = parts.next().unwrap_or(&host_path).to_string();
    let permissions = parts.next().unwrap_or("rwm").to_string();
    DeviceMapping {
        path_on_host: Some(host_path),
        path_in_container: Some(container_path),
        cgroup_permissions: Some(permissions),
    }
}

/// One connected Docker engine.
pub struct DockerHost {
    docker: Docker,
}

impl DockerHost {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    fn create_config(spec: &LaunchSpec) -> Config<String> {
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            network_mode: spec.network_mode.clone(),
            volumes_from: if spec.volumes_from.is_empty() {
                None
            } else {
                Some(spec.volumes_from.clone())
            },
            devices: if spec.devices.is_empty() {
                None
            } else {
                Some(spec.devices.iter().map(|d| parse_device(d)).collect())
            },
            privileged: Some(spec.privileged),
            auto_remove: Some(spec.auto_remove),
            ..HostConfig::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            env: if spec.environment.is_empty() {
                None
            } else {
                Some(spec.environment.clone())
            },
            user: spec.user.clone(),
            working_dir: spec.working_dir.clone(),
            host_config: Some(host_config),
            ..Config::default()
        }
    }

    async fn wait_inner(&self, id: &str, timeout: Duration) -> Result<i64, HostError> {
        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        let next = tokio::time::timeout(timeout, wait.next()).await.map_err(|_| {
            HostError::Api(format!("container {id} did not finish in time"))
        })?;

        match next {
            Some(Ok(response)) => Ok(response.status_code),
            // non-zero exit statuses surface as a dedicated error variant
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(map_err(err)),
            None => Err(HostError::Api(format!("wait stream ended early for {id}"))),
        }
    }

    async fn collect_logs(&self, id: &str, tail: Option<usize>) -> Result<String, HostError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map_or_else(|| "all".to_string(), |n| n.to_string()),
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut collected = String::new();
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(output) => collected.push_str(&output.to_string()),
                Err(err) => return Err(map_err(err)),
            }
        }
        Ok(collected)
    }
}

#[async_trait]
impl ContainerHost for DockerHost {
    async fn info(&self) -> Result<HostInfo, HostError> {
        let info = self.docker.info().await.map_err(map_err)?;
        Ok(HostInfo {
            name: info.name.unwrap_or_else(|| "-unknown-".to_string()),
            server_version: info
                .server_version
                .unwrap_or_else(|| "-unknown-".to_string()),
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, HostError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                status: c.state.unwrap_or_default(),
            })
            .collect())
    }

    async fn container(&self, name: &str) -> Result<ContainerDetails, HostError> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(map_err)?;

        let id = inspect.id.unwrap_or_default();
        let state = inspect.state.as_ref();
        Ok(ContainerDetails {
            short_id: id.chars().take(12).collect(),
            id,
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            status: state
                .and_then(|s| s.status)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            created: inspect.created,
            started_at: state
                .and_then(|s| s.started_at.as_deref())
                .and_then(parse_engine_ts),
            restart_count: inspect.restart_count.unwrap_or(0),
            env: inspect
                .config
                .as_ref()
                .and_then(|c| c.env.clone())
                .unwrap_or_default(),
            networks: inspect
                .network_settings
                .as_ref()
                .and_then(|n| n.networks.as_ref())
                .map(|networks| networks.keys().cloned().collect())
                .unwrap_or_default(),
            mounts: inspect
                .mounts
                .unwrap_or_default()
                .into_iter()
                .map(|m| MountSpec {
                    source: m.source,
                    destination: m.destination,
                })
                .collect(),
            image: inspect
                .config
                .and_then(|c| c.image)
                .unwrap_or_default(),
        })
    }

    async fn stats(&self, name: &str) -> Result<StatsSample, HostError> {
        let mut stream = self.docker.stats(
            name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(err)) => return Err(map_err(err)),
            None => return Err(HostError::Api(format!("no stats frame for {name}"))),
        };

        let memory_cache = match &stats.memory_stats.stats {
            Some(bollard::container::MemoryStatsStats::V1(v1)) => v1.cache,
            _ => 0,
        };

        Ok(StatsSample {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_cache,
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            pids: stats.pids_stats.current.unwrap_or(0),
            networks: stats
                .networks
                .unwrap_or_default()
                .into_iter()
                .map(|(name, nic)| InterfaceStats {
                    name,
                    rx_bytes: nic.rx_bytes,
                    tx_bytes: nic.tx_bytes,
                })
                .collect(),
            blkio: stats
                .blkio_stats
                .io_service_bytes_recursive
                .unwrap_or_default()
                .into_iter()
                .map(|entry| BlkioEntry {
                    op: entry.op,
                    value: entry.value,
                })
                .collect(),
        })
    }

    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput, HostError> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions::<String> {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(map_err)?
        {
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(map_err(err)),
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(map_err)?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, HostError> {
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let created = self
            .docker
            .create_container(options, Self::create_config(spec))
            .await
            .map_err(map_err)?;
        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(map_err)?;
        Ok(created.id)
    }

    async fn wait(&self, id: &str, timeout: Duration) -> Result<i64, HostError> {
        self.wait_inner(id, timeout).await
    }

    async fn logs(&self, name: &str, tail: Option<usize>) -> Result<String, HostError> {
        self.collect_logs(name, tail).await
    }

    async fn logs_stream(&self, name: &str) -> Result<BoxStream<'static, String>, HostError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "100".to_string(),
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(name, Some(options))
            .filter_map(|frame| async move {
                match frame {
                    Ok(output) => Some(output.to_string()),
                    Err(_) => None,
                }
            });
        Ok(stream.boxed())
    }

    async fn remove(&self, id: &str) -> Result<(), HostError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn copy_from(&self, id: &str, path: &str) -> Result<Vec<u8>, HostError> {
        let mut stream = self.docker.download_from_container(
            id,
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.map_err(map_err)?);
        }
        Ok(bytes)
    }

    async fn run_probe(
        &self,
        spec: &LaunchSpec,
        timeout: Duration,
    ) -> Result<ProbeOutput, HostError> {
        // create without auto-remove so the logs survive until collected
        let mut spec = spec.clone();
        spec.auto_remove = false;

        let id = self.launch(&spec).await?;
        let result = async {
            let status_code = self.wait_inner(&id, timeout).await?;
            let output = self.collect_logs(&id, None).await?;
            Ok(ProbeOutput {
                status_code,
                output,
            })
        }
        .await;

        if let Err(err) = self.remove(&id).await {
            tracing::warn!(container = %id, error = %err, "failed to remove probe container");
        }
        result
    }

    async fn image(&self, reference: &str) -> Result<ImageDetails, HostError> {
        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(map_err)?;
        Ok(ImageDetails {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            repo_digests: inspect.repo_digests.unwrap_or_default(),
            created: inspect.created.as_deref().and_then(parse_engine_ts),
        })
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<ImageDetails>, HostError> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![repository.to_string()]);
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        Ok(images
            .into_iter()
            .map(|image| ImageDetails {
                id: image.id,
                repo_tags: image.repo_tags,
                repo_digests: image.repo_digests,
                created: DateTime::<Utc>::from_timestamp(image.created, 0),
            })
            .collect())
    }

    async fn registry_digest(
        &self,
        reference: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<String, HostError> {
        let credentials = auth.map(|auth| DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            ..Default::default()
        });
        let inspect = self
            .docker
            .inspect_registry_image(reference, credentials)
            .await
            .map_err(map_err)?;
        inspect
            .descriptor
            .digest
            .ok_or_else(|| HostError::Api(format!("registry reported no digest for {reference}")))
    }

    async fn build_image(&self, context: Vec<u8>, tag: &str) -> Result<(), HostError> {
        let options = BuildImageOptions::<String> {
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };
        let mut build = self
            .docker
            .build_image(options, None, Some(context.into()));
        while let Some(progress) = build.next().await {
            let info = progress.map_err(map_err)?;
            if let Some(error) = info.error {
                return Err(HostError::Api(error));
            }
        }
        Ok(())
    }

    async fn prune_images(&self) -> Result<(), HostError> {
        self.docker
            .prune_images(None::<bollard::image::PruneImagesOptions<String>>)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn top(&self, name: &str) -> Result<ProcessTable, HostError> {
        let top = self
            .docker
            .top_processes(
                name,
                Some(TopOptions {
                    ps_args: "-ef".to_string(),
                }),
            )
            .await
            .map_err(map_err)?;
        Ok(ProcessTable {
            titles: top.titles.unwrap_or_default(),
            processes: top.processes.unwrap_or_default(),
        })
    }
}

/// Connects to Docker engines by URL scheme.
pub struct DockerConnector;

#[async_trait]
impl HostConnector for DockerConnector {
    async fn connect(&self, url: Option<&str>) -> Result<Arc<dyn ContainerHost>, HostError> {
        let docker = match url {
            None => Docker::connect_with_local_defaults(),
            Some(url) if url.starts_with("unix://") => {
                Docker::connect_with_unix(url, 120, bollard::API_DEFAULT_VERSION)
            }
            Some(url)
                if url.starts_with("tcp://")
                    || url.starts_with("http://")
                    || url.starts_with("https://") =>
            {
                Docker::connect_with_http(url, 120, bollard::API_DEFAULT_VERSION)
            }
            Some(url) => {
                return Err(HostError::Unsupported(format!(
                    "unsupported engine url scheme: {url}"
                )))
            }
        }
        .map_err(|err| HostError::ConnectionFailed(err.to_string()))?;

        // reachability probe before the connection is handed out
        docker
            .ping()
            .await
            .map_err(|err| HostError::ConnectionFailed(err.to_string()))?;

        tracing::debug!(user_agent = USER_AGENT, "engine connection established");
        Ok(Arc::new(DockerHost::new(docker)))
    }
}
