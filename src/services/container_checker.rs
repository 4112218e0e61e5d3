//! The container checker: one suite of checks per configured container.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CheckConfig, ContainerDescriptor, ContainerSpec, ObjectKind, ObjectRef, RuntimeStats,
    StatusAccumulator, StatusRecord, ThresholdConfig,
};
use crate::domain::ports::{
    AlarmSink, Checker, ContainerDetails, ContainerHost, HostError, StatsSample, StatusStore,
    StatusView,
};
use crate::services::check::{CheckContext, CheckSchedule};
use crate::services::container_checks::{
    ContainerPortCheck, DiskSpaceCheck, ImageUpdateCheck, NotRunningCheck, RestartedCheck,
    SourceUpdateCheck, StatusChangedCheck,
};
use crate::services::gitlab::SourceCompareClient;
use crate::services::host_pool::HostPool;
use crate::services::restart_window::RestartWindowService;
use crate::services::status_board::{StatusBoard, TargetMeta};

struct ContainerCheckSet {
    disk: DiskSpaceCheck,
    ports: HashMap<u16, ContainerPortCheck>,
    image_update: ImageUpdateCheck,
    source_update: SourceUpdateCheck,
    status_changed: StatusChangedCheck,
    restarted: RestartedCheck,
    not_running: NotRunningCheck,
}

/// Periodically verifies every container of the blueprint.
pub struct ContainerChecker {
    blueprint: Vec<ContainerSpec>,
    pool: Arc<HostPool>,
    alarms: Arc<dyn AlarmSink>,
    window: Arc<RestartWindowService>,
    board: StatusBoard,
    checks: HashMap<String, ContainerCheckSet>,
    accumulators: HashMap<String, StatusAccumulator>,
    prev_inventory: Option<HashMap<String, ContainerDescriptor>>,
    stop: Arc<AtomicBool>,
}

impl ContainerChecker {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        blueprint: Vec<ContainerSpec>,
        pool: Arc<HostPool>,
        store: Arc<dyn StatusStore>,
        alarms: Arc<dyn AlarmSink>,
        window: Arc<RestartWindowService>,
        compare_client: Arc<SourceCompareClient>,
        check_config: &CheckConfig,
        thresholds: &ThresholdConfig,
    ) -> DomainResult<Self> {
        let board = StatusBoard::new(ObjectKind::Container, store, alarms.clone(), window.clone());
        let schedule = CheckSchedule::every(i64::try_from(check_config.repeat_interval_secs).unwrap_or(60))
            .with_resend_threshold(chrono::Duration::seconds(
                i64::try_from(check_config.resend_threshold_secs).unwrap_or(600),
            ));
        let update_schedule = CheckSchedule::every(600);

        let mut checks = HashMap::new();
        let mut accumulators = HashMap::new();

        for container in &blueprint {
            let object = ObjectRef::container(&container.name);

            let mount_thresholds: HashMap<String, f64> = container
                .disk_free
                .iter()
                .map(|df| (df.mount.clone(), df.threshold))
                .collect();

            let ports = container
                .ports
                .iter()
                .map(|&port| (port, ContainerPortCheck::new(object.clone(), port, schedule)))
                .collect();

            checks.insert(
                container.name.clone(),
                ContainerCheckSet {
                    disk: DiskSpaceCheck::new(
                        object.clone(),
                        mount_thresholds,
                        thresholds.default_disk_usage_percent,
                        schedule,
                    ),
                    ports,
                    image_update: ImageUpdateCheck::new(
                        object.clone(),
                        container.image_update_check.clone(),
                        check_config.repo_scan_interval_minutes,
                        update_schedule,
                    ),
                    source_update: SourceUpdateCheck::new(
                        object.clone(),
                        container.gitlab_update_check.clone(),
                        compare_client.clone(),
                        update_schedule,
                    ),
                    status_changed: StatusChangedCheck::new(object.clone(), schedule),
                    restarted: RestartedCheck::new(object.clone(), schedule),
                    not_running: NotRunningCheck::new(object.clone(), schedule),
                },
            );
            accumulators.insert(container.name.clone(), StatusAccumulator::new());

            board.seed_target(
                &container.name,
                TargetMeta {
                    friendly_name: container.friendly_name.clone(),
                    desc: container.desc.clone(),
                    panel: container.panel.clone(),
                    src: container.src.clone(),
                },
            );
        }

        board.warm_start().await?;

        Ok(Self {
            blueprint,
            pool,
            alarms,
            window,
            board,
            checks,
            accumulators,
            prev_inventory: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn host_for(
        &self,
        spec: &ContainerSpec,
    ) -> DomainResult<Option<Arc<dyn ContainerHost>>> {
        self.pool.for_target(spec.docker.as_deref()).await
    }

    /// Disk usage plus derived runtime statistics for one container.
    async fn compute_stats(
        &mut self,
        host: &Arc<dyn ContainerHost>,
        details: &ContainerDetails,
    ) -> RuntimeStats {
        let name = details.name.clone();
        let mut disk_usage = Vec::new();
        let mut seen_mounts = Vec::new();

        let mut sources = vec!["/".to_string()];
        sources.extend(details.mounts.iter().filter_map(|m| m.source.clone()));

        // TODO: one disk check instance per mount point, so the repeat
        // gate applies per mount instead of per container
        for source in sources {
            let acc = &self.accumulators[&name];
            let ctx = CheckContext {
                acc,
                alarms: self.alarms.as_ref(),
                window: &self.window,
            };
            let checks = self.checks.get_mut(&name).expect("check set exists");
            if let Some(usage) = checks.disk.run(&ctx, host, &source).await {
                if !seen_mounts.contains(&usage.mount_point) {
                    seen_mounts.push(usage.mount_point.clone());
                    disk_usage.push(usage);
                }
            }
        }

        let mut stats = match host.stats(&name).await {
            Ok(sample) => derive_stats(&sample),
            Err(err) => {
                tracing::error!(target_name = %name, error = %err, "failed to sample stats");
                RuntimeStats::default()
            }
        };
        stats.uptime_seconds = details
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0);
        stats.disk_usage = disk_usage;
        stats
    }

    async fn check_one(&mut self, spec: &ContainerSpec) -> DomainResult<Option<ContainerDescriptor>> {
        let name = spec.name.clone();
        tracing::debug!(target_name = %name, "checking container");

        let Some(host) = self.host_for(spec).await? else {
            tracing::warn!(target_name = %name, "container host not yet available");
            return Ok(None);
        };

        let details = match host.container(&name).await {
            Ok(details) => details,
            Err(HostError::NotFound(_)) => {
                tracing::error!(target_name = %name, "container not found");
                return Ok(None);
            }
            Err(err) => {
                tracing::error!(target_name = %name, error = %err, "error retrieving container");
                return Ok(None);
            }
        };

        self.accumulators[&name].reset();

        let update_available = {
            let checks = self.checks.get_mut(&name).expect("check set exists");
            checks.image_update.run(&host, &details).await
        };
        let src_update_available = {
            let checks = self.checks.get_mut(&name).expect("check set exists");
            checks.source_update.run().await
        };

        let stats = self.compute_stats(&host, &details).await;

        let descriptor = ContainerDescriptor {
            name: name.clone(),
            short_id: details.short_id.clone(),
            status: details.status.clone(),
            created: details.created.clone(),
            started_at: details.started_at,
            restart_count: details.restart_count,
            env: details.env.clone(),
            networks: details.networks.clone(),
            stats: stats.clone(),
            update_available,
            src_update_available,
        };

        {
            let acc = &self.accumulators[&name];
            let ctx = CheckContext {
                acc,
                alarms: self.alarms.as_ref(),
                window: &self.window,
            };
            let prev = self
                .prev_inventory
                .as_ref()
                .and_then(|inventory| inventory.get(&name));

            let checks = self.checks.get_mut(&name).expect("check set exists");
            checks.not_running.run(&ctx, &details.status).await;
            checks.status_changed.run(&ctx, &details.status, prev).await;
            checks.restarted.run(&ctx, details.started_at, prev).await;

            for port in &spec.ports {
                if let Some(check) = checks.ports.get_mut(port) {
                    check.run(&ctx, &host).await;
                }
            }
        }

        let all_ok = self.accumulators[&name].is_ok();
        if all_ok {
            tracing::debug!(target_name = %name, "all OK");
        }
        self.board.apply_cycle_outcome(&name, all_ok).await;

        self.board.update_entry(&name, |entry| {
            entry.stats = serde_json::to_value(&stats).ok();
            match update_available {
                Some(available) => entry.update_available = Some(available),
                None => {
                    if entry.update_available.is_none() {
                        entry.update_available = Some(false);
                    }
                }
            }
            if src_update_available.is_some() {
                entry.src_update_available = src_update_available;
            }
        });

        Ok(Some(descriptor))
    }
}

/// Apply the documented CPU and memory formulas to a raw stats sample.
pub fn derive_stats(sample: &StatsSample) -> RuntimeStats {
    let cpu_delta = sample.cpu_total_usage.saturating_sub(sample.precpu_total_usage);
    let system_delta = sample
        .system_cpu_usage
        .saturating_sub(sample.presystem_cpu_usage);
    #[allow(clippy::cast_precision_loss)]
    let cpu_usage_percent = if system_delta > 0 {
        Some(100.0 * (cpu_delta as f64 / system_delta as f64) * sample.online_cpus as f64)
    } else {
        None
    };

    let used_memory = sample.memory_usage.saturating_sub(sample.memory_cache);
    #[allow(clippy::cast_precision_loss)]
    let memory_usage_percent = if sample.memory_limit > 0 {
        Some(100.0 * used_memory as f64 / sample.memory_limit as f64)
    } else {
        None
    };

    let network = sample.networks.first();
    let mut bytes_read = 0;
    let mut bytes_written = 0;
    for entry in &sample.blkio {
        match entry.op.to_lowercase().as_str() {
            "read" => bytes_read += entry.value,
            "write" => bytes_written += entry.value,
            _ => {}
        }
    }

    RuntimeStats {
        cpu_usage_percent,
        memory_usage_bytes: Some(used_memory),
        memory_available_bytes: Some(sample.memory_limit),
        memory_usage_percent,
        pids: Some(sample.pids),
        network_received_bytes: network.map(|n| n.rx_bytes),
        network_sent_bytes: network.map(|n| n.tx_bytes),
        blkio_written_bytes: Some(bytes_written),
        blkio_read_bytes: Some(bytes_read),
        uptime_seconds: None,
        disk_usage: Vec::new(),
    }
}

#[async_trait]
impl Checker for ContainerChecker {
    fn name(&self) -> &'static str {
        "container"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Container
    }

    async fn check(&mut self) -> DomainResult<()> {
        tracing::debug!("starting container verification procedure");

        let mut inventory = HashMap::new();
        let blueprint = self.blueprint.clone();

        for spec in &blueprint {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(descriptor) = self.check_one(spec).await? {
                inventory.insert(descriptor.name.clone(), descriptor);
            }
        }

        self.prev_inventory = Some(inventory);
        Ok(())
    }

    async fn store_status(&self) -> DomainResult<()> {
        self.board.store_now().await
    }

    fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn status(&self) -> StatusView {
        self.board.view()
    }

    async fn status_timeseries(&self, since: DateTime<Utc>) -> DomainResult<Vec<StatusRecord>> {
        self.board.timeseries(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{BlkioEntry, InterfaceStats};

    fn sample() -> StatsSample {
        StatsSample {
            cpu_total_usage: 2_000,
            precpu_total_usage: 1_000,
            system_cpu_usage: 20_000,
            presystem_cpu_usage: 10_000,
            online_cpus: 4,
            memory_usage: 600,
            memory_cache: 100,
            memory_limit: 1_000,
            pids: 12,
            networks: vec![InterfaceStats {
                name: "eth0".to_string(),
                rx_bytes: 111,
                tx_bytes: 222,
            }],
            blkio: vec![
                BlkioEntry {
                    op: "Read".to_string(),
                    value: 10,
                },
                BlkioEntry {
                    op: "Write".to_string(),
                    value: 20,
                },
            ],
        }
    }

    #[test]
    fn test_derive_stats_formulas() {
        let stats = derive_stats(&sample());
        // (1000 / 10000) * 4 cpus * 100
        assert_eq!(stats.cpu_usage_percent, Some(40.0));
        // usage minus cache
        assert_eq!(stats.memory_usage_bytes, Some(500));
        assert_eq!(stats.memory_usage_percent, Some(50.0));
        assert_eq!(stats.network_received_bytes, Some(111));
        assert_eq!(stats.network_sent_bytes, Some(222));
        assert_eq!(stats.blkio_read_bytes, Some(10));
        assert_eq!(stats.blkio_written_bytes, Some(20));
    }

    #[test]
    fn test_derive_stats_zero_system_delta() {
        let mut s = sample();
        s.presystem_cpu_usage = s.system_cpu_usage;
        let stats = derive_stats(&s);
        assert_eq!(stats.cpu_usage_percent, None);
    }
}
