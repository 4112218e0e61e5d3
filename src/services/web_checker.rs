//! The web-service checker: endpoints, certificates, ports and host-agent
//! health per configured service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CheckConfig, ObjectKind, ObjectRef, StatusAccumulator, StatusRecord, ThresholdConfig,
    WebServiceSpec,
};
use crate::domain::ports::{AlarmSink, Checker, StatusStore, StatusView};
use crate::services::check::{CheckContext, CheckSchedule};
use crate::services::container_checks::SourceUpdateCheck;
use crate::services::gitlab::SourceCompareClient;
use crate::services::host_pool::HostPool;
use crate::services::restart_window::RestartWindowService;
use crate::services::status_board::{StatusBoard, TargetMeta};
use crate::services::web_checks::{
    AgentDiskCheck, AgentPortCheck, AgentStatsCheck, CertificateExpiryCheck, EndpointCheck,
    ServicePortCheck,
};

/// Repeat interval of the certificate expiry check: at least hourly.
const CERT_CHECK_INTERVAL_SECS: i64 = 3600;

struct ServiceCheckSet {
    source_update: SourceUpdateCheck,
    ports: HashMap<u16, ServicePortCheck>,
    endpoints: Vec<EndpointCheck>,
    certificates: Vec<CertificateExpiryCheck>,
    agent_stats: Option<AgentStatsCheck>,
    agent_ports: BTreeMap<String, AgentPortCheck>,
    agent_disks: BTreeMap<String, AgentDiskCheck>,
}

/// Periodically verifies every configured web service.
pub struct WebServiceChecker {
    services: Vec<WebServiceSpec>,
    pool: Arc<HostPool>,
    alarms: Arc<dyn AlarmSink>,
    window: Arc<RestartWindowService>,
    board: StatusBoard,
    checks: HashMap<String, ServiceCheckSet>,
    accumulators: HashMap<String, StatusAccumulator>,
    stop: Arc<AtomicBool>,
}

impl WebServiceChecker {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        services: Vec<WebServiceSpec>,
        pool: Arc<HostPool>,
        store: Arc<dyn StatusStore>,
        alarms: Arc<dyn AlarmSink>,
        window: Arc<RestartWindowService>,
        compare_client: Arc<SourceCompareClient>,
        check_config: &CheckConfig,
        thresholds: &ThresholdConfig,
    ) -> DomainResult<Self> {
        let board = StatusBoard::new(ObjectKind::Service, store, alarms.clone(), window.clone());
        let schedule = CheckSchedule::every(i64::try_from(check_config.repeat_interval_secs).unwrap_or(60))
            .with_resend_threshold(chrono::Duration::seconds(
                i64::try_from(check_config.resend_threshold_secs).unwrap_or(600),
            ));
        let update_schedule = CheckSchedule::every(600);
        let cert_schedule = CheckSchedule::every(CERT_CHECK_INTERVAL_SECS);

        let mut checks = HashMap::new();
        let mut accumulators = HashMap::new();

        for service in &services {
            let object = ObjectRef::service(&service.name);

            let ports = service
                .ports
                .iter()
                .filter_map(|&port| {
                    service.hostname.as_ref().map(|hostname| {
                        (
                            port,
                            ServicePortCheck::new(object.clone(), hostname.clone(), port, schedule),
                        )
                    })
                })
                .collect();

            let endpoints = service
                .endpoints
                .iter()
                .map(|endpoint| EndpointCheck::new(object.clone(), endpoint.clone(), schedule))
                .collect();

            let certificates = service
                .endpoints
                .iter()
                .map(|endpoint| {
                    CertificateExpiryCheck::new(
                        object.clone(),
                        endpoint.url.clone(),
                        thresholds.certificate_warn_days,
                        cert_schedule,
                    )
                })
                .collect();

            let mut agent_stats = None;
            let mut agent_ports = BTreeMap::new();
            let mut agent_disks = BTreeMap::new();
            if let (Some(zabbix), Some(hostname)) = (&service.zabbix, &service.hostname) {
                agent_stats = Some(AgentStatsCheck::new(
                    object.clone(),
                    hostname.clone(),
                    zabbix.clone(),
                    schedule,
                ));
                for port in &zabbix.ports {
                    let arg = port.item_arg();
                    agent_ports.insert(
                        arg.clone(),
                        AgentPortCheck::new(object.clone(), arg, schedule),
                    );
                }
                let mut mounts: Vec<(String, Option<f64>)> = zabbix
                    .disk_free
                    .iter()
                    .map(|df| (df.mount.clone(), Some(df.threshold)))
                    .collect();
                for mount in &zabbix.mount_points {
                    if !mounts.iter().any(|(name, _)| name == mount) {
                        mounts.push((mount.clone(), None));
                    }
                }
                for (mount, threshold) in mounts {
                    agent_disks.insert(
                        mount.clone(),
                        AgentDiskCheck::new(
                            object.clone(),
                            mount,
                            threshold,
                            thresholds.default_disk_usage_percent,
                            schedule,
                        ),
                    );
                }
            }

            checks.insert(
                service.name.clone(),
                ServiceCheckSet {
                    source_update: SourceUpdateCheck::new(
                        object.clone(),
                        service.gitlab_update_check.clone(),
                        compare_client.clone(),
                        update_schedule,
                    ),
                    ports,
                    endpoints,
                    certificates,
                    agent_stats,
                    agent_ports,
                    agent_disks,
                },
            );
            accumulators.insert(service.name.clone(), StatusAccumulator::new());

            board.seed_target(
                &service.name,
                TargetMeta {
                    friendly_name: service.friendly_name.clone(),
                    desc: service.desc.clone(),
                    panel: service.panel.clone(),
                    src: service.src.clone(),
                },
            );
        }

        board.warm_start().await?;

        Ok(Self {
            services,
            pool,
            alarms,
            window,
            board,
            checks,
            accumulators,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn check_one(&mut self, spec: &WebServiceSpec) -> DomainResult<()> {
        let name = spec.name.clone();
        tracing::debug!(target_name = %name, "checking service");

        let host = self.pool.for_target(spec.docker.as_deref()).await?;
        if host.is_none() {
            tracing::warn!(target_name = %name, "container host not yet available");
        }

        self.accumulators[&name].reset();

        let (src_update_available, stats) = {
            let acc = &self.accumulators[&name];
            let ctx = CheckContext {
                acc,
                alarms: self.alarms.as_ref(),
                window: &self.window,
            };
            let checks = self.checks.get_mut(&name).expect("check set exists");

            let src_update_available = checks.source_update.run().await;

            let mut stats = None;
            if let Some(agent_stats) = checks.agent_stats.as_mut() {
                stats = agent_stats
                    .run(&ctx, &mut checks.agent_ports, &mut checks.agent_disks)
                    .await;
            }

            for check in checks.ports.values_mut() {
                check.run(&ctx, host.as_ref()).await;
            }
            for check in &mut checks.endpoints {
                check.run(&ctx, host.as_ref()).await;
            }
            for check in &mut checks.certificates {
                check.run(&ctx).await;
            }

            (src_update_available, stats)
        };

        let all_ok = self.accumulators[&name].is_ok();
        if all_ok {
            tracing::debug!(target_name = %name, "all OK");
        }
        self.board.apply_cycle_outcome(&name, all_ok).await;

        self.board.update_entry(&name, |entry| {
            if let Some(stats) = &stats {
                entry.stats = serde_json::to_value(stats).ok();
            }
            if src_update_available.is_some() {
                entry.src_update_available = src_update_available;
            }
        });

        Ok(())
    }
}

#[async_trait]
impl Checker for WebServiceChecker {
    fn name(&self) -> &'static str {
        "web_service"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Service
    }

    async fn check(&mut self) -> DomainResult<()> {
        let services = self.services.clone();
        for spec in &services {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.check_one(spec).await?;
        }
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
