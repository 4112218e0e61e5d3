//! The managed-bean (JMX) checker: metric extraction through a
//! per-target proxy container and restart detection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CheckConfig, CheckResult, JmxAgentConfig, JmxDescriptor, JmxServiceSpec, JmxUrl, ObjectKind,
    ObjectRef, StatusAccumulator, StatusRecord,
};
use crate::domain::ports::{
    AlarmSink, Checker, ContainerHost, HostError, LaunchSpec, StatusStore, StatusView,
};
use crate::services::check::{CheckContext, CheckSchedule, CheckTask};
use crate::services::host_pool::HostPool;
use crate::services::jmx_agent::{
    self, agent_command, agent_url, builtin_queries, collect_metrics, parse_metrics, MetricQuery,
};
use crate::services::restart_window::RestartWindowService;
use crate::services::status_board::{StatusBoard, TargetMeta};

type MetricMaps = (BTreeMap<String, Value>, BTreeMap<String, Value>);

/// Runs the query agent inside the proxy container and parses its output
/// into `(stats, user_defined)` metric maps.
struct JmxMetricsCheck {
    task: CheckTask,
    queries: Vec<MetricQuery>,
    timeout: StdDuration,
    cached: Option<MetricMaps>,
}

impl JmxMetricsCheck {
    fn new(object: ObjectRef, spec: &JmxServiceSpec, schedule: CheckSchedule) -> Self {
        let mut queries = builtin_queries();
        queries.extend(spec.mbeans.iter().map(MetricQuery::from_spec));
        Self {
            task: CheckTask::new(object, None, schedule),
            queries,
            timeout: StdDuration::from_secs(spec.timeout),
            cached: None,
        }
    }

    async fn run(&mut self, host: &Arc<dyn ContainerHost>, proxy: &str) -> Option<MetricMaps> {
        if !self.task.shall_repeat() {
            return self.cached.clone();
        }

        self.task.report("jmx_metrics");
        self.task.begin_probe();

        let command = agent_command(&agent_url(), None, &self.queries);
        let exec = tokio::time::timeout(self.timeout, host.exec(proxy, &command)).await;

        let output = match exec {
            Ok(Ok(output)) if output.exit_code == 0 => output,
            Ok(Ok(output)) => {
                tracing::error!(proxy, stderr = %output.stderr, "managed-bean query failed");
                self.task.record_status(CheckResult::ExecFailure);
                self.cached = None;
                return None;
            }
            Ok(Err(err)) => {
                tracing::error!(proxy, error = %err, "error calling managed-bean agent");
                self.task.record_status(CheckResult::ExecFailure);
                self.cached = None;
                return None;
            }
            Err(_) => {
                tracing::error!(proxy, "managed-bean query timed out");
                self.task.record_status(CheckResult::ExecFailure);
                self.cached = None;
                return None;
            }
        };

        let records = match parse_metrics(&output.stdout) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(proxy, error = %err, "unparseable agent output");
                self.task.record_status(CheckResult::ExecFailure);
                self.cached = None;
                return None;
            }
        };

        let maps = collect_metrics(&self.queries, &records);
        self.task.record_status(CheckResult::NonBinary);
        self.cached = Some(maps.clone());
        Some(maps)
    }
}

/// Restart detection from the JVM start time.
struct JmxRestartedCheck {
    task: CheckTask,
    cached: Option<bool>,
}

impl JmxRestartedCheck {
    fn new(object: ObjectRef, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Negative), schedule),
            cached: None,
        }
    }

    async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        started_at: Option<DateTime<Utc>>,
        prev: Option<&JmxDescriptor>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("service_restarted");
        self.task.begin_probe();

        if let Some(prev) = prev {
            if prev.started_at != started_at {
                let name = self.task.object().name.clone();
                let planned = ctx.window.classify(self.task.object()).await;

                self.task.record_status(CheckResult::Positive);
                tracing::warn!(target_name = %name, "restarted ({})", planned.label());

                let started = started_at
                    .map_or_else(|| "unknown time".to_string(), |ts| ts.to_rfc3339());
                let message = format!(
                    "JMX service {name} has been restarted at {started} ({})",
                    planned.label()
                );
                self.task
                    .send_smart_alarm(ctx.alarms, &message, planned.severity())
                    .await;
                ctx.acc.fail();
                self.cached = Some(true);
                return self.cached;
            }
        }

        self.task.record_status(CheckResult::Negative);
        self.cached = Some(false);
        self.cached
    }
}

struct JmxCheckSet {
    metrics: JmxMetricsCheck,
    restarted: JmxRestartedCheck,
}

/// Periodically queries every configured managed-bean service.
pub struct JmxChecker {
    services: Vec<JmxServiceSpec>,
    pool: Arc<HostPool>,
    alarms: Arc<dyn AlarmSink>,
    window: Arc<RestartWindowService>,
    board: StatusBoard,
    checks: HashMap<String, JmxCheckSet>,
    accumulators: HashMap<String, StatusAccumulator>,
    prev_inventory: Option<HashMap<String, JmxDescriptor>>,
    stop: Arc<AtomicBool>,
}

impl JmxChecker {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        services: Vec<JmxServiceSpec>,
        pool: Arc<HostPool>,
        store: Arc<dyn StatusStore>,
        alarms: Arc<dyn AlarmSink>,
        window: Arc<RestartWindowService>,
        check_config: &CheckConfig,
        agent_config: &JmxAgentConfig,
    ) -> DomainResult<Self> {
        let board = StatusBoard::new(ObjectKind::Jmx, store, alarms.clone(), window.clone());
        let schedule = CheckSchedule::every(i64::try_from(check_config.repeat_interval_secs).unwrap_or(60))
            .with_resend_threshold(chrono::Duration::seconds(
                i64::try_from(check_config.resend_threshold_secs).unwrap_or(600),
            ));

        let mut checks = HashMap::new();
        let mut accumulators = HashMap::new();

        for service in &services {
            let object = ObjectRef::jmx(&service.service);
            checks.insert(
                service.service.clone(),
                JmxCheckSet {
                    metrics: JmxMetricsCheck::new(object.clone(), service, schedule),
                    restarted: JmxRestartedCheck::new(object.clone(), schedule),
                },
            );
            accumulators.insert(service.service.clone(), StatusAccumulator::new());

            board.seed_target(
                &service.service,
                TargetMeta {
                    friendly_name: None,
                    desc: service.desc.clone(),
                    panel: service.panel.clone(),
                    src: service.src.clone(),
                },
            );
        }

        board.warm_start().await?;

        let checker = Self {
            services,
            pool,
            alarms,
            window,
            board,
            checks,
            accumulators,
            prev_inventory: None,
            stop: Arc::new(AtomicBool::new(false)),
        };
        checker.build_agent_images(agent_config).await;
        Ok(checker)
    }

    /// Build the agent/proxy image on every host that runs a managed-bean
    /// service. Failures are logged; the affected services keep reporting
    /// execution failures until the image exists.
    async fn build_agent_images(&self, agent_config: &JmxAgentConfig) {
        if self.services.is_empty() {
            return;
        }

        let dockerfile = match tokio::fs::read(&agent_config.dockerfile).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(path = %agent_config.dockerfile, error = %err,
                    "agent Dockerfile unavailable, skipping image build");
                return;
            }
        };
        let jar = match tokio::fs::read(&agent_config.jar).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(path = %agent_config.jar, error = %err,
                    "agent jar unavailable, skipping image build");
                return;
            }
        };
        let jar_name = std::path::Path::new(&agent_config.jar)
            .file_name()
            .map_or_else(|| "agent.jar".to_string(), |n| n.to_string_lossy().into_owned());

        for service in &self.services {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let host = match self.pool.for_target(service.docker.as_deref()).await {
                Ok(Some(host)) => host,
                Ok(None) => continue,
                Err(err) => {
                    tracing::error!(target_name = %service.service, error = %err,
                        "cannot resolve host for agent image build");
                    continue;
                }
            };

            tracing::debug!(target_name = %service.service, "building managed-bean agent image");
            let context = match jmx_agent::build_context(&dockerfile, &jar, &jar_name) {
                Ok(context) => context,
                Err(err) => {
                    tracing::error!(error = %err, "failed to assemble agent build context");
                    return;
                }
            };
            let tag = format!("{}:latest", jmx_agent::AGENT_IMAGE);
            if let Err(err) = host.build_image(context, &tag).await {
                tracing::error!(error = %err, "failed to build managed-bean agent image");
            }
        }
    }

    /// Find or create the forwarder proxy container for one target.
    async fn ensure_proxy(
        &self,
        host: &Arc<dyn ContainerHost>,
        target_container: &str,
        port: u16,
    ) -> Option<String> {
        let proxy_name = jmx_agent::proxy_container_name(target_container);

        match host.container(&proxy_name).await {
            Ok(_) => Some(proxy_name),
            Err(HostError::NotFound(_)) => {
                let spec = LaunchSpec {
                    image: jmx_agent::AGENT_IMAGE.to_string(),
                    command: Some(jmx_agent::proxy_command(target_container, port)),
                    name: Some(proxy_name.clone()),
                    network_mode: Some(format!("container:{target_container}")),
                    auto_remove: true,
                    ..LaunchSpec::default()
                };
                match host.launch(&spec).await {
                    Ok(_) => Some(proxy_name),
                    Err(err) => {
                        tracing::error!(proxy = %proxy_name, error = %err,
                            "failed to start managed-bean proxy container");
                        None
                    }
                }
            }
            Err(err) => {
                tracing::error!(proxy = %proxy_name, error = %err,
                    "failed to look up managed-bean proxy container");
                None
            }
        }
    }

    async fn check_one(&mut self, spec: &JmxServiceSpec) -> DomainResult<Option<JmxDescriptor>> {
        let name = spec.service.clone();
        tracing::debug!(target_name = %name, "loading managed-bean metrics");

        self.accumulators[&name].reset();

        let host = self.pool.for_target(spec.docker.as_deref()).await?;
        if host.is_none() {
            tracing::warn!(target_name = %name, "container host not yet available");
        }

        let proxy = match (&spec.url, host.as_ref()) {
            (JmxUrl::Docker(url), Some(host)) => {
                self.ensure_proxy(host, &url.container, url.port).await
            }
            (JmxUrl::Docker(_), None) => None,
            (JmxUrl::Direct(url), _) => {
                // the query agent only runs inside a proxy container
                tracing::warn!(target_name = %name, url = %url,
                    "direct managed-bean URLs are not supported on this build");
                None
            }
        };

        let metrics = match (host.as_ref(), proxy.as_deref()) {
            (Some(host), Some(proxy)) => {
                let checks = self.checks.get_mut(&name).expect("check set exists");
                checks.metrics.run(host, proxy).await
            }
            _ => None,
        };

        let (stats, user_defined) = metrics.unwrap_or_default();
        let started_at = stats
            .get("started_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));

        let descriptor = JmxDescriptor {
            started_at,
            stats: stats.clone(),
            user_defined: user_defined.clone(),
        };

        if !stats.is_empty() {
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
            checks.restarted.run(&ctx, started_at, prev).await;
        }

        let all_ok = self.accumulators[&name].is_ok();
        if all_ok {
            tracing::debug!(target_name = %name, "all OK");
        }
        self.board.apply_cycle_outcome(&name, all_ok).await;

        self.board.update_entry(&name, |entry| {
            if !stats.is_empty() {
                entry.stats = serde_json::to_value(&stats).ok();
            }
            if !user_defined.is_empty() {
                entry.user_defined = serde_json::to_value(&user_defined).ok();
            }
        });

        Ok(Some(descriptor))
    }
}

#[async_trait]
impl Checker for JmxChecker {
    fn name(&self) -> &'static str {
        "jmx"
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Jmx
    }

    async fn check(&mut self) -> DomainResult<()> {
        let mut inventory = HashMap::new();
        let services = self.services.clone();

        for spec in &services {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(descriptor) = self.check_one(spec).await? {
                inventory.insert(spec.service.clone(), descriptor);
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
