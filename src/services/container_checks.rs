//! Per-container checks: disk space, port reachability, image and source
//! updates, and status transition detection.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::domain::models::{
    AlarmSeverity, CheckResult, ContainerDescriptor, DiskUsage, ImageUpdateSpec, ObjectRef,
    SourceUpdateSpec,
};
use crate::domain::ports::{
    ContainerDetails, ContainerHost, HostError, LaunchSpec, RegistryAuth,
};
use crate::services::check::{CheckContext, CheckSchedule, CheckTask};
use crate::services::gitlab::SourceCompareClient;

/// Image used for throwaway probe containers.
pub const PROBE_IMAGE: &str = "busybox:latest";

/// How long a probe container may run before it is abandoned.
const PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// Free disk space of one bind-mount source, measured by running `df`
/// in a probe container with the source mounted read-only.
pub struct DiskSpaceCheck {
    task: CheckTask,
    thresholds: HashMap<String, f64>,
    default_threshold: f64,
    cached: Option<DiskUsage>,
}

impl DiskSpaceCheck {
    pub fn new(
        object: ObjectRef,
        thresholds: HashMap<String, f64>,
        default_threshold: f64,
        schedule: CheckSchedule,
    ) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            thresholds,
            default_threshold,
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        host: &Arc<dyn ContainerHost>,
        source_path: &str,
    ) -> Option<DiskUsage> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached.clone();
        }

        self.task.report("disk_space");
        self.task.begin_probe();

        let spec = LaunchSpec::probe(
            PROBE_IMAGE,
            vec![
                "df".to_string(),
                "-P".to_string(),
                "/dir_to_check".to_string(),
            ],
        )
        .with_bind(format!("{source_path}:/dir_to_check:ro"));

        let probe = match host.run_probe(&spec, PROBE_TIMEOUT).await {
            Ok(probe) => probe,
            Err(err) => {
                tracing::error!(error = %err, "failed to retrieve disk space");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
                return None;
            }
        };

        let Some(usage) = parse_df_output(&probe.output) else {
            tracing::error!(output = %probe.output, "unparseable df output");
            self.task.record_status(CheckResult::ExecFailure);
            ctx.acc.fail();
            self.cached = None;
            return None;
        };

        let threshold = self
            .thresholds
            .get(&usage.mount_point)
            .copied()
            .unwrap_or(self.default_threshold);

        match usage.usage_percentage {
            Some(percentage) if percentage > threshold => {
                let name = self.task.object().name.clone();
                tracing::warn!(target_name = %name, mount = %usage.mount_point,
                    "disk usage is too high ({percentage:.2}%)");
                self.task.record_status(CheckResult::Negative);
                let message = format!(
                    "container {name} disk {} usage is too high ({percentage:.2}%)",
                    usage.mount_point
                );
                self.task
                    .send_smart_alarm(ctx.alarms, &message, AlarmSeverity::Alarm)
                    .await;
                ctx.acc.fail();
            }
            _ => {
                self.task.record_status(CheckResult::Positive);
            }
        }

        self.cached = Some(usage.clone());
        Some(usage)
    }
}

/// Parse the second line of `df -P` output into a usage record.
///
/// Block counts are 1024-byte units. A zero total (pseudo-filesystems)
/// yields no percentage rather than a division by zero.
pub fn parse_df_output(output: &str) -> Option<DiskUsage> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let total_bytes = fields[1].parse::<u64>().ok()? * 1024;
    let used_bytes = fields[2].parse::<u64>().ok()? * 1024;
    Some(DiskUsage::new(fields[0], total_bytes, used_bytes))
}

/// TCP reachability of one port, probed from inside the target's network
/// namespace with a 10 second connect timeout.
pub struct ContainerPortCheck {
    task: CheckTask,
    port: u16,
    cached: Option<bool>,
}

impl ContainerPortCheck {
    pub fn new(object: ObjectRef, port: u16, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            port,
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        host: &Arc<dyn ContainerHost>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("port_open");
        self.task.begin_probe();

        let name = self.task.object().name.clone();
        let port = self.port;
        let spec = LaunchSpec::probe(
            PROBE_IMAGE,
            vec![
                "nc".to_string(),
                "-zw10".to_string(),
                name.clone(),
                port.to_string(),
            ],
        )
        .with_network_mode(format!("container:{name}"));

        let probe = match host.run_probe(&spec, PROBE_TIMEOUT).await {
            Ok(probe) => probe,
            Err(err) => {
                tracing::error!(error = %err, "failed to check open port");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
                return None;
            }
        };

        match probe.status_code {
            0 => {
                tracing::debug!(target_name = %name, port, "port is open");
                self.task.record_status(CheckResult::Positive);
                self.cached = Some(true);
            }
            1 => {
                tracing::debug!(target_name = %name, port, "port is NOT open");
                self.task.record_status(CheckResult::Negative);

                let planned = ctx.window.classify(self.task.object()).await;
                tracing::warn!(target_name = %name, port, "port is DOWN ({})", planned.label());
                let message = format!(
                    "container {name} is not responding on port {port} ({})",
                    planned.label()
                );
                self.task
                    .send_smart_alarm(ctx.alarms, &message, planned.severity())
                    .await;
                ctx.acc.fail();
                self.cached = Some(false);
            }
            other => {
                tracing::error!(target_name = %name, port, exit_status = other,
                    "unexpected port probe exit status");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
            }
        }
        self.cached
    }
}

/// Whether a newer image is available for the container, either by
/// registry digest comparison or by matching newer tags against a
/// configured pattern.
///
/// Registry scans are rate-gated separately from the check repeat
/// interval. If any repo tag shows a newer image, an update is reported.
pub struct ImageUpdateCheck {
    task: CheckTask,
    spec: ImageUpdateSpec,
    tag_pattern: Option<Regex>,
    scan_interval: Duration,
    last_repo_scan: Option<DateTime<Utc>>,
    cached: Option<bool>,
}

impl ImageUpdateCheck {
    pub fn new(
        object: ObjectRef,
        spec: Option<ImageUpdateSpec>,
        scan_interval_minutes: u64,
        schedule: CheckSchedule,
    ) -> Self {
        let spec = spec.unwrap_or_default();
        let tag_pattern = spec
            .image_tag_pattern
            .as_deref()
            .and_then(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::error!(pattern, error = %err, "invalid image tag pattern");
                    None
                }
            });
        Self {
            task: CheckTask::new(object, None, schedule),
            spec,
            tag_pattern,
            scan_interval: Duration::minutes(i64::try_from(scan_interval_minutes).unwrap_or(10)),
            last_repo_scan: None,
            cached: None,
        }
    }

    fn auth(&self) -> Option<RegistryAuth> {
        match (&self.spec.username, &self.spec.password) {
            (Some(username), Some(password)) => Some(RegistryAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub async fn run(
        &mut self,
        host: &Arc<dyn ContainerHost>,
        container: &ContainerDetails,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            return self.cached;
        }

        self.task.report("image_update_available");
        self.task.begin_probe();

        let now = Utc::now();
        let scan_due = self
            .last_repo_scan
            .is_none_or(|last| now - last > self.scan_interval);
        if !scan_due {
            // between scans, answer from the recorded status
            self.cached = match self.task.last_status() {
                CheckResult::Positive => Some(true),
                CheckResult::Negative => Some(false),
                _ => None,
            };
            return self.cached;
        }
        self.last_repo_scan = Some(now);

        let image = match host.image(&container.image).await {
            Ok(image) => image,
            Err(err) => {
                tracing::error!(error = %err, "failed to inspect image");
                self.task.record_status(CheckResult::ExecFailure);
                self.cached = None;
                return None;
            }
        };

        if image.repo_digests.is_empty() {
            self.task.record_status(CheckResult::Negative);
            self.cached = Some(false);
            return self.cached;
        }

        for (index, tag) in image.repo_tags.iter().enumerate() {
            let Some(digest) = image.repo_digests.get(index) else {
                break;
            };
            let (source_repo, image_id) = match digest.split_once('@') {
                Some(parts) => parts,
                None => continue,
            };

            let newer = if let Some(pattern) = &self.tag_pattern {
                self.newer_image_matching(host, source_repo, pattern, image.created)
                    .await
            } else {
                self.registry_digest_changed(host, tag, image_id).await
            };

            match newer {
                Ok(true) => {
                    self.task.record_status(CheckResult::Positive);
                    self.cached = Some(true);
                    return self.cached;
                }
                Ok(false) => {}
                Err(()) => {
                    self.task.record_status(CheckResult::ExecFailure);
                    self.cached = None;
                    return None;
                }
            }
        }

        self.task.record_status(CheckResult::Negative);
        self.cached = Some(false);
        self.cached
    }

    async fn registry_digest_changed(
        &self,
        host: &Arc<dyn ContainerHost>,
        tag: &str,
        image_id: &str,
    ) -> Result<bool, ()> {
        match host.registry_digest(tag, self.auth().as_ref()).await {
            Ok(remote_digest) => {
                if remote_digest != image_id {
                    tracing::debug!(tag, "update available for image");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(HostError::RateLimited) => {
                tracing::warn!(
                    "too many requests to image registry, \
                     see https://www.docker.com/increase-rate-limits/"
                );
                Err(())
            }
            Err(err) => {
                tracing::error!(tag, error = %err, "failed to retrieve registry data for image");
                Err(())
            }
        }
    }

    async fn newer_image_matching(
        &self,
        host: &Arc<dyn ContainerHost>,
        source_repo: &str,
        pattern: &Regex,
        current_created: Option<DateTime<Utc>>,
    ) -> Result<bool, ()> {
        let images = match host.list_images(source_repo).await {
            Ok(images) => images,
            Err(err) => {
                tracing::error!(repo = source_repo, error = %err, "failed to list source repo images");
                return Err(());
            }
        };

        let Some(current_created) = current_created else {
            return Ok(false);
        };

        for image in images {
            let tag_matches = image
                .repo_tags
                .iter()
                .filter_map(|repo_tag| repo_tag.split(':').next_back())
                .any(|tag| pattern.is_match(tag));
            if !tag_matches {
                continue;
            }
            if let Some(created) = image.created {
                if created > current_created {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Whether the dev branch of the configured source project is ahead of
/// the deploy branch. Unconfigured targets report not-supported.
pub struct SourceUpdateCheck {
    task: CheckTask,
    spec: Option<SourceUpdateSpec>,
    client: Arc<SourceCompareClient>,
    cached: Option<bool>,
}

impl SourceUpdateCheck {
    pub fn new(
        object: ObjectRef,
        spec: Option<SourceUpdateSpec>,
        client: Arc<SourceCompareClient>,
        schedule: CheckSchedule,
    ) -> Self {
        Self {
            task: CheckTask::new(object, None, schedule),
            spec,
            client,
            cached: None,
        }
    }

    pub async fn run(&mut self) -> Option<bool> {
        if !self.task.shall_repeat() {
            return self.cached;
        }

        self.task.report("source_update_available");
        self.task.begin_probe();

        let Some(spec) = &self.spec else {
            self.task.record_status(CheckResult::NotSupported);
            self.cached = None;
            return None;
        };

        match self.client.updates_available(spec).await {
            Some(available) => {
                self.task.record_status(if available {
                    CheckResult::Positive
                } else {
                    CheckResult::Negative
                });
                self.cached = Some(available);
            }
            None => {
                self.task.record_status(CheckResult::ExecFailure);
                self.cached = None;
            }
        }
        self.cached
    }
}

/// Raw engine status transition since the previous cycle.
pub struct StatusChangedCheck {
    task: CheckTask,
    cached: Option<bool>,
}

impl StatusChangedCheck {
    pub fn new(object: ObjectRef, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Negative), schedule),
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        cur_status: &str,
        prev: Option<&ContainerDescriptor>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("status_changed");
        self.task.begin_probe();

        if let Some(prev) = prev {
            if prev.status != cur_status {
                self.task.record_status(CheckResult::Positive);

                let name = self.task.object().name.clone();
                let planned = ctx.window.classify(self.task.object()).await;
                tracing::warn!(target_name = %name,
                    "status changed from {} to {cur_status} ({})", prev.status, planned.label());

                if cur_status != "running" {
                    let message = format!(
                        "container {name} status changed from {} to {cur_status} ({})",
                        prev.status,
                        planned.label()
                    );
                    self.task
                        .send_smart_alarm(ctx.alarms, &message, planned.severity())
                        .await;
                    ctx.acc.fail();
                }
                self.cached = Some(true);
                return self.cached;
            }
        }

        self.task.record_status(CheckResult::Negative);
        self.cached = Some(false);
        self.cached
    }
}

/// Restart detection: the engine start timestamp moved since the
/// previous cycle while the container had been running.
pub struct RestartedCheck {
    task: CheckTask,
    cached: Option<bool>,
}

impl RestartedCheck {
    pub fn new(object: ObjectRef, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Negative), schedule),
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        started_at: Option<DateTime<Utc>>,
        prev: Option<&ContainerDescriptor>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("was_restarted");
        self.task.begin_probe();

        if let Some(prev) = prev {
            if prev.status == "running" && prev.started_at != started_at {
                let name = self.task.object().name.clone();
                let planned = ctx.window.classify(self.task.object()).await;

                self.task.record_status(CheckResult::Positive);
                tracing::warn!(target_name = %name, "restarted ({})", planned.label());

                let started = started_at
                    .map_or_else(|| "unknown time".to_string(), |ts| ts.to_rfc3339());
                let message = format!(
                    "container {name} has been restarted at {started} ({})",
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

/// The container is not in the `running` state.
pub struct NotRunningCheck {
    task: CheckTask,
    cached: Option<bool>,
}

impl NotRunningCheck {
    pub fn new(object: ObjectRef, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Negative), schedule),
            cached: None,
        }
    }

    pub async fn run(&mut self, ctx: &CheckContext<'_>, cur_status: &str) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("status_is_not_running");
        self.task.begin_probe();

        if cur_status == "running" {
            self.task.record_status(CheckResult::Negative);
            self.cached = Some(false);
            return self.cached;
        }

        self.task.record_status(CheckResult::Positive);

        let name = self.task.object().name.clone();
        let planned = ctx.window.classify(self.task.object()).await;
        tracing::warn!(target_name = %name,
            "status is not RUNNING ({cur_status}) ({})", planned.label());

        let message = format!(
            "container {name} status is not RUNNING ({cur_status}) ({})",
            planned.label()
        );
        self.task
            .send_smart_alarm(ctx.alarms, &message, planned.severity())
            .await;
        ctx.acc.fail();
        self.cached = Some(true);
        self.cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_df_output() {
        let output = "Filesystem     1024-blocks    Used Available Capacity Mounted on\n\
                      /dev/sda1          1000000  250000    750000      25% /dir_to_check\n";
        let usage = parse_df_output(output).unwrap();
        assert_eq!(usage.mount_point, "/dev/sda1");
        assert_eq!(usage.total_bytes, 1_024_000_000);
        assert_eq!(usage.used_bytes, 256_000_000);
        assert_eq!(usage.usage_percentage, Some(25.0));
    }

    #[test]
    fn test_parse_df_zero_total() {
        let output = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                      overlay 0 0 0 - /dir_to_check\n";
        let usage = parse_df_output(output).unwrap();
        assert_eq!(usage.usage_percentage, None);
    }

    #[test]
    fn test_parse_df_rejects_garbage() {
        assert!(parse_df_output("no table here").is_none());
        assert!(parse_df_output("").is_none());
    }
}
