//! Per-service checks: HTTP endpoints, TLS certificate expiry, TCP ports
//! and host-agent derived health.

use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::domain::models::{
    AlarmSeverity, CheckResult, DiskUsage, EndpointMode, EndpointSpec, ObjectRef, RuntimeStats,
    ZabbixSpec,
};
use crate::domain::ports::{ContainerHost, LaunchSpec};
use crate::services::check::{CheckContext, CheckSchedule, CheckTask};
use crate::services::container_checks::PROBE_IMAGE;
use crate::services::tls_probe;
use crate::services::zabbix::ZabbixClient;

/// Image used for containerized HTTP probes.
pub const CURL_IMAGE: &str = "curlimages/curl";

const PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(150);

/// Timeout of direct HTTP endpoint probes.
const DIRECT_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(120);

/// HTTP(S) endpoint availability, via the native client or a curl probe
/// container.
pub struct EndpointCheck {
    task: CheckTask,
    spec: EndpointSpec,
    http: reqwest::Client,
    cached: Option<bool>,
}

impl EndpointCheck {
    pub fn new(object: ObjectRef, spec: EndpointSpec, schedule: CheckSchedule) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DIRECT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            spec,
            http,
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        host: Option<&Arc<dyn ContainerHost>>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("endpoint_available");
        self.task.begin_probe();

        match self.spec.mode {
            EndpointMode::Direct => self.probe_direct(ctx).await,
            EndpointMode::Docker => self.probe_containerized(ctx, host).await,
        }
    }

    async fn probe_direct(&mut self, ctx: &CheckContext<'_>) -> Option<bool> {
        let url = self.spec.url.clone();
        let method = reqwest::Method::from_bytes(self.spec.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let mut request = self.http.request(method, &url);
        for (name, value) in &self.spec.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(basic) = self.spec.auth.as_ref().and_then(|auth| auth.basic.as_ref()) {
            request = request.basic_auth(&basic.username, Some(&basic.password));
        }
        if let Some(data) = &self.spec.data {
            request = request.body(data.clone());
        }

        match request.send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                if self.spec.expected_codes.contains(&code) {
                    tracing::debug!(url = %url, "endpoint is ok");
                    self.task.record_status(CheckResult::Positive);
                    self.cached = Some(true);
                } else {
                    tracing::debug!(url = %url, code, "endpoint responded with unexpected HTTP code");
                    self.task.record_status(CheckResult::Negative);
                    ctx.acc.fail();
                    self.cached = Some(false);
                }
            }
            Err(err) => {
                tracing::error!(url = %url, error = %err, "error requesting endpoint");
                self.task.record_status(CheckResult::Negative);
                ctx.acc.fail();
                self.cached = Some(false);
            }
        }
        self.cached
    }

    async fn probe_containerized(
        &mut self,
        ctx: &CheckContext<'_>,
        host: Option<&Arc<dyn ContainerHost>>,
    ) -> Option<bool> {
        let Some(host) = host else {
            self.task.record_status(CheckResult::ExecFailure);
            ctx.acc.fail();
            self.cached = None;
            return None;
        };

        let url = self.spec.url.clone();
        let mut args = vec![
            "-v".to_string(),
            "-s".to_string(),
            "-L".to_string(),
            "-X".to_string(),
            self.spec.method.clone(),
        ];
        for (name, value) in &self.spec.extra_headers {
            args.push("-H".to_string());
            args.push(format!("{name}: {value}"));
        }
        if let Some(data) = &self.spec.data {
            args.push("-d".to_string());
            args.push(data.clone());
        }
        if let Some(basic) = self.spec.auth.as_ref().and_then(|auth| auth.basic.as_ref()) {
            args.push("-u".to_string());
            args.push(format!("{}:{}", basic.username, basic.password));
        }
        if let Some(extra) = &self.spec.extra_curl_params {
            args.extend(extra.split_whitespace().map(String::from));
        }
        args.push(url.clone());

        let probe = match host
            .run_probe(&LaunchSpec::probe(CURL_IMAGE, args), PROBE_TIMEOUT)
            .await
        {
            Ok(probe) => probe,
            Err(err) => {
                tracing::error!(url = %url, error = %err, "error when running curl in container");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
                return None;
            }
        };

        if probe.status_code != 0 {
            tracing::error!(url = %url, exit_status = probe.status_code,
                "non-zero curl exit status");
            self.task.record_status(CheckResult::Negative);
            ctx.acc.fail();
            self.cached = Some(false);
            return self.cached;
        }

        let http_code = parse_curl_http_code(&probe.output);
        match http_code {
            Some(code) if self.spec.expected_codes.contains(&code) => {
                tracing::debug!(url = %url, "endpoint is ok");
                self.task.record_status(CheckResult::Positive);
                self.cached = Some(true);
            }
            other => {
                tracing::debug!(url = %url, code = ?other,
                    "endpoint responded with unexpected HTTP code");
                self.task.record_status(CheckResult::Negative);
                ctx.acc.fail();
                self.cached = Some(false);
            }
        }
        self.cached
    }
}

/// Last `< HTTP/x.y <code>` line of verbose curl output. Redirected
/// requests print one response block per hop; the last code is the one
/// that counts.
pub fn parse_curl_http_code(output: &str) -> Option<u16> {
    let pattern = Regex::new(r"^< HTTP/[0-9.]+\s+(\d+)").expect("static pattern compiles");
    output
        .lines()
        .filter_map(|line| {
            pattern
                .captures(line)
                .and_then(|captures| captures[1].parse::<u16>().ok())
        })
        .next_back()
}

/// TLS certificate expiry of an `https://` endpoint.
///
/// Runs on a long repeat interval; non-HTTPS endpoints are trivially
/// healthy.
pub struct CertificateExpiryCheck {
    task: CheckTask,
    url: String,
    warn_days: i64,
    cached: Option<bool>,
}

impl CertificateExpiryCheck {
    pub fn new(object: ObjectRef, url: String, warn_days: i64, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            url,
            warn_days,
            cached: None,
        }
    }

    pub async fn run(&mut self, ctx: &CheckContext<'_>) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("ssl_cert_expiration");
        self.task.begin_probe();

        let Ok(url) = reqwest::Url::parse(&self.url) else {
            tracing::error!(url = %self.url, "unparseable endpoint url");
            self.task.record_status(CheckResult::ExecFailure);
            ctx.acc.fail();
            self.cached = None;
            return None;
        };

        if url.scheme() != "https" {
            self.task.record_status(CheckResult::Positive);
            self.cached = Some(true);
            return self.cached;
        }

        let Some(hostname) = url.host_str() else {
            tracing::error!(url = %self.url, "endpoint url has no host");
            self.task.record_status(CheckResult::ExecFailure);
            ctx.acc.fail();
            self.cached = None;
            return None;
        };
        let port = url.port().unwrap_or(443);

        let not_after = match tls_probe::certificate_not_after(
            hostname,
            port,
            StdDuration::from_secs(30),
        )
        .await
        {
            Ok(not_after) => not_after,
            Err(err) => {
                tracing::error!(url = %self.url, error = %err,
                    "failed to retrieve certificate");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
                return None;
            }
        };

        let days_left = tls_probe::days_until_expiry(not_after, Utc::now());
        if days_left < self.warn_days {
            let name = self.task.object().name.clone();
            tracing::warn!(url = %self.url, days_left, "certificate is expiring");
            self.task.record_status(CheckResult::Negative);
            ctx.acc.fail();

            let planned = ctx.window.classify(self.task.object()).await;
            let message = format!(
                "service {name} certificate for {} expires in {days_left} days ({})",
                self.url,
                planned.label()
            );
            self.task
                .send_smart_alarm(ctx.alarms, &message, planned.severity())
                .await;
            self.cached = Some(false);
            return self.cached;
        }

        self.task.record_status(CheckResult::Positive);
        self.cached = Some(true);
        self.cached
    }
}

/// TCP reachability of `hostname:port`, probed from a throwaway container
/// on the assigned host (no shared network namespace).
pub struct ServicePortCheck {
    task: CheckTask,
    hostname: String,
    port: u16,
    cached: Option<bool>,
}

impl ServicePortCheck {
    pub fn new(object: ObjectRef, hostname: String, port: u16, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            hostname,
            port,
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        host: Option<&Arc<dyn ContainerHost>>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("port_open");
        self.task.begin_probe();

        let Some(host) = host else {
            self.task.record_status(CheckResult::ExecFailure);
            ctx.acc.fail();
            self.cached = None;
            return None;
        };

        let spec = LaunchSpec::probe(
            PROBE_IMAGE,
            vec![
                "nc".to_string(),
                "-zw10".to_string(),
                self.hostname.clone(),
                self.port.to_string(),
            ],
        );

        let probe = match host.run_probe(&spec, PROBE_TIMEOUT).await {
            Ok(probe) => probe,
            Err(err) => {
                tracing::error!(error = %err, "failed to run port checking container");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
                return None;
            }
        };

        let name = self.task.object().name.clone();
        let (hostname, port) = (self.hostname.clone(), self.port);
        match probe.status_code {
            0 => {
                tracing::debug!(hostname = %hostname, port, "port is open");
                self.task.record_status(CheckResult::Positive);
                self.cached = Some(true);
            }
            1 => {
                tracing::debug!(hostname = %hostname, port, "port is NOT open");
                self.task.record_status(CheckResult::Negative);

                let planned = ctx.window.classify(self.task.object()).await;
                tracing::warn!(target_name = %name, port, "is DOWN ({})", planned.label());
                let message = format!(
                    "server {name} is not responding on port {port} ({})",
                    planned.label()
                );
                self.task
                    .send_smart_alarm(ctx.alarms, &message, planned.severity())
                    .await;
                ctx.acc.fail();
                self.cached = Some(false);
            }
            other => {
                tracing::error!(hostname = %hostname, port, exit_status = other,
                    "unexpected port probe exit status");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = None;
            }
        }
        self.cached
    }
}

/// One port probed through the host agent (`net.tcp.port[...]`).
pub struct AgentPortCheck {
    task: CheckTask,
    port_arg: String,
    cached: Option<bool>,
}

impl AgentPortCheck {
    pub fn new(object: ObjectRef, port_arg: String, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            port_arg,
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        items: &BTreeMap<String, Option<f64>>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("port_open_agent");
        self.task.begin_probe();

        let name = self.task.object().name.clone();
        let key = format!("net.tcp.port[{}]", self.port_arg);
        let value = items.get(&key).copied().flatten();

        match value {
            None => {
                tracing::warn!(target_name = %name, port = %self.port_arg,
                    "port is not monitored by the host agent");
                self.task.record_status(CheckResult::ExecFailure);
                ctx.acc.fail();
                self.cached = Some(false);
            }
            Some(status) if (status - 1.0).abs() < f64::EPSILON => {
                self.task.record_status(CheckResult::Positive);
                self.cached = Some(true);
            }
            Some(_) => {
                self.task.record_status(CheckResult::Negative);

                let planned = ctx.window.classify(self.task.object()).await;
                tracing::warn!(target_name = %name, port = %self.port_arg,
                    "port (host-agent check) is DOWN ({})", planned.label());
                let message = format!(
                    "service {name} host-agent check: port {} is not open ({})",
                    self.port_arg,
                    planned.label()
                );
                self.task
                    .send_smart_alarm(ctx.alarms, &message, planned.severity())
                    .await;
                ctx.acc.fail();
                self.cached = Some(false);
            }
        }
        self.cached
    }
}

/// One mount point judged against its usage threshold, fed by host-agent
/// vfs sizes.
pub struct AgentDiskCheck {
    task: CheckTask,
    mount_point: String,
    threshold: f64,
    cached: Option<bool>,
}

impl AgentDiskCheck {
    pub fn new(
        object: ObjectRef,
        mount_point: String,
        threshold: Option<f64>,
        default_threshold: f64,
        schedule: CheckSchedule,
    ) -> Self {
        Self {
            task: CheckTask::new(object, Some(CheckResult::Positive), schedule),
            mount_point,
            threshold: threshold.unwrap_or(default_threshold),
            cached: None,
        }
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        usage_percent: Option<f64>,
    ) -> Option<bool> {
        if !self.task.shall_repeat() {
            self.task.propagate_cached(ctx.acc);
            return self.cached;
        }

        self.task.report("disk_space_agent");
        self.task.begin_probe();

        match usage_percent {
            Some(percentage) if percentage > self.threshold => {
                let name = self.task.object().name.clone();
                tracing::warn!(target_name = %name, mount = %self.mount_point,
                    "disk usage is too high ({percentage:.2}%)");
                self.task.record_status(CheckResult::Negative);
                let message = format!(
                    "service {name} disk {} usage is too high ({percentage:.2}%)",
                    self.mount_point
                );
                self.task
                    .send_smart_alarm(ctx.alarms, &message, AlarmSeverity::Alarm)
                    .await;
                ctx.acc.fail();
                self.cached = Some(false);
            }
            _ => {
                self.task.record_status(CheckResult::Positive);
                self.cached = Some(true);
            }
        }
        self.cached
    }
}

/// The full host-agent statistics sweep for one service: queries every
/// configured item, feeds the port and disk sub-checks and assembles the
/// stats record.
pub struct AgentStatsCheck {
    task: CheckTask,
    hostname: String,
    spec: ZabbixSpec,
    cached: Option<RuntimeStats>,
}

impl AgentStatsCheck {
    pub fn new(object: ObjectRef, hostname: String, spec: ZabbixSpec, schedule: CheckSchedule) -> Self {
        Self {
            task: CheckTask::new(object, None, schedule),
            hostname,
            spec,
            cached: None,
        }
    }

    fn mount_points(&self) -> Vec<(String, Option<f64>)> {
        let mut mounts: Vec<(String, Option<f64>)> = self
            .spec
            .disk_free
            .iter()
            .map(|df| (df.mount.clone(), Some(df.threshold)))
            .collect();
        for mount in &self.spec.mount_points {
            if !mounts.iter().any(|(name, _)| name == mount) {
                mounts.push((mount.clone(), None));
            }
        }
        mounts
    }

    fn item_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = [
            "vm.memory.size",
            "vm.memory.size[free]",
            "proc.num",
            "system.cpu.load",
            "system.cpu.util",
            "system.uptime",
            "net.if.in[enp3s0,bytes]",
            "net.if.out[enp3s0,bytes]",
            "vfs.dev.read[all,sectors]",
            "vfs.dev.write[all,sectors]",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        for (mount, _) in self.mount_points() {
            keys.push(format!("vfs.fs.size[{mount},total]"));
            keys.push(format!("vfs.fs.size[{mount},free]"));
        }
        for port in &self.spec.ports {
            keys.push(format!("net.tcp.port[{}]", port.item_arg()));
        }
        for nic in &self.spec.nic {
            keys.push(format!("net.if.in[{nic},bytes]"));
            keys.push(format!("net.if.out[{nic},bytes]"));
        }
        keys
    }

    pub async fn run(
        &mut self,
        ctx: &CheckContext<'_>,
        port_checks: &mut BTreeMap<String, AgentPortCheck>,
        disk_checks: &mut BTreeMap<String, AgentDiskCheck>,
    ) -> Option<RuntimeStats> {
        if !self.task.shall_repeat() {
            return self.cached.clone();
        }

        self.task.report("host_agent_stats");
        self.task.begin_probe();

        let client = ZabbixClient::new(self.hostname.clone()).with_port(self.spec.port);
        let items = client.fetch_items(&self.item_keys()).await;

        for port in &self.spec.ports {
            if let Some(check) = port_checks.get_mut(&port.item_arg()) {
                check.run(ctx, &items).await;
            }
        }

        let get = |key: &str| items.get(key).copied().flatten();

        let mut disk_usage = Vec::new();
        for (mount, _) in self.mount_points() {
            let total = get(&format!("vfs.fs.size[{mount},total]"));
            let free = get(&format!("vfs.fs.size[{mount},free]"));
            if let (Some(total), Some(free)) = (total, free) {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let usage = DiskUsage::new(&mount, total as u64, (total - free) as u64);
                if let Some(check) = disk_checks.get_mut(&mount) {
                    check.run(ctx, usage.usage_percentage).await;
                }
                disk_usage.push(usage);
            }
        }

        let mut network_received = 0u64;
        let mut network_sent = 0u64;
        for nic in &self.spec.nic {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                network_received += get(&format!("net.if.in[{nic},bytes]")).unwrap_or(0.0) as u64;
                network_sent += get(&format!("net.if.out[{nic},bytes]")).unwrap_or(0.0) as u64;
            }
        }

        let memory_total = get("vm.memory.size");
        let memory_free = get("vm.memory.size[free]");
        let memory_usage_percent = match (memory_free, memory_total) {
            (Some(free), Some(total)) if total > 0.0 => Some(100.0 * free / total),
            _ => Some(0.0),
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let stats = RuntimeStats {
            cpu_usage_percent: get("system.cpu.load"),
            memory_usage_bytes: memory_total.map(|v| v as u64),
            memory_available_bytes: memory_free.map(|v| v as u64),
            memory_usage_percent,
            pids: get("proc.num").map(|v| v as u64),
            network_received_bytes: Some(network_received),
            network_sent_bytes: Some(network_sent),
            blkio_written_bytes: get("vfs.dev.write[all,sectors]").map(|v| v as u64),
            blkio_read_bytes: get("vfs.dev.read[all,sectors]").map(|v| v as u64),
            uptime_seconds: get("system.uptime"),
            disk_usage,
        };

        self.task.record_status(CheckResult::NonBinary);
        self.cached = Some(stats.clone());
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_curl_last_http_code_wins() {
        let output = "\
* Connected to x\n\
< HTTP/1.1 302 Found\n\
< Location: /other\n\
* Issue another request\n\
< HTTP/1.1 200 OK\n\
< Content-Type: text/html\n";
        assert_eq!(parse_curl_http_code(output), Some(200));
    }

    #[test]
    fn test_parse_curl_http2_line() {
        assert_eq!(parse_curl_http_code("< HTTP/2 204\n"), Some(204));
    }

    #[test]
    fn test_parse_curl_no_response_line() {
        assert_eq!(parse_curl_http_code("curl: (7) connection refused"), None);
    }
}
