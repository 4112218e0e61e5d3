//! The monitoring layout: which hosts, containers and services to observe.
//!
//! The layout is assembled from one or more YAML documents merged
//! additively (arrays concatenate, maps deep-merge). Key names follow the
//! established configuration surface of the deployed dashboards, which is
//! why most of them are kebab-case.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};

/// Reserved pool id for the default container host.
pub const DEFAULT_HOST_ID: &str = "~DEFAULT~";

/// Top-level monitoring layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dockers: Vec<HostEntry>,
    #[serde(default)]
    pub blueprint: Vec<ContainerSpec>,
    #[serde(default)]
    pub jmx: Vec<JmxServiceSpec>,
    #[serde(default)]
    pub services: Vec<WebServiceSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub readme: Option<String>,
}

const fn default_true() -> bool {
    true
}

/// One configured container host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub default: bool,
}

/// Per-mount-point disk usage threshold, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountThreshold {
    pub mount: String,
    pub threshold: f64,
}

/// Registry credentials and tag matching for the image update check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageUpdateSpec {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub image_tag_pattern: Option<String>,
}

/// Source-host branch comparison for the source update check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SourceUpdateSpec {
    pub url: String,
    pub token: String,
    pub project_id: u64,
    pub dev_branch: String,
    pub deploy_branch: String,
}

/// One monitored container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub panel: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    /// Pool id of the host running this container; default host if unset.
    #[serde(default)]
    pub docker: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub disk_free: Vec<MountThreshold>,
    #[serde(default)]
    pub gitlab_update_check: Option<SourceUpdateSpec>,
    #[serde(default)]
    pub image_update_check: Option<ImageUpdateSpec>,
}

/// How to reach a managed-bean endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum JmxUrl {
    /// Through a forwarder proxy container on the target's host.
    Docker(JmxDockerUrl),
    /// A direct JMX service URL.
    Direct(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JmxDockerUrl {
    pub container: String,
    pub port: u16,
}

/// One user-defined managed-bean query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MbeanSpec {
    pub name: String,
    pub our_alias: String,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub metric_labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub attribute_key: Option<String>,
    /// Key into the conversion registry, applied to the raw value.
    #[serde(default)]
    pub conv: Option<String>,
}

/// One monitored managed-bean service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JmxServiceSpec {
    pub service: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub panel: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub docker: Option<String>,
    pub url: JmxUrl,
    #[serde(default)]
    pub mbeans: Vec<MbeanSpec>,
    /// Per-service query timeout in seconds.
    #[serde(default = "default_jmx_timeout")]
    pub timeout: u64,
}

const fn default_jmx_timeout() -> u64 {
    60
}

/// Basic authentication credentials for an HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuthSpec {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointAuthSpec {
    #[serde(default)]
    pub basic: Option<BasicAuthSpec>,
}

/// Transport used for HTTP endpoint probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    /// Native HTTP client from the monitor process.
    Direct,
    /// A curl probe container launched on the assigned host.
    #[default]
    Docker,
}

/// One monitored HTTP(S) endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Request body pushed with the configured method.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub extra_curl_params: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<EndpointAuthSpec>,
    #[serde(rename = "type", default)]
    pub mode: EndpointMode,
    #[serde(rename = "exp_code", default = "default_expected_codes")]
    pub expected_codes: Vec<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_codes() -> Vec<u16> {
    vec![200, 201, 204]
}

/// Host-agent statistics collection for a web service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ZabbixSpec {
    /// Agent port on the service host.
    #[serde(default = "default_agent_port")]
    pub port: u16,
    /// Ports probed via `net.tcp.port[...]`; either a port or `ip:port`.
    #[serde(default)]
    pub ports: Vec<ZabbixPort>,
    #[serde(default)]
    pub disk_free: Vec<MountThreshold>,
    /// Mount points observed without an explicit threshold.
    #[serde(default)]
    pub mount_points: Vec<String>,
    #[serde(default)]
    pub nic: Vec<String>,
}

const fn default_agent_port() -> u16 {
    10050
}

/// A host-agent port probe target, either a bare port or `ip:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ZabbixPort {
    Number(u16),
    Spec(String),
}

impl ZabbixPort {
    /// Normalised `[ip,]port` argument of the `net.tcp.port` item key.
    pub fn item_arg(&self) -> String {
        match self {
            Self::Number(port) => format!(",{port}"),
            Self::Spec(spec) => {
                let spec = spec.replace(':', ",");
                if spec.contains(',') {
                    spec
                } else {
                    format!(",{spec}")
                }
            }
        }
    }
}

/// One monitored web service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WebServiceSpec {
    pub name: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub panel: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub docker: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    pub zabbix: Option<ZabbixSpec>,
    #[serde(default)]
    pub gitlab_update_check: Option<SourceUpdateSpec>,
}

/// An on-demand action executed in a throwaway container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub docker: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub volumes_from: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub environment: Vec<String>,
    /// Container paths collected into the artifact bundle after the run.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl Layout {
    /// Validate cross-field constraints that the type system cannot express.
    ///
    /// A violation is fatal at load time; the process must refuse to start.
    pub fn validate(&self) -> DomainResult<()> {
        for host in &self.dockers {
            if host.id == DEFAULT_HOST_ID {
                return Err(DomainError::ValidationFailed(format!(
                    "host id {DEFAULT_HOST_ID} is reserved for the default host"
                )));
            }
        }
        if self.dockers.iter().filter(|h| h.default).count() > 1 {
            return Err(DomainError::ValidationFailed(
                "cannot have more than one default container host".to_string(),
            ));
        }

        for threshold in self
            .blueprint
            .iter()
            .flat_map(|c| &c.disk_free)
            .chain(self.services.iter().filter_map(|s| s.zabbix.as_ref()).flat_map(|z| &z.disk_free))
        {
            if !(0.0..=100.0).contains(&threshold.threshold) {
                return Err(DomainError::ValidationFailed(format!(
                    "disk threshold for {} must be between 0 and 100",
                    threshold.mount
                )));
            }
        }

        for service in &self.services {
            let needs_hostname = !service.ports.is_empty() || service.zabbix.is_some();
            if needs_hostname && service.hostname.is_none() {
                return Err(DomainError::ValidationFailed(format!(
                    "service {} declares port or host-agent checks but no hostname",
                    service.name
                )));
            }
        }

        for action in &self.actions {
            if let Some(id) = &action.id {
                if !id.chars().all(char::is_alphanumeric) {
                    return Err(DomainError::ValidationFailed(format!(
                        "action id \"{id}\" is invalid: it may contain only letters and numbers"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_host_id_rejected() {
        let layout = Layout {
            dockers: vec![HostEntry {
                id: DEFAULT_HOST_ID.to_string(),
                url: None,
                default: false,
            }],
            ..Layout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_multiple_default_hosts_rejected() {
        let layout = Layout {
            dockers: vec![
                HostEntry {
                    id: "a".into(),
                    url: None,
                    default: true,
                },
                HostEntry {
                    id: "b".into(),
                    url: None,
                    default: true,
                },
            ],
            ..Layout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_service_with_ports_requires_hostname() {
        let yaml = r"
services:
  - name: web
    ports: [443]
";
        let layout: Layout = serde_yaml::from_str(yaml).unwrap();
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_zabbix_port_item_arg() {
        assert_eq!(ZabbixPort::Number(8080).item_arg(), ",8080");
        assert_eq!(ZabbixPort::Spec("127.0.0.1:22".into()).item_arg(), "127.0.0.1,22");
        assert_eq!(ZabbixPort::Spec("22".into()).item_arg(), ",22");
    }

    #[test]
    fn test_endpoint_defaults() {
        let yaml = r"
url: https://example.org/health
";
        let ep: EndpointSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(ep.method, "GET");
        assert_eq!(ep.expected_codes, vec![200, 201, 204]);
        assert_eq!(ep.mode, EndpointMode::Docker);
    }

    #[test]
    fn test_jmx_url_variants() {
        let docker: JmxUrl = serde_yaml::from_str("docker: { container: app, port: 9010 }").unwrap();
        assert!(matches!(docker, JmxUrl::Docker(_)));

        let direct: JmxUrl =
            serde_yaml::from_str("direct: service:jmx:rmi:///jndi/rmi://host:1099/jmxrmi").unwrap();
        assert!(matches!(direct, JmxUrl::Direct(_)));
    }
}
