//! Managed-bean query agent plumbing: query assembly, the in-container
//! command line, output parsing and the agent image build context.
//!
//! The monitor never speaks the managed-bean protocol itself. A query
//! agent jar is executed inside a TCP-forwarder proxy container that
//! shares the target's network namespace, and its JSON output is parsed
//! here.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::domain::models::MbeanSpec;
use crate::services::conversions;

/// Image tag of the agent/proxy image, built once per host at startup.
pub const AGENT_IMAGE: &str = "argus-jmx-agent";

/// Fixed port the forwarder proxy listens on.
pub const AGENT_PORT: u16 = 61234;

/// Location of the query jar inside the agent image.
pub const AGENT_JAR_PATH: &str = "/opt/jmxquery/JMXQuery-0.1.8.jar";

/// Connection URI the agent uses through the forwarder.
pub fn agent_url() -> String {
    format!("service:jmx:rmi:///jndi/rmi://localhost:{AGENT_PORT}/jmxrmi")
}

/// Name of the proxy container maintained for one target.
pub fn proxy_container_name(target: &str) -> String {
    format!("{target}-argus-jmxproxy")
}

/// Forwarder command executed by the proxy container.
pub fn proxy_command(target: &str, port: u16) -> Vec<String> {
    vec![
        "socat".to_string(),
        format!("tcp-listen:{AGENT_PORT},fork,reuseaddr"),
        format!("tcp-connect:{target}:{port}"),
    ]
}

/// Whether a metric feeds the fixed statistics set or a user-defined slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricClass {
    Stat,
    User,
}

/// One managed-bean query plus how to file its result.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub mbean_name: String,
    pub alias: String,
    pub metric_name: Option<String>,
    pub metric_labels: Option<HashMap<String, String>>,
    pub attribute: Option<String>,
    pub attribute_key: Option<String>,
    pub conv: Option<String>,
    pub class: MetricClass,
}

impl MetricQuery {
    fn stat(mbean_name: &str, alias: &str, attribute: &str) -> Self {
        Self {
            mbean_name: mbean_name.to_string(),
            alias: alias.to_string(),
            metric_name: Some(attribute.to_string()),
            metric_labels: None,
            attribute: Some(attribute.to_string()),
            attribute_key: None,
            conv: None,
            class: MetricClass::Stat,
        }
    }

    fn with_attribute_key(mut self, key: &str) -> Self {
        self.attribute_key = Some(key.to_string());
        self
    }

    fn with_conv(mut self, conv: &str) -> Self {
        self.conv = Some(conv.to_string());
        self
    }

    pub fn from_spec(spec: &MbeanSpec) -> Self {
        Self {
            mbean_name: spec.name.clone(),
            alias: spec.our_alias.clone(),
            metric_name: spec.metric_name.clone(),
            metric_labels: spec.metric_labels.clone(),
            attribute: spec.attribute.clone(),
            attribute_key: spec.attribute_key.clone(),
            conv: spec.conv.clone(),
            class: MetricClass::User,
        }
    }

    /// Query-string form understood by the agent jar:
    /// `[metric_name[<labels>]==]mbean[/attribute[/attributeKey]]`.
    pub fn to_query_string(&self) -> String {
        let mut query = String::new();
        if let Some(metric_name) = &self.metric_name {
            query.push_str(metric_name);
            if let Some(labels) = &self.metric_labels {
                let mut pairs: Vec<String> =
                    labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
                pairs.sort();
                query.push('<');
                query.push_str(&pairs.join(","));
                query.push('>');
            }
            query.push_str("==");
        }
        query.push_str(&self.mbean_name);
        if let Some(attribute) = &self.attribute {
            query.push('/');
            query.push_str(attribute);
            if let Some(key) = &self.attribute_key {
                query.push('/');
                query.push_str(key);
            }
        }
        query
    }

    fn matches(&self, record: &MetricRecord) -> bool {
        if self.mbean_name != record.mbean_name {
            return false;
        }
        if let Some(metric_name) = &self.metric_name {
            if record.metric_name.as_deref() != Some(metric_name.as_str()) {
                return false;
            }
        }
        if let Some(attribute) = &self.attribute {
            if record.attribute.as_deref() != Some(attribute.as_str()) {
                return false;
            }
        }
        if let Some(key) = &self.attribute_key {
            if record.attribute_key.as_deref() != Some(key.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The built-in metric set queried for every managed-bean service.
pub fn builtin_queries() -> Vec<MetricQuery> {
    vec![
        MetricQuery::stat("java.lang:type=Memory", "memory_usage_bytes", "HeapMemoryUsage")
            .with_attribute_key("used"),
        MetricQuery::stat(
            "java.lang:type=OperatingSystem",
            "cpu_usage_percent",
            "ProcessCpuLoad",
        )
        .with_conv("percent"),
        MetricQuery::stat("java.lang:type=Threading", "num_threads", "ThreadCount"),
        MetricQuery::stat("java.lang:type=ClassLoading", "num_classes", "LoadedClassCount"),
        MetricQuery::stat("java.lang:type=Runtime", "uptime_seconds", "Uptime")
            .with_conv("millis_to_seconds"),
        MetricQuery::stat("java.lang:type=Runtime", "started_at", "StartTime")
            .with_conv("millis_to_datetime"),
    ]
}

/// Command line executed inside the proxy container.
pub fn agent_command(
    url: &str,
    credentials: Option<(&str, &str)>,
    queries: &[MetricQuery],
) -> Vec<String> {
    let mut command = vec![
        "java".to_string(),
        "-jar".to_string(),
        AGENT_JAR_PATH.to_string(),
        "-url".to_string(),
        url.to_string(),
        "-json".to_string(),
    ];
    if let Some((user, password)) = credentials {
        command.push("-u".to_string());
        command.push(user.to_string());
        command.push("-p".to_string());
        command.push(password.to_string());
    }
    let mut query_string = String::new();
    for query in queries {
        query_string.push_str(&query.to_query_string());
        query_string.push(';');
    }
    command.push("-q".to_string());
    command.push(query_string);
    command
}

/// One metric record as emitted by the agent jar.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "mBeanName")]
    pub mbean_name: String,
    #[serde(default, alias = "metricName")]
    pub metric_name: Option<String>,
    #[serde(default, alias = "metricLabels")]
    pub metric_labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default, rename = "attributeKey")]
    pub attribute_key: Option<String>,
    #[serde(default, alias = "valueType")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// Parse the agent's JSON output.
pub fn parse_metrics(json_output: &str) -> Result<Vec<MetricRecord>, serde_json::Error> {
    serde_json::from_str(json_output)
}

/// File parsed records into `(stats, user_defined)` maps keyed by alias,
/// applying the named conversion of the matching query.
pub fn collect_metrics(
    queries: &[MetricQuery],
    records: &[MetricRecord],
) -> (BTreeMap<String, Value>, BTreeMap<String, Value>) {
    let mut stats = BTreeMap::new();
    let mut user = BTreeMap::new();

    for record in records {
        let Some(query) = queries.iter().find(|q| q.matches(record)) else {
            continue;
        };

        let value = match &query.conv {
            Some(conv) => match conversions::convert(conv, &record.value) {
                Ok(converted) => converted,
                Err(err) => {
                    tracing::warn!(alias = %query.alias, error = %err,
                        "metric conversion failed, keeping raw value");
                    record.value.clone()
                }
            },
            None => record.value.clone(),
        };

        match query.class {
            MetricClass::Stat => stats.insert(query.alias.clone(), value),
            MetricClass::User => user.insert(query.alias.clone(), value),
        };
    }

    (stats, user)
}

/// Assemble the in-memory tar build context for the agent image.
pub fn build_context(dockerfile: &[u8], jar: &[u8], jar_name: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut add = |name: &str, data: &[u8]| -> std::io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data)
    };

    add("Dockerfile", dockerfile)?;
    add(jar_name, jar)?;

    let mut context = builder.into_inner()?;
    context.flush()?;
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_string_forms() {
        let plain = MetricQuery::stat("java.lang:type=Threading", "num_threads", "ThreadCount");
        assert_eq!(
            plain.to_query_string(),
            "ThreadCount==java.lang:type=Threading/ThreadCount"
        );

        let keyed = MetricQuery::stat("java.lang:type=Memory", "heap", "HeapMemoryUsage")
            .with_attribute_key("used");
        assert_eq!(
            keyed.to_query_string(),
            "HeapMemoryUsage==java.lang:type=Memory/HeapMemoryUsage/used"
        );
    }

    #[test]
    fn test_agent_command_with_credentials() {
        let queries = vec![MetricQuery::stat("a:type=B", "x", "Attr")];
        let command = agent_command("service:jmx:rmi:///x", Some(("admin", "pw")), &queries);
        assert_eq!(command[0..3], ["java", "-jar", AGENT_JAR_PATH]);
        assert!(command.contains(&"-u".to_string()));
        assert!(command.contains(&"admin".to_string()));
        assert_eq!(command.last().unwrap(), "Attr==a:type=B/Attr;");
    }

    #[test]
    fn test_parse_and_collect_metrics() {
        let output = r#"[
            {"mBeanName": "java.lang:type=Threading", "metricName": "ThreadCount",
             "attribute": "ThreadCount", "value": 42},
            {"mBeanName": "java.lang:type=OperatingSystem", "metricName": "ProcessCpuLoad",
             "attribute": "ProcessCpuLoad", "value": 0.5},
            {"mBeanName": "com.acme:type=Queue", "metricName": "Depth",
             "attribute": "Depth", "value": 7}
        ]"#;
        let records = parse_metrics(output).unwrap();

        let mut queries = builtin_queries();
        queries.push(MetricQuery {
            mbean_name: "com.acme:type=Queue".to_string(),
            alias: "queue_depth".to_string(),
            metric_name: Some("Depth".to_string()),
            metric_labels: None,
            attribute: Some("Depth".to_string()),
            attribute_key: None,
            conv: None,
            class: MetricClass::User,
        });

        let (stats, user) = collect_metrics(&queries, &records);
        assert_eq!(stats.get("num_threads"), Some(&json!(42)));
        assert_eq!(stats.get("cpu_usage_percent"), Some(&json!(50.0)));
        assert_eq!(user.get("queue_depth"), Some(&json!(7)));
    }

    #[test]
    fn test_unmatched_records_are_dropped() {
        let records = vec![MetricRecord {
            mbean_name: "something:else".to_string(),
            metric_name: None,
            metric_labels: None,
            attribute: None,
            attribute_key: None,
            value_type: None,
            value: json!(1),
        }];
        let (stats, user) = collect_metrics(&builtin_queries(), &records);
        assert!(stats.is_empty());
        assert!(user.is_empty());
    }

    #[test]
    fn test_build_context_is_a_tar_with_both_files() {
        let context = build_context(b"FROM x", b"jarbytes", "agent.jar").unwrap();
        let mut archive = tar::Archive::new(context.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["Dockerfile", "agent.jar"]);
    }
}
