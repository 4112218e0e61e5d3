//! Managed-bean checker scenarios against a scripted host.

mod common;

use std::sync::Arc;

use argus::domain::models::{
    AlarmSeverity, CheckConfig, HealthState, JmxAgentConfig, JmxServiceSpec,
};
use argus::domain::ports::{Checker, ExecOutput, StatusStore};
use argus::services::{HostPool, JmxChecker, RestartWindowService};

use common::{running_container, scratch_store, CollectingSink, MockConnector, MockHost};

fn jmx_services(yaml: &str) -> Vec<JmxServiceSpec> {
    serde_yaml::from_str(yaml).expect("test jmx services parse")
}

fn agent_output(start_time_ms: i64) -> String {
    format!(
        r#"[
        {{"mBeanName": "java.lang:type=Memory", "metricName": "HeapMemoryUsage",
          "attribute": "HeapMemoryUsage", "attributeKey": "used", "value": 1048576}},
        {{"mBeanName": "java.lang:type=OperatingSystem", "metricName": "ProcessCpuLoad",
          "attribute": "ProcessCpuLoad", "value": 0.07}},
        {{"mBeanName": "java.lang:type=Threading", "metricName": "ThreadCount",
          "attribute": "ThreadCount", "value": 33}},
        {{"mBeanName": "java.lang:type=Runtime", "metricName": "Uptime",
          "attribute": "Uptime", "value": 120000}},
        {{"mBeanName": "java.lang:type=Runtime", "metricName": "StartTime",
          "attribute": "StartTime", "value": {start_time_ms}}},
        {{"mBeanName": "com.acme:type=Queue", "metricName": "Depth",
          "attribute": "Depth", "value": 5}}
    ]"#
    )
}

async fn build_checker(
    host: Arc<MockHost>,
    store: Arc<dyn StatusStore>,
    sink: Arc<CollectingSink>,
    services: Vec<JmxServiceSpec>,
) -> JmxChecker {
    let pool = Arc::new(
        HostPool::connect(Arc::new(MockConnector::new(host)), &[])
            .await
            .expect("pool"),
    );
    let window = Arc::new(RestartWindowService::new(store.clone(), sink.clone()));
    let config = CheckConfig {
        repeat_interval_secs: 0,
        ..CheckConfig::default()
    };
    JmxChecker::new(
        services,
        pool,
        store,
        sink,
        window,
        &config,
        &JmxAgentConfig::default(),
    )
    .await
    .expect("checker")
}

const SERVICE_YAML: &str = r"
- service: billing
  url:
    docker:
      container: billing-app
      port: 9010
  mbeans:
    - name: com.acme:type=Queue
      our-alias: queue_depth
      metric-name: Depth
      attribute: Depth
";

#[tokio::test]
async fn test_metrics_are_extracted_and_published() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("billing-app", chrono::Utc::now()));
    host.exec_results.lock().unwrap().insert(
        "billing-app-argus-jmxproxy".to_string(),
        ExecOutput {
            exit_code: 0,
            stdout: agent_output(1_700_000_000_000),
            stderr: String::new(),
        },
    );

    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let mut checker = build_checker(host, store, sink.clone(), jmx_services(SERVICE_YAML)).await;

    checker.check().await.expect("cycle");

    let view = checker.status();
    let entry = view.read().unwrap()["billing"].clone();
    assert_eq!(entry.status, HealthState::Ok);
    assert!(sink.messages().is_empty());

    let stats = entry.stats.expect("stats recorded");
    assert_eq!(stats["memory_usage_bytes"].as_u64(), Some(1_048_576));
    assert_eq!(stats["num_threads"].as_u64(), Some(33));
    // ProcessCpuLoad is scaled to percent
    assert!((stats["cpu_usage_percent"].as_f64().unwrap() - 7.0).abs() < 1e-9);
    // Uptime is converted from milliseconds
    assert_eq!(stats["uptime_seconds"].as_f64(), Some(120.0));

    let user = entry.user_defined.expect("user metrics recorded");
    assert_eq!(user["queue_depth"].as_u64(), Some(5));
}

#[tokio::test]
async fn test_jvm_restart_is_detected_between_cycles() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("billing-app", chrono::Utc::now()));
    host.exec_results.lock().unwrap().insert(
        "billing-app-argus-jmxproxy".to_string(),
        ExecOutput {
            exit_code: 0,
            stdout: agent_output(1_700_000_000_000),
            stderr: String::new(),
        },
    );

    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let mut checker =
        build_checker(host.clone(), store, sink.clone(), jmx_services(SERVICE_YAML)).await;

    checker.check().await.expect("first cycle");
    assert!(sink.messages().is_empty());

    // the JVM came back with a newer start time
    host.exec_results.lock().unwrap().insert(
        "billing-app-argus-jmxproxy".to_string(),
        ExecOutput {
            exit_code: 0,
            stdout: agent_output(1_700_000_600_000),
            stderr: String::new(),
        },
    );
    checker.check().await.expect("second cycle");

    let messages = sink.messages();
    let restart = messages
        .iter()
        .find(|(m, _)| m.contains("JMX service billing has been restarted"))
        .expect("restart alarm present");
    assert!(restart.0.contains("(UNPLANNED)"));
    assert_eq!(restart.1, AlarmSeverity::Alarm);
    assert_eq!(
        checker.status().read().unwrap()["billing"].status,
        HealthState::Nok
    );
}

#[tokio::test]
async fn test_failing_agent_yields_no_metrics_and_no_alarm() {
    let host = Arc::new(MockHost::new());
    host.insert_container(running_container("billing-app", chrono::Utc::now()));
    host.exec_results.lock().unwrap().insert(
        "billing-app-argus-jmxproxy".to_string(),
        ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "connection refused".to_string(),
        },
    );

    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());
    let mut checker = build_checker(host, store, sink.clone(), jmx_services(SERVICE_YAML)).await;

    checker.check().await.expect("cycle");

    let entry = checker.status().read().unwrap()["billing"].clone();
    assert_eq!(entry.status, HealthState::Ok);
    assert!(entry.stats.is_none());
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_direct_url_is_reported_unsupported_without_breaking() {
    let host = Arc::new(MockHost::new());
    let (_dir, store) = scratch_store().await;
    let sink = Arc::new(CollectingSink::default());

    let yaml = r"
- service: legacy
  url:
    direct: service:jmx:rmi:///jndi/rmi://legacy-host:1099/jmxrmi
";
    let mut checker = build_checker(host, store, sink.clone(), jmx_services(yaml)).await;

    checker.check().await.expect("cycle");
    assert_eq!(
        checker.status().read().unwrap()["legacy"].status,
        HealthState::Ok
    );
    assert!(sink.messages().is_empty());
}
