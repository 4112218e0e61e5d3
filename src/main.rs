//! Argus daemon entry point.

use anyhow::{Context, Result};
use argus::adapters::alarms::HistoryAlarmSink;
use argus::adapters::docker::DockerConnector;
use argus::adapters::sqlite::{create_pool, Migrator, SqliteStatusStore};
use argus::domain::models::AlarmSeverity;
use argus::domain::ports::{AlarmSink, Checker, NullStatusStore, StatusStore};
use argus::infrastructure::config::{assign_action_ids, load_layout, ConfigLoader};
use argus::infrastructure::logging;
use argus::services::gitlab::SourceCompareClient;
use argus::services::{
    ActionRunner, CompositeAlarmSink, ContainerChecker, HostPool, JmxChecker, Orchestrator,
    RestartWindowService, WebServiceChecker,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "argus",
    version,
    about = "Multi-target environment monitor for containers, JMX services and web services"
)]
struct Cli {
    /// Layout configuration files or directories (merged additively)
    #[arg(value_name = "CONFIG")]
    configs: Vec<PathBuf>,

    /// Daemon settings file (defaults to argus.yaml)
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.settings {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .context("failed to load configuration")?;

    let _log_guard = logging::init(&config.logging);

    let mut layout = match load_layout(&cli.configs) {
        Ok(layout) => layout,
        Err(err) => {
            tracing::error!(error = %err, "fatal configuration error");
            std::process::exit(1);
        }
    };
    assign_action_ids(&mut layout);
    tracing::info!(
        name = layout.name.as_deref().unwrap_or("unnamed"),
        containers = layout.blueprint.len(),
        jmx = layout.jmx.len(),
        services = layout.services.len(),
        "layout loaded"
    );

    let store: Arc<dyn StatusStore> = if config.database.enabled {
        let pool = create_pool(&config.database.path, config.database.max_connections)
            .await
            .context("failed to open time-series database")?;
        Migrator::new(pool.clone())
            .run()
            .await
            .context("failed to run database migrations")?;
        Arc::new(SqliteStatusStore::new(pool))
    } else {
        tracing::warn!("time-series storage is disabled");
        Arc::new(NullStatusStore)
    };

    let alarms: Arc<dyn AlarmSink> = Arc::new(CompositeAlarmSink::new(vec![Arc::new(
        HistoryAlarmSink::new(store.clone()),
    )]));
    alarms.push("argus started", AlarmSeverity::Info).await;

    let window = Arc::new(RestartWindowService::new(store.clone(), alarms.clone()));
    let pool = Arc::new(
        HostPool::connect(Arc::new(DockerConnector), &layout.dockers)
            .await
            .context("failed to initialise the container host pool")?,
    );
    let compare_client = Arc::new(SourceCompareClient::new());

    let actions: Vec<ActionRunner> = layout
        .actions
        .iter()
        .cloned()
        .map(|spec| ActionRunner::new(spec, pool.clone()))
        .collect();
    if !actions.is_empty() {
        tracing::info!(count = actions.len(), "actions configured");
    }

    let jmx_checker = JmxChecker::new(
        layout.jmx.clone(),
        pool.clone(),
        store.clone(),
        alarms.clone(),
        window.clone(),
        &config.checks,
        &config.jmx_agent,
    )
    .await
    .context("failed to initialise the JMX checker")?;

    let container_checker = ContainerChecker::new(
        layout.blueprint.clone(),
        pool.clone(),
        store.clone(),
        alarms.clone(),
        window.clone(),
        compare_client.clone(),
        &config.checks,
        &config.thresholds,
    )
    .await
    .context("failed to initialise the container checker")?;

    let web_checker = WebServiceChecker::new(
        layout.services.clone(),
        pool.clone(),
        store.clone(),
        alarms.clone(),
        window.clone(),
        compare_client,
        &config.checks,
        &config.thresholds,
    )
    .await
    .context("failed to initialise the web-service checker")?;

    let checkers: Vec<Box<dyn Checker>> = vec![
        Box::new(jmx_checker),
        Box::new(container_checker),
        Box::new(web_checker),
    ];

    let orchestrator = Orchestrator::start(
        checkers,
        Duration::from_secs(config.checks.cycle_interval_secs),
    );
    tracing::info!("argus is running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    orchestrator.stop(Duration::from_secs(5)).await;
    Ok(())
}
