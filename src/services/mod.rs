//! The checking engine: the check primitive, alarm fan-out, host pool,
//! checkers and the orchestrator.

pub mod action_runner;
pub mod check;
pub mod container_checker;
pub mod container_checks;
pub mod conversions;
pub mod fanout;
pub mod gitlab;
pub mod host_pool;
pub mod jmx_agent;
pub mod jmx_checker;
pub mod orchestrator;
pub mod restart_window;
pub mod status_board;
pub mod tls_probe;
pub mod web_checker;
pub mod web_checks;
pub mod zabbix;

pub use action_runner::{ActionOutcome, ActionRunner};
pub use check::{CheckContext, CheckSchedule, CheckTask};
pub use container_checker::ContainerChecker;
pub use fanout::CompositeAlarmSink;
pub use host_pool::HostPool;
pub use jmx_checker::JmxChecker;
pub use orchestrator::Orchestrator;
pub use restart_window::{PlannedState, RestartWindowService};
pub use status_board::{StatusBoard, TargetMeta};
pub use web_checker::WebServiceChecker;
pub use zabbix::ZabbixClient;
