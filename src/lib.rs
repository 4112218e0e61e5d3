//! Argus - multi-target environment monitor
//!
//! Periodically verifies the health of three kinds of observable objects:
//! - containerized workloads on one or more container hosts
//! - JVM services exposing a managed-bean (JMX) metrics interface
//! - generic web services reachable by TCP and HTTP(S)
//!
//! and publishes a rolling status view plus a time-indexed history.
//! Derived signals include disk-space pressure, certificate expiry,
//! image/source update availability and unexpected restarts.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::{AlarmSeverity, CheckResult, HealthState, Layout, MonitorConfig};
pub use services::{CompositeAlarmSink, HostPool, Orchestrator, RestartWindowService};
