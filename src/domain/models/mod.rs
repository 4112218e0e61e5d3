//! Domain models of the monitoring core.

pub mod alarm;
pub mod check;
pub mod config;
pub mod layout;
pub mod notification;
pub mod object;
pub mod status;

pub use alarm::{AlarmSeverity, HistoryEntry};
pub use check::{CheckResult, HealthState, StatusAccumulator};
pub use config::{
    CheckConfig, DatabaseConfig, JmxAgentConfig, LoggingConfig, MonitorConfig, ThresholdConfig,
};
pub use layout::{
    ActionSpec, BasicAuthSpec, ContainerSpec, EndpointMode, EndpointSpec, HostEntry,
    ImageUpdateSpec, JmxDockerUrl, JmxServiceSpec, JmxUrl, Layout, MbeanSpec, MountThreshold,
    SourceUpdateSpec, WebServiceSpec, ZabbixPort, ZabbixSpec, DEFAULT_HOST_ID,
};
pub use notification::RestartNotification;
pub use object::{ObjectKind, ObjectRef};
pub use status::{
    ContainerDescriptor, DiskUsage, JmxDescriptor, RuntimeStats, StatusRecord, TargetStatus,
};
