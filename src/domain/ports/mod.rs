//! Ports: interfaces between the checking engine and the outside world.

pub mod alarm_sink;
pub mod checker;
pub mod container_host;
pub mod status_store;

pub use alarm_sink::AlarmSink;
pub use checker::{Checker, StatusView};
pub use container_host::{
    BlkioEntry, ContainerDetails, ContainerHost, ContainerSummary, ExecOutput, HostConnector,
    HostError, HostInfo, ImageDetails, InterfaceStats, LaunchSpec, MountSpec, ProbeOutput,
    ProcessTable, RegistryAuth, StatsSample,
};
pub use status_store::{
    MetricPoint, NullStatusStore, StatusPoint, StatusStore, LOG_QUERY_LIMIT,
};
