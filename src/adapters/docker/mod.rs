//! Docker engine adapter for the container host port.

pub mod host;

pub use host::{DockerConnector, DockerHost};
