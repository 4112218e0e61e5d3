//! Domain layer: models, errors and ports of the monitoring core.

pub mod errors;
pub mod models;
pub mod ports;
