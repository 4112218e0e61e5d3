//! Adapters: infrastructure implementations of the domain ports.

pub mod alarms;
pub mod docker;
pub mod sqlite;
