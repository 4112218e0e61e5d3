//! Alarm sink adapters.

pub mod history;

pub use history::HistoryAlarmSink;
