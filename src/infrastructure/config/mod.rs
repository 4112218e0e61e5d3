//! Configuration loading: daemon settings and the monitoring layout.

pub mod layout_loader;
pub mod loader;

pub use layout_loader::{assign_action_ids, load_layout, merge_values, substitute_env, LAYOUT_ENV_NAME};
pub use loader::{ConfigError, ConfigLoader};
