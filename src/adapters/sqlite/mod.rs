//! SQLite adapter for the time-series store.

pub mod connection;
pub mod migrations;
pub mod store;

pub use connection::{create_pool, ConnectionError};
pub use migrations::{Migrator, MigrationError};
pub use store::SqliteStatusStore;
