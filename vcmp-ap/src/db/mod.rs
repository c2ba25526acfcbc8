//! Database access layer
//!
//! SQLite holds the durable crossfade settings in a key/value `settings`
//! table. Everything else in the engine is in-memory.

pub mod init;
pub mod settings;

pub use init::{connect, initialize_database};
pub use settings::SqliteSettingsStore;
