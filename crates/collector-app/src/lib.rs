pub mod config;
pub mod diagnostics;
pub mod entry;
pub mod flow;
pub mod migration;
pub mod server;
pub mod setup;

pub use config::CollectorConfig;
pub use entry::{ConfigEntry, EntryData, EntryStore};
pub use setup::{setup_entry, unload_entry, EntryRuntime};
