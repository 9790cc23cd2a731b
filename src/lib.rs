//! Backhaul Library
//!
//! This library provides backup orchestration: archiving configured folders
//! and databases, fanning the archives out to remote storage destinations,
//! and pruning aged remote copies.

pub mod config;
pub mod destinations;
pub mod managers;
pub mod utils;

// Re-export commonly used types
pub use config::{load_settings, load_targets, BackupTarget, DestinationConfig, Settings};
pub use destinations::{build_destinations, StorageDestination, StorageError};
pub use managers::backup::BackupOrchestrator;
pub use managers::logging::{init_logging, LogGuard, LoggingConfig};
pub use managers::report::RunReport;
pub use utils::retry::RetryPolicy;
