//! Configuration module for backhaul
//!
//! Two inputs are read at startup:
//! - a JSON settings file (retention, schedule, uploader destinations)
//! - a line-oriented target list (folders and database URIs)
//!
//! Both resolve into plain immutable values that are passed explicitly into
//! the orchestrator; there is no process-wide config global.

mod loader;
mod types;

pub use loader::{load_settings, load_targets, ConfigError};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
