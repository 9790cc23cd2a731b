//! Archival collaborator: turns a source path into a transportable archive
//!
//! Trait-based so orchestrator tests can swap in a mock (same approach as
//! the destination mock).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::command;

/// Creates a single archive file from a folder or dump file
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, source: &Path, archive_path: &Path) -> Result<()>;

    /// File extension produced by this archiver (without leading dot)
    fn extension(&self) -> &'static str;
}

/// Default archiver shelling out to `tar -czf`
#[derive(Debug, Clone, Default)]
pub struct TarArchiver {
    /// Timeout for the tar subprocess; None waits indefinitely
    pub timeout: Option<Duration>,
}

#[async_trait]
impl Archiver for TarArchiver {
    async fn archive(&self, source: &Path, archive_path: &Path) -> Result<()> {
        if !source.exists() {
            anyhow::bail!("Source path does not exist: {}", source.display());
        }

        // Archive relative to the parent so the archive root is the entry name
        let parent = source.parent().unwrap_or_else(|| Path::new("/"));
        let entry = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());

        info!("Archiving {} -> {}", source.display(), archive_path.display());

        let archive_str = archive_path.display().to_string();
        let parent_str = parent.display().to_string();
        command::run_command(
            "tar",
            &["-czf", &archive_str, "-C", &parent_str, &entry],
            &[],
            self.timeout,
        )
        .await
        .with_context(|| format!("Failed to archive {}", source.display()))?;

        Ok(())
    }

    fn extension(&self) -> &'static str {
        "tar.gz"
    }
}

/// Build an archive file name following the restore-tooling convention:
/// `{"folder"|"db"}-{target-name}-{YYYYMMDD-HHmmss}.{extension}`
pub fn archive_file_name(
    prefix: &str,
    target_name: &str,
    timestamp: DateTime<Utc>,
    extension: &str,
) -> String {
    format!(
        "{}-{}-{}.{}",
        prefix,
        target_name,
        timestamp.format("%Y%m%d-%H%M%S"),
        extension
    )
}
