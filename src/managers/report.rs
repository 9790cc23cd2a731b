//! Run report: counters accumulated across one backup run

use std::path::PathBuf;
use std::time::Duration;

/// Accumulated outcome of a single run, finalized into the process exit
/// signal. Target-level archival failures alone do not force failure; any
/// failed upload does.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub targets_attempted: usize,
    pub targets_failed: usize,
    pub uploads_succeeded: usize,
    pub uploads_failed: usize,
    pub cleanup_deleted: usize,
    /// Local archives preserved because at least one destination failed
    pub retained_archives: Vec<PathBuf>,
    pub duration: Duration,
}

impl RunReport {
    /// A run succeeds when no upload failed. A run where every target
    /// failed archival (zero uploads attempted) still counts as success:
    /// nothing failed to upload.
    pub fn is_success(&self) -> bool {
        self.uploads_failed == 0
    }

    /// Human-readable end-of-run summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "=== Backup run summary ===".to_string(),
            format!(
                "Targets:  {} attempted, {} failed",
                self.targets_attempted, self.targets_failed
            ),
            format!(
                "Uploads:  {} succeeded, {} failed",
                self.uploads_succeeded, self.uploads_failed
            ),
            format!("Cleanup:  {} remote backups pruned", self.cleanup_deleted),
            format!("Duration: {:.2}s", self.duration.as_secs_f64()),
        ];

        if !self.retained_archives.is_empty() {
            lines.push("Archives kept locally for manual recovery:".to_string());
            for path in &self.retained_archives {
                lines.push(format!("  {}", path.display()));
            }
        }

        lines.join("\n")
    }
}
