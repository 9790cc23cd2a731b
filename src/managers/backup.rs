//! Backup orchestrator - sequences one full backup run
//!
//! Phases: destination init (fatal on any failure) -> sequential archival
//! per target (partial failure tolerated) -> concurrent upload fan-out per
//! archive across all destinations (partial failure tolerated) -> local
//! archive deletion only when every destination confirmed -> per-destination
//! retention cleanup (non-fatal) -> report.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::{BackupTarget, Settings};
use crate::destinations::StorageDestination;
use crate::managers::report::RunReport;
use crate::utils::archive::{archive_file_name, Archiver, TarArchiver};
use crate::utils::dump::{CliDumper, DatabaseDumper};
use crate::utils::retry::RetryPolicy;

/// A staged archive produced from exactly one target
#[derive(Debug, Clone)]
pub struct Archive {
    pub local_path: PathBuf,
    pub display_name: String,
}

pub struct BackupOrchestrator {
    settings: Settings,
    targets: Vec<BackupTarget>,
    destinations: Vec<Box<dyn StorageDestination>>,
    archiver: Box<dyn Archiver>,
    dumper: Box<dyn DatabaseDumper>,
    retry: RetryPolicy,
}

impl BackupOrchestrator {
    /// Create a new orchestrator with the default collaborators
    pub fn new(
        settings: Settings,
        targets: Vec<BackupTarget>,
        destinations: Vec<Box<dyn StorageDestination>>,
    ) -> Self {
        Self {
            settings,
            targets,
            destinations,
            archiver: Box::new(TarArchiver::default()),
            dumper: Box::new(CliDumper::default()),
            retry: RetryPolicy::default(),
        }
    }

    /// Create an orchestrator with specific collaborators (used by tests)
    #[allow(dead_code)]
    pub fn with_collaborators(
        settings: Settings,
        targets: Vec<BackupTarget>,
        destinations: Vec<Box<dyn StorageDestination>>,
        archiver: Box<dyn Archiver>,
        dumper: Box<dyn DatabaseDumper>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            settings,
            targets,
            destinations,
            archiver,
            dumper,
            retry,
        }
    }

    /// Run the full pipeline and return the accumulated report.
    ///
    /// Errors returned here are fatal pre-work failures (destination setup,
    /// staging directory). Everything after that point is recorded in the
    /// report instead of propagated.
    pub async fn run(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::default();

        self.init_destinations().await?;

        let archives = self.archive_targets(&mut report).await?;
        self.upload_archives(&archives, &mut report).await;
        self.cleanup_destinations(&mut report).await;

        report.duration = start.elapsed();
        info!(
            "Run finished: {}/{} targets archived, {}/{} uploads succeeded, {} remote backups pruned",
            report.targets_attempted - report.targets_failed,
            report.targets_attempted,
            report.uploads_succeeded,
            report.uploads_succeeded + report.uploads_failed,
            report.cleanup_deleted
        );

        Ok(report)
    }

    /// Initialize and probe every destination. All destinations must be
    /// reachable before we commit to archival work; any failure here aborts
    /// the whole run.
    async fn init_destinations(&mut self) -> Result<()> {
        for destination in &mut self.destinations {
            let kind = destination.kind();
            info!("Initializing destination '{}'", kind);
            destination
                .initialize()
                .await
                .with_context(|| format!("Failed to initialize destination '{}'", kind))?;

            let reachable = destination
                .test_connection()
                .await
                .with_context(|| format!("Connection test errored for destination '{}'", kind))?;
            anyhow::ensure!(
                reachable,
                "Destination '{}' failed its connection test",
                kind
            );
        }
        Ok(())
    }

    /// Archive each target sequentially. A target that exhausts its retries
    /// is logged and counted, and the loop moves on.
    async fn archive_targets(&self, report: &mut RunReport) -> Result<Vec<Archive>> {
        tokio::fs::create_dir_all(&self.settings.backup_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create backup directory {}",
                    self.settings.backup_dir.display()
                )
            })?;

        let mut archives = Vec::new();

        for target in &self.targets {
            report.targets_attempted += 1;

            let name = archive_file_name(
                target.archive_prefix(),
                &target.display_name(),
                Utc::now(),
                self.archiver.extension(),
            );
            let archive_path = self.settings.backup_dir.join(&name);
            let label = format!("archive '{}'", target.display_name());
            let staged = archive_path.as_path();

            match self
                .retry
                .execute(&label, move || self.create_archive(target, staged))
                .await
            {
                Ok(()) => {
                    info!("Created archive {}", archive_path.display());
                    archives.push(Archive {
                        local_path: archive_path,
                        display_name: name,
                    });
                }
                Err(e) => {
                    error!("Giving up on target '{}': {}", target.display_name(), e);
                    report.targets_failed += 1;
                }
            }
        }

        Ok(archives)
    }

    /// Produce the archive for one target (one retry attempt)
    async fn create_archive(&self, target: &BackupTarget, archive_path: &Path) -> Result<()> {
        match target {
            BackupTarget::Folder { path } => {
                self.archiver.archive(path, archive_path).await?;
            }
            BackupTarget::Database { conn } => {
                let dump_path = self
                    .settings
                    .backup_dir
                    .join(format!("{}.sql", conn.database));
                self.dumper.dump(conn, &dump_path).await?;
                // The dump is intermediate either way; don't leave it in
                // staging when archival fails
                let archived = self.archiver.archive(&dump_path, archive_path).await;
                if let Err(e) = tokio::fs::remove_file(&dump_path).await {
                    warn!("Failed to remove dump file {}: {}", dump_path.display(), e);
                }
                archived?;
            }
        }
        Ok(())
    }

    /// Fan each archive out to every destination concurrently. Failures are
    /// independent per (archive, destination) pair; the local archive is
    /// deleted only when every destination confirmed the upload.
    async fn upload_archives(&self, archives: &[Archive], report: &mut RunReport) {
        for archive in archives {
            let retry = &self.retry;
            let attempts = self.destinations.iter().map(|destination| {
                let dest = destination.as_ref();
                let label = format!("upload '{}' to '{}'", archive.display_name, dest.kind());
                async move {
                    let result = retry
                        .execute(&label, move || async move {
                            dest.upload_file(
                                &archive.local_path,
                                dest.remote_container(),
                                &archive.display_name,
                            )
                            .await
                            .map_err(anyhow::Error::from)
                        })
                        .await;
                    (dest.kind(), result)
                }
            });

            let mut failures = 0;
            for (kind, result) in futures::future::join_all(attempts).await {
                match result {
                    Ok(uploaded) => {
                        info!(
                            "Uploaded '{}' to '{}' ({} bytes)",
                            uploaded.name, kind, uploaded.size
                        );
                        report.uploads_succeeded += 1;
                    }
                    Err(e) => {
                        error!("Upload of '{}' to '{}' failed: {}", archive.display_name, kind, e);
                        report.uploads_failed += 1;
                        failures += 1;
                    }
                }
            }

            if failures == 0 {
                if let Err(e) = tokio::fs::remove_file(&archive.local_path).await {
                    warn!(
                        "All uploads succeeded but removing {} failed: {}",
                        archive.local_path.display(),
                        e
                    );
                }
            } else {
                warn!(
                    "Keeping local archive for manual recovery: {}",
                    archive.local_path.display()
                );
                report.retained_archives.push(archive.local_path.clone());
            }
        }
    }

    /// Apply the retention window on every destination independently.
    /// Cleanup failures must never fail a run that just produced backups.
    async fn cleanup_destinations(&self, report: &mut RunReport) {
        for destination in &self.destinations {
            match destination
                .cleanup_old_backups(
                    destination.remote_container(),
                    self.settings.retention_days,
                )
                .await
            {
                Ok(deleted) => {
                    info!(
                        "Retention cleanup on '{}': {} backups deleted",
                        destination.kind(),
                        deleted
                    );
                    report.cleanup_deleted += deleted;
                }
                Err(e) => {
                    warn!(
                        "Retention cleanup on '{}' failed (fresh backups unaffected): {}",
                        destination.kind(),
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConnection;
    use crate::destinations::mock::MockDestination;
    use crate::destinations::RemoteObject;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Archiver stand-in that stages a fixed payload instead of running tar
    struct CopyArchiver;

    #[async_trait]
    impl Archiver for CopyArchiver {
        async fn archive(&self, source: &Path, archive_path: &Path) -> Result<()> {
            if !source.exists() {
                anyhow::bail!("Source path does not exist: {}", source.display());
            }
            tokio::fs::write(archive_path, b"archive-bytes").await?;
            Ok(())
        }

        fn extension(&self) -> &'static str {
            "tar.gz"
        }
    }

    fn settings(backup_dir: &Path) -> Settings {
        serde_json::from_value(serde_json::json!({
            "uploaders": [{"type": "s3", "bucket": "unused"}],
            "backup_dir": backup_dir,
        }))
        .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
        }
    }

    fn orchestrator(
        backup_dir: &Path,
        targets: Vec<BackupTarget>,
        destinations: Vec<Box<dyn StorageDestination>>,
    ) -> BackupOrchestrator {
        BackupOrchestrator::with_collaborators(
            settings(backup_dir),
            targets,
            destinations,
            Box::new(CopyArchiver),
            Box::new(CliDumper::default()),
            fast_retry(),
        )
    }

    fn staged_archives(backup_dir: &Path) -> Vec<String> {
        std::fs::read_dir(backup_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_failed_target_does_not_block_others() {
        let temp = tempfile::tempdir().unwrap();
        let existing = temp.path().join("www");
        std::fs::create_dir(&existing).unwrap();
        let backup_dir = temp.path().join("staging");

        let dest = MockDestination::new("backups");
        let targets = vec![
            BackupTarget::Folder { path: existing },
            BackupTarget::Folder {
                path: temp.path().join("does-not-exist"),
            },
        ];
        let mut orch = orchestrator(&backup_dir, targets, vec![Box::new(dest.clone())]);

        let report = orch.run().await.unwrap();

        assert_eq!(report.targets_attempted, 2);
        assert_eq!(report.targets_failed, 1);
        assert_eq!(report.uploads_succeeded, 1);
        assert_eq!(report.uploads_failed, 0);
        assert!(report.is_success());

        let uploaded = dest.uploaded_names();
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded[0].starts_with("folder-www-"));
        assert!(uploaded[0].ends_with(".tar.gz"));

        // All destinations confirmed, so the staged archive is gone
        assert!(staged_archives(&backup_dir).is_empty());
    }

    #[tokio::test]
    async fn test_failed_destination_keeps_local_archive() {
        let temp = tempfile::tempdir().unwrap();
        let folder = temp.path().join("data");
        std::fs::create_dir(&folder).unwrap();
        let backup_dir = temp.path().join("staging");

        let good = MockDestination::new("backups");
        let bad = MockDestination::new("backups").with_upload_error("remote unavailable");
        let mut orch = orchestrator(
            &backup_dir,
            vec![BackupTarget::Folder { path: folder }],
            vec![Box::new(good.clone()), Box::new(bad.clone())],
        );

        let report = orch.run().await.unwrap();

        assert_eq!(report.uploads_succeeded, 1);
        assert_eq!(report.uploads_failed, 1);
        assert!(!report.is_success());

        // Failure of one destination did not block the other
        assert_eq!(good.uploaded_names().len(), 1);
        // Failed upload went through the retry policy
        assert_eq!(bad.uploads.lock().unwrap().len(), 2);

        // The archive stays on disk for manual recovery
        assert_eq!(report.retained_archives.len(), 1);
        assert!(report.retained_archives[0].exists());
        assert_eq!(staged_archives(&backup_dir).len(), 1);
    }

    /// Dumper stand-in that writes a fixed dump file
    struct StubDumper;

    #[async_trait]
    impl DatabaseDumper for StubDumper {
        async fn dump(&self, _conn: &DbConnection, output: &Path) -> Result<()> {
            tokio::fs::write(output, b"-- dump").await?;
            Ok(())
        }
    }

    /// Archiver stand-in that always fails
    struct FailingArchiver;

    #[async_trait]
    impl Archiver for FailingArchiver {
        async fn archive(&self, _source: &Path, _archive_path: &Path) -> Result<()> {
            anyhow::bail!("archival refused")
        }

        fn extension(&self) -> &'static str {
            "tar.gz"
        }
    }

    #[tokio::test]
    async fn test_failed_db_archival_removes_dump_file() {
        let temp = tempfile::tempdir().unwrap();
        let backup_dir = temp.path().join("staging");

        let dest = MockDestination::new("backups");
        let target = BackupTarget::Database {
            conn: DbConnection {
                scheme: "postgres".to_string(),
                user: "backup".to_string(),
                password: "pw".to_string(),
                host: "db".to_string(),
                port: 5432,
                database: "appdata".to_string(),
            },
        };
        let mut orch = BackupOrchestrator::with_collaborators(
            settings(&backup_dir),
            vec![target],
            vec![Box::new(dest.clone())],
            Box::new(FailingArchiver),
            Box::new(StubDumper),
            fast_retry(),
        );

        let report = orch.run().await.unwrap();
        assert_eq!(report.targets_failed, 1);
        assert!(dest.uploaded_names().is_empty());

        // The intermediate dump does not linger in staging after the failure
        assert!(staged_archives(&backup_dir).is_empty());
    }

    #[tokio::test]
    async fn test_destination_init_failure_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let folder = temp.path().join("data");
        std::fs::create_dir(&folder).unwrap();

        let good = MockDestination::new("backups");
        let unreachable = MockDestination::new("backups").with_connect_error("auth expired");
        let mut orch = orchestrator(
            &temp.path().join("staging"),
            vec![BackupTarget::Folder { path: folder }],
            vec![Box::new(good.clone()), Box::new(unreachable)],
        );

        let err = orch.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("auth expired"));
        // No archival work happened before the abort
        assert!(good.uploaded_names().is_empty());
    }

    #[tokio::test]
    async fn test_all_targets_failing_archival_is_still_success() {
        let temp = tempfile::tempdir().unwrap();
        let dest = MockDestination::new("backups");
        let mut orch = orchestrator(
            &temp.path().join("staging"),
            vec![BackupTarget::Folder {
                path: temp.path().join("missing"),
            }],
            vec![Box::new(dest.clone())],
        );

        let report = orch.run().await.unwrap();
        assert_eq!(report.targets_failed, 1);
        assert_eq!(report.uploads_succeeded + report.uploads_failed, 0);
        assert!(report.is_success());
        assert!(dest.uploaded_names().is_empty());
    }

    #[tokio::test]
    async fn test_run_prunes_expired_remote_backups() {
        let temp = tempfile::tempdir().unwrap();
        let folder = temp.path().join("data");
        std::fs::create_dir(&folder).unwrap();

        let now = Utc::now();
        let dest = MockDestination::new("backups").with_listing(vec![RemoteObject {
            name: "folder-data-20200101-000000.tar.gz".to_string(),
            size: 10,
            modified: now - chrono::Duration::days(30),
            id: "old".to_string(),
        }]);
        let mut orch = orchestrator(
            &temp.path().join("staging"),
            vec![BackupTarget::Folder { path: folder }],
            vec![Box::new(dest.clone())],
        );

        let report = orch.run().await.unwrap();
        assert_eq!(report.cleanup_deleted, 1);
        assert_eq!(
            dest.deleted_names(),
            vec!["folder-data-20200101-000000.tar.gz"]
        );
        // The archive uploaded during this run is within the window
        let remaining = dest.list_files("backups").await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_fail_the_run() {
        let temp = tempfile::tempdir().unwrap();
        let folder = temp.path().join("data");
        std::fs::create_dir(&folder).unwrap();

        let dest = MockDestination::new("backups").with_list_error("listing busted");
        let mut orch = orchestrator(
            &temp.path().join("staging"),
            vec![BackupTarget::Folder { path: folder }],
            vec![Box::new(dest.clone())],
        );

        let report = orch.run().await.unwrap();
        assert_eq!(report.uploads_succeeded, 1);
        assert_eq!(report.cleanup_deleted, 0);
        assert!(report.is_success());
    }
}
