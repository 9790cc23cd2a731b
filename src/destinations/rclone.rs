//! Rclone-backed destination
//!
//! Shells out to an `rclone` binary pre-configured with a named remote. Two
//! flavors share this implementation: a cloud-drive remote and an
//! object-store remote; they differ only in the `kind()` identifier used
//! for logging and config dispatch. The remote container is a path string
//! within the remote. `copyto` overwrites on name collision, so uploads
//! are idempotent at the file-name level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ConfigError, DestinationConfig};
use crate::utils::command;

use super::registry::require_field;
use super::{RemoteObject, StorageDestination, StorageError, UploadedFile};

const LIST_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcloneFlavor {
    Drive,
    ObjectStore,
}

#[derive(Debug)]
pub struct RcloneDestination {
    remote: String,
    remote_path: String,
    flavor: RcloneFlavor,
    initialized: bool,
}

/// One entry of `rclone lsjson` output
#[derive(Debug, Deserialize)]
struct RcloneEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size", default)]
    size: i64,
    #[serde(rename = "ModTime", default)]
    mod_time: Option<String>,
    #[serde(rename = "ID", default)]
    id: Option<String>,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

impl RcloneDestination {
    pub fn from_config(
        entry: &DestinationConfig,
        flavor: RcloneFlavor,
    ) -> Result<Self, ConfigError> {
        let remote = require_field(entry, &entry.remote, "remote")?;
        let remote_path = entry.remote_path.clone().unwrap_or_default();

        Ok(Self {
            remote,
            remote_path,
            flavor,
            initialized: false,
        })
    }

    /// `remote:dir` spec for rclone arguments
    fn remote_spec(&self, remote_dir: &str) -> String {
        format!("{}:{}", self.remote, remote_dir)
    }

    fn check_initialized(&self) -> Result<(), StorageError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }
}

#[async_trait]
impl StorageDestination for RcloneDestination {
    async fn initialize(&mut self) -> Result<(), StorageError> {
        which::which("rclone").map_err(|_| {
            StorageError::Connection("rclone binary not found in PATH".to_string())
        })?;

        // Probe the remote root; a misconfigured remote fails here, before
        // any archive is created
        let spec = format!("{}:", self.remote);
        command::run_command("rclone", &["lsd", &spec], &[], Some(LIST_TIMEOUT))
            .await
            .map_err(|e| {
                StorageError::Connection(format!("rclone remote '{}': {:#}", self.remote, e))
            })?;

        self.initialized = true;
        info!(
            "Rclone destination '{}' initialized (remote '{}', path '{}')",
            self.kind(),
            self.remote,
            self.remote_path
        );
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, StorageError> {
        let spec = format!("{}:", self.remote);
        let output = command::run_command_unchecked(
            "rclone",
            &["lsd", &spec],
            &[],
            Some(LIST_TIMEOUT),
        )
        .await
        .map_err(|e| StorageError::Connection(format!("{:#}", e)))?;
        Ok(output.status.success())
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<UploadedFile, StorageError> {
        self.check_initialized()?;

        let size = tokio::fs::metadata(local_path)
            .await
            .map(|m| m.len())
            .map_err(|e| StorageError::Upload {
                name: file_name.to_string(),
                message: format!("Failed to stat {}: {}", local_path.display(), e),
            })?;

        let local = local_path.display().to_string();
        let target = format!("{}/{}", self.remote_spec(remote_dir), file_name);
        debug!("rclone copyto {} -> {}", local, target);

        command::run_command(
            "rclone",
            &["copyto", &local, &target],
            &[],
            Some(TRANSFER_TIMEOUT),
        )
        .await
        .map_err(|e| StorageError::Upload {
            name: file_name.to_string(),
            message: format!("{:#}", e),
        })?;

        Ok(UploadedFile {
            name: file_name.to_string(),
            size,
        })
    }

    async fn list_files(&self, remote_dir: &str) -> Result<Vec<RemoteObject>, StorageError> {
        self.check_initialized()?;

        let spec = self.remote_spec(remote_dir);
        let output = command::run_command_unchecked(
            "rclone",
            &["lsjson", &spec],
            &[],
            Some(LIST_TIMEOUT),
        )
        .await
        .map_err(|e| StorageError::List(format!("{:#}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A container that doesn't exist yet is an empty listing
            if stderr.contains("directory not found") {
                return Ok(Vec::new());
            }
            return Err(StorageError::List(format!(
                "rclone lsjson failed: {}",
                stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries: Vec<RcloneEntry> = serde_json::from_str(&stdout)
            .map_err(|e| StorageError::List(format!("Failed to parse lsjson output: {}", e)))?;

        let mut objects: Vec<RemoteObject> = entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| RemoteObject {
                size: e.size.max(0) as u64,
                modified: e
                    .mod_time
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                id: e.id.unwrap_or_else(|| e.name.clone()),
                name: e.name,
            })
            .collect();

        objects.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(objects)
    }

    async fn delete_file(&self, remote_dir: &str, file_name: &str) -> Result<(), StorageError> {
        self.check_initialized()?;

        let target = format!("{}/{}", self.remote_spec(remote_dir), file_name);
        command::run_command("rclone", &["deletefile", &target], &[], Some(LIST_TIMEOUT))
            .await
            .map_err(|e| StorageError::Delete {
                name: file_name.to_string(),
                message: format!("{:#}", e),
            })?;

        Ok(())
    }

    fn kind(&self) -> &'static str {
        match self.flavor {
            RcloneFlavor::Drive => "rclone-drive",
            RcloneFlavor::ObjectStore => "rclone-s3",
        }
    }

    fn remote_container(&self) -> &str {
        &self.remote_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DestinationConfig {
        DestinationConfig {
            kind: "rclone-drive".to_string(),
            enabled: true,
            folder_id: None,
            token_env: None,
            remote: Some("offsite".to_string()),
            remote_path: Some("backups/daily".to_string()),
            bucket: None,
            key_prefix: None,
            region: None,
        }
    }

    #[test]
    fn test_from_config_requires_remote() {
        let mut missing = entry();
        missing.remote = None;
        let err = RcloneDestination::from_config(&missing, RcloneFlavor::Drive).unwrap_err();
        assert!(err.to_string().contains("remote"));
    }

    #[test]
    fn test_flavor_selects_kind() {
        let drive = RcloneDestination::from_config(&entry(), RcloneFlavor::Drive).unwrap();
        let store = RcloneDestination::from_config(&entry(), RcloneFlavor::ObjectStore).unwrap();
        assert_eq!(drive.kind(), "rclone-drive");
        assert_eq!(store.kind(), "rclone-s3");
    }

    #[test]
    fn test_remote_spec() {
        let dest = RcloneDestination::from_config(&entry(), RcloneFlavor::Drive).unwrap();
        assert_eq!(dest.remote_spec("backups/daily"), "offsite:backups/daily");
        assert_eq!(dest.remote_container(), "backups/daily");
    }

    #[tokio::test]
    async fn test_io_before_initialize_fails() {
        let dest = RcloneDestination::from_config(&entry(), RcloneFlavor::Drive).unwrap();
        let err = dest.list_files("backups").await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }

    #[test]
    fn test_lsjson_parsing() {
        let json = r#"[
            {"Name": "db-app-20240301-010000.tar.gz", "Size": 1024, "ModTime": "2024-03-01T01:00:00Z", "IsDir": false},
            {"Name": "subdir", "Size": -1, "ModTime": "2024-03-02T01:00:00Z", "IsDir": true},
            {"Name": "db-app-20240302-010000.tar.gz", "Size": 2048, "ModTime": "2024-03-02T01:00:00Z", "IsDir": false}
        ]"#;
        let entries: Vec<RcloneEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[1].is_dir);
        assert_eq!(entries[2].size, 2048);
    }
}
