//! Storage destination abstraction
//!
//! Every remote storage provider implements [`StorageDestination`]; the
//! orchestrator only ever talks to the trait. Variants differ in transport,
//! not contract:
//! - [`gdrive::GoogleDriveDestination`] - Drive v3 REST API via reqwest
//! - [`rclone::RcloneDestination`] - shells out to a pre-configured rclone
//!   remote (drive- and object-store-flavored)
//! - [`s3::S3Destination`] - native S3 SDK client

pub mod gdrive;
pub mod rclone;
pub mod registry;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

pub use gdrive::GoogleDriveDestination;
pub use rclone::{RcloneDestination, RcloneFlavor};
pub use registry::build_destinations;
pub use s3::S3Destination;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Destination method called before initialize()")]
    NotInitialized,

    #[error("Upload of '{name}' failed: {message}")]
    Upload { name: String, message: String },

    #[error("Listing failed: {0}")]
    List(String),

    #[error("Delete of '{name}' failed: {message}")]
    Delete { name: String, message: String },
}

/// A remote file as reported by a destination's listing
///
/// Used only for retention comparison; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Provider-specific identifier (Drive file ID, S3 key, ...)
    pub id: String,
}

/// Confirmation returned by a successful upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
}

/// Capability set implemented by every storage provider variant
#[async_trait]
pub trait StorageDestination: std::fmt::Debug + Send + Sync {
    /// Establish/validate credentials and reachability. Must be called
    /// before any I/O method; those fail with `NotInitialized` otherwise.
    async fn initialize(&mut self) -> Result<(), StorageError>;

    /// Lightweight reachability probe, callable repeatedly
    async fn test_connection(&self) -> Result<bool, StorageError>;

    /// Upload a local file into `remote_dir` under `file_name`
    async fn upload_file(
        &self,
        local_path: &Path,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<UploadedFile, StorageError>;

    /// List files in `remote_dir`, newest first. A missing or empty
    /// container yields an empty listing, not an error.
    async fn list_files(&self, remote_dir: &str) -> Result<Vec<RemoteObject>, StorageError>;

    async fn delete_file(&self, remote_dir: &str, file_name: &str) -> Result<(), StorageError>;

    /// Stable provider identifier for logging and config dispatch
    fn kind(&self) -> &'static str;

    /// The configured remote container (folder ID, remote path, key prefix)
    fn remote_container(&self) -> &str;

    /// Delete every remote file strictly older than `retention_days`;
    /// returns the number deleted. Shared across variants.
    async fn cleanup_old_backups(
        &self,
        remote_dir: &str,
        retention_days: u32,
    ) -> Result<usize, StorageError> {
        let objects = self.list_files(remote_dir).await?;
        if objects.is_empty() {
            debug!("[{}] nothing to clean up in '{}'", self.kind(), remote_dir);
            return Ok(0);
        }

        let cutoff = retention_cutoff(Utc::now(), retention_days);
        let mut deleted = 0;
        for object in expired_objects(&objects, cutoff) {
            self.delete_file(remote_dir, &object.name).await?;
            info!(
                "[{}] deleted expired backup '{}' (modified {})",
                self.kind(),
                object.name,
                object.modified
            );
            deleted += 1;
        }

        Ok(deleted)
    }
}

/// Compute the retention cutoff: anything strictly before it is expired
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(retention_days))
}

/// Objects eligible for deletion: modified strictly before the cutoff.
/// An object exactly at the boundary is retained.
pub fn expired_objects(
    objects: &[RemoteObject],
    cutoff: DateTime<Utc>,
) -> impl Iterator<Item = &RemoteObject> {
    objects.iter().filter(move |o| o.modified < cutoff)
}

/// A scriptable in-memory destination for orchestrator and cleanup tests
/// Available for use in integration tests as well
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Recorded upload invocation
    #[derive(Clone, Debug)]
    pub struct UploadCall {
        pub local_path: String,
        pub remote_dir: String,
        pub file_name: String,
    }

    /// Mock destination that records calls and serves a scripted listing.
    /// Clones share state, so tests keep a handle while the orchestrator
    /// owns the boxed copy.
    #[derive(Clone, Debug, Default)]
    pub struct MockDestination {
        container: String,
        initialized: Arc<AtomicBool>,
        pub uploads: Arc<Mutex<Vec<UploadCall>>>,
        pub deletes: Arc<Mutex<Vec<String>>>,
        listing: Arc<Mutex<Vec<RemoteObject>>>,
        upload_error: Arc<Mutex<Option<String>>>,
        list_error: Arc<Mutex<Option<String>>>,
        connect_error: Arc<Mutex<Option<String>>>,
    }

    impl MockDestination {
        pub fn new(container: &str) -> Self {
            Self {
                container: container.to_string(),
                ..Self::default()
            }
        }

        /// Make every upload fail with the given message
        pub fn with_upload_error(self, message: &str) -> Self {
            *self.upload_error.lock().unwrap() = Some(message.to_string());
            self
        }

        /// Make listing fail with the given message
        pub fn with_list_error(self, message: &str) -> Self {
            *self.list_error.lock().unwrap() = Some(message.to_string());
            self
        }

        /// Make initialize() fail with the given message
        pub fn with_connect_error(self, message: &str) -> Self {
            *self.connect_error.lock().unwrap() = Some(message.to_string());
            self
        }

        /// Seed the remote listing
        pub fn with_listing(self, objects: Vec<RemoteObject>) -> Self {
            *self.listing.lock().unwrap() = objects;
            self
        }

        pub fn uploaded_names(&self) -> Vec<String> {
            self.uploads
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.file_name.clone())
                .collect()
        }

        pub fn deleted_names(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }

        fn check_initialized(&self) -> Result<(), StorageError> {
            if self.initialized.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StorageError::NotInitialized)
            }
        }
    }

    #[async_trait]
    impl StorageDestination for MockDestination {
        async fn initialize(&mut self) -> Result<(), StorageError> {
            if let Some(msg) = self.connect_error.lock().unwrap().clone() {
                return Err(StorageError::Connection(msg));
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn test_connection(&self) -> Result<bool, StorageError> {
            Ok(self.connect_error.lock().unwrap().is_none())
        }

        async fn upload_file(
            &self,
            local_path: &Path,
            remote_dir: &str,
            file_name: &str,
        ) -> Result<UploadedFile, StorageError> {
            self.check_initialized()?;
            self.uploads.lock().unwrap().push(UploadCall {
                local_path: local_path.display().to_string(),
                remote_dir: remote_dir.to_string(),
                file_name: file_name.to_string(),
            });

            if let Some(msg) = self.upload_error.lock().unwrap().clone() {
                return Err(StorageError::Upload {
                    name: file_name.to_string(),
                    message: msg,
                });
            }

            let size = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
            self.listing.lock().unwrap().insert(
                0,
                RemoteObject {
                    name: file_name.to_string(),
                    size,
                    modified: Utc::now(),
                    id: file_name.to_string(),
                },
            );

            Ok(UploadedFile {
                name: file_name.to_string(),
                size,
            })
        }

        async fn list_files(&self, _remote_dir: &str) -> Result<Vec<RemoteObject>, StorageError> {
            self.check_initialized()?;
            if let Some(msg) = self.list_error.lock().unwrap().clone() {
                return Err(StorageError::List(msg));
            }
            let mut objects = self.listing.lock().unwrap().clone();
            objects.sort_by(|a, b| b.modified.cmp(&a.modified));
            Ok(objects)
        }

        async fn delete_file(
            &self,
            _remote_dir: &str,
            file_name: &str,
        ) -> Result<(), StorageError> {
            self.check_initialized()?;
            self.deletes.lock().unwrap().push(file_name.to_string());
            self.listing
                .lock()
                .unwrap()
                .retain(|o| o.name != file_name);
            Ok(())
        }

        fn kind(&self) -> &'static str {
            "mock"
        }

        fn remote_container(&self) -> &str {
            &self.container
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDestination;
    use super::*;
    use chrono::TimeZone;

    fn object(name: &str, modified: DateTime<Utc>) -> RemoteObject {
        RemoteObject {
            name: name.to_string(),
            size: 1,
            modified,
            id: name.to_string(),
        }
    }

    #[test]
    fn test_expired_objects_strict_boundary() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        let objects = vec![
            object("older", cutoff - chrono::Duration::seconds(1)),
            object("boundary", cutoff),
            object("newer", cutoff + chrono::Duration::seconds(1)),
        ];

        let expired: Vec<&str> = expired_objects(&objects, cutoff)
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(expired, vec!["older"]);
    }

    #[test]
    fn test_retention_cutoff_seven_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let cutoff = retention_cutoff(now, 7);
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_expired() {
        let now = Utc::now();
        let mut dest = MockDestination::new("backups").with_listing(vec![
            object("old-1", now - chrono::Duration::days(10)),
            object("old-2", now - chrono::Duration::days(8)),
            object("fresh", now - chrono::Duration::days(2)),
        ]);
        dest.initialize().await.unwrap();

        let deleted = dest.cleanup_old_backups("backups", 7).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(dest.deleted_names(), vec!["old-2", "old-1"]);

        let remaining = dest.list_files("backups").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "fresh");
    }

    #[tokio::test]
    async fn test_cleanup_empty_listing_short_circuits() {
        let mut dest = MockDestination::new("backups");
        dest.initialize().await.unwrap();
        assert_eq!(dest.cleanup_old_backups("backups", 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_methods_before_initialize_fail() {
        let dest = MockDestination::new("backups");
        let err = dest.list_files("backups").await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }
}
