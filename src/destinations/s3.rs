//! Native S3 destination
//!
//! Talks to the object store through the AWS SDK. Credentials come from the
//! standard provider chain (env, profile, instance metadata). The
//! `remote_dir` argument is ignored in favor of the configured key prefix;
//! listing strips that prefix from returned keys. `put_object` overwrites
//! on key collision, so uploads are idempotent at the file-name level.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

use crate::config::{ConfigError, DestinationConfig};

use super::registry::require_field;
use super::{RemoteObject, StorageDestination, StorageError, UploadedFile};

#[derive(Debug)]
pub struct S3Destination {
    bucket: String,
    key_prefix: String,
    region: Option<String>,
    client: Option<Client>,
}

impl S3Destination {
    pub fn from_config(entry: &DestinationConfig) -> Result<Self, ConfigError> {
        let bucket = require_field(entry, &entry.bucket, "bucket")?;
        let key_prefix = entry
            .key_prefix
            .clone()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bucket,
            key_prefix,
            region: entry.region.clone(),
            client: None,
        })
    }

    fn client(&self) -> Result<&Client, StorageError> {
        self.client.as_ref().ok_or(StorageError::NotInitialized)
    }

    fn object_key(&self, file_name: &str) -> String {
        if self.key_prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.key_prefix, file_name)
        }
    }

    /// Strip the configured prefix from a listed key
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.key_prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&self.key_prefix)
            .map(|k| k.trim_start_matches('/'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl StorageDestination for S3Destination {
    async fn initialize(&mut self) -> Result<(), StorageError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let config = loader.load().await;
        let client = Client::new(&config);

        client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::Connection(format!(
                    "Bucket '{}' is not reachable: {}",
                    self.bucket, e
                ))
            })?;

        self.client = Some(client);
        info!(
            "S3 destination initialized (bucket '{}', prefix '{}')",
            self.bucket, self.key_prefix
        );
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, StorageError> {
        let client = self.client()?;
        Ok(client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok())
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        _remote_dir: &str,
        file_name: &str,
    ) -> Result<UploadedFile, StorageError> {
        let client = self.client()?;
        let key = self.object_key(file_name);

        let size = tokio::fs::metadata(local_path)
            .await
            .map(|m| m.len())
            .map_err(|e| StorageError::Upload {
                name: file_name.to_string(),
                message: format!("Failed to stat {}: {}", local_path.display(), e),
            })?;

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Upload {
                name: file_name.to_string(),
                message: format!("Failed to open {}: {}", local_path.display(), e),
            })?;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                name: file_name.to_string(),
                message: e.to_string(),
            })?;

        Ok(UploadedFile {
            name: file_name.to_string(),
            size,
        })
    }

    async fn list_files(&self, _remote_dir: &str) -> Result<Vec<RemoteObject>, StorageError> {
        let client = self.client()?;

        let mut request = client.list_objects_v2().bucket(&self.bucket);
        if !self.key_prefix.is_empty() {
            request = request.prefix(format!("{}/", self.key_prefix));
        }

        let mut objects = Vec::new();
        let mut pages = request.into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::List(e.to_string()))?;
            for obj in page.contents() {
                let key = match obj.key() {
                    Some(k) => k,
                    None => continue,
                };
                let name = self.strip_prefix(key).to_string();
                if name.is_empty() {
                    continue;
                }
                let modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_default();
                objects.push(RemoteObject {
                    name,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    modified,
                    id: key.to_string(),
                });
            }
        }

        objects.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(objects)
    }

    async fn delete_file(&self, _remote_dir: &str, file_name: &str) -> Result<(), StorageError> {
        let client = self.client()?;
        client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(file_name))
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                name: file_name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "s3"
    }

    fn remote_container(&self) -> &str {
        &self.key_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DestinationConfig {
        DestinationConfig {
            kind: "s3".to_string(),
            enabled: true,
            folder_id: None,
            token_env: None,
            remote: None,
            remote_path: None,
            bucket: Some("backups-bucket".to_string()),
            key_prefix: Some("nightly/".to_string()),
            region: Some("eu-central-1".to_string()),
        }
    }

    #[test]
    fn test_from_config_requires_bucket() {
        let mut missing = entry();
        missing.bucket = None;
        let err = S3Destination::from_config(&missing).unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn test_key_prefix_normalized() {
        let dest = S3Destination::from_config(&entry()).unwrap();
        assert_eq!(dest.key_prefix, "nightly");
        assert_eq!(dest.object_key("a.tar.gz"), "nightly/a.tar.gz");
        assert_eq!(dest.strip_prefix("nightly/a.tar.gz"), "a.tar.gz");
    }

    #[test]
    fn test_empty_prefix_keys() {
        let mut cfg = entry();
        cfg.key_prefix = None;
        let dest = S3Destination::from_config(&cfg).unwrap();
        assert_eq!(dest.object_key("a.tar.gz"), "a.tar.gz");
        assert_eq!(dest.strip_prefix("a.tar.gz"), "a.tar.gz");
    }

    #[tokio::test]
    async fn test_io_before_initialize_fails() {
        let dest = S3Destination::from_config(&entry()).unwrap();
        let err = dest.list_files("ignored").await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }
}
