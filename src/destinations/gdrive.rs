//! Google Drive destination (direct REST API)
//!
//! Talks to the Drive v3 API with a bearer token read from an environment
//! variable at initialization. The remote container is an opaque folder ID.
//! Drive allows duplicate file names, so re-uploading the same name creates
//! a second copy rather than overwriting; the orchestrator does not depend
//! on either behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{ConfigError, DestinationConfig};

use super::registry::require_field;
use super::{RemoteObject, StorageDestination, StorageError, UploadedFile};

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const DEFAULT_TOKEN_ENV: &str = "GDRIVE_TOKEN";
const MULTIPART_BOUNDARY: &str = "backhaul-multipart-boundary";

#[derive(Debug)]
pub struct GoogleDriveDestination {
    client: reqwest::Client,
    folder_id: String,
    token_env: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

impl GoogleDriveDestination {
    pub fn from_config(entry: &DestinationConfig) -> Result<Self, ConfigError> {
        let folder_id = require_field(entry, &entry.folder_id, "folder_id")?;
        let token_env = entry
            .token_env
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            folder_id,
            token_env,
            token: None,
        })
    }

    fn token(&self) -> Result<&str, StorageError> {
        self.token.as_deref().ok_or(StorageError::NotInitialized)
    }

    /// Find a file's ID by name within a folder (Drive deletes work on IDs)
    async fn find_file_id(
        &self,
        folder_id: &str,
        file_name: &str,
    ) -> Result<Option<String>, StorageError> {
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            folder_id,
            file_name.replace('\'', "\\'")
        );
        let response = self
            .client
            .get(format!("{}/files", API_BASE))
            .bearer_auth(self.token()?)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            .send()
            .await
            .map_err(|e| StorageError::List(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::List(format!(
                "Drive lookup returned {}",
                response.status()
            )));
        }

        let listing: DriveFileList = response
            .json()
            .await
            .map_err(|e| StorageError::List(e.to_string()))?;
        Ok(listing.files.into_iter().next().map(|f| f.id))
    }
}

#[async_trait]
impl StorageDestination for GoogleDriveDestination {
    async fn initialize(&mut self) -> Result<(), StorageError> {
        let token = std::env::var(&self.token_env).map_err(|_| {
            StorageError::Connection(format!(
                "Drive token env variable '{}' is not set",
                self.token_env
            ))
        })?;
        if token.is_empty() {
            return Err(StorageError::Connection(format!(
                "Drive token env variable '{}' is empty",
                self.token_env
            )));
        }
        self.token = Some(token);

        // Credential probe before committing to any archival work
        let response = self
            .client
            .get(format!("{}/about", API_BASE))
            .bearer_auth(self.token()?)
            .query(&[("fields", "user")])
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Connection(format!(
                "Drive credential check returned {}",
                response.status()
            )));
        }

        info!("Google Drive destination initialized (folder '{}')", self.folder_id);
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, StorageError> {
        let response = self
            .client
            .get(format!("{}/about", API_BASE))
            .bearer_auth(self.token()?)
            .query(&[("fields", "user")])
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<UploadedFile, StorageError> {
        let token = self.token()?.to_string();
        let contents = tokio::fs::read(local_path).await.map_err(|e| {
            StorageError::Upload {
                name: file_name.to_string(),
                message: format!("Failed to read {}: {}", local_path.display(), e),
            }
        })?;
        let size = contents.len() as u64;

        // multipart/related body: JSON metadata part, then the file bytes
        let metadata = serde_json::json!({
            "name": file_name,
            "parents": [remote_dir],
        });
        let mut body = Vec::with_capacity(contents.len() + 512);
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
                b = MULTIPART_BOUNDARY,
                m = metadata
            )
            .as_bytes(),
        );
        body.extend_from_slice(&contents);
        body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

        debug!("Uploading {} bytes to Drive folder '{}'", size, remote_dir);

        let response = self
            .client
            .post(format!("{}/files", UPLOAD_BASE))
            .query(&[("uploadType", "multipart"), ("fields", "id,name")])
            .bearer_auth(&token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                name: file_name.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StorageError::Upload {
                name: file_name.to_string(),
                message: format!("Drive upload returned {}", response.status()),
            });
        }

        Ok(UploadedFile {
            name: file_name.to_string(),
            size,
        })
    }

    async fn list_files(&self, remote_dir: &str) -> Result<Vec<RemoteObject>, StorageError> {
        let query = format!("'{}' in parents and trashed = false", remote_dir);
        let response = self
            .client
            .get(format!("{}/files", API_BASE))
            .bearer_auth(self.token()?)
            .query(&[
                ("q", query.as_str()),
                ("orderBy", "modifiedTime desc"),
                ("fields", "files(id,name,size,modifiedTime)"),
                ("pageSize", "1000"),
            ])
            .send()
            .await
            .map_err(|e| StorageError::List(e.to_string()))?;

        // An unknown folder ID yields an empty result set, not an error
        if !response.status().is_success() {
            return Err(StorageError::List(format!(
                "Drive listing returned {}",
                response.status()
            )));
        }

        let listing: DriveFileList = response
            .json()
            .await
            .map_err(|e| StorageError::List(e.to_string()))?;

        let objects = listing
            .files
            .into_iter()
            .map(|f| RemoteObject {
                name: f.name,
                size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
                modified: f
                    .modified_time
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                id: f.id,
            })
            .collect();

        Ok(objects)
    }

    async fn delete_file(&self, remote_dir: &str, file_name: &str) -> Result<(), StorageError> {
        let file_id = self
            .find_file_id(remote_dir, file_name)
            .await
            .map_err(|e| StorageError::Delete {
                name: file_name.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| StorageError::Delete {
                name: file_name.to_string(),
                message: "File not found in folder".to_string(),
            })?;

        let response = self
            .client
            .delete(format!("{}/files/{}", API_BASE, file_id))
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                name: file_name.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StorageError::Delete {
                name: file_name.to_string(),
                message: format!("Drive delete returned {}", response.status()),
            });
        }

        Ok(())
    }

    fn kind(&self) -> &'static str {
        "gdrive"
    }

    fn remote_container(&self) -> &str {
        &self.folder_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DestinationConfig {
        DestinationConfig {
            kind: "gdrive".to_string(),
            enabled: true,
            folder_id: Some("folder-abc".to_string()),
            token_env: None,
            remote: None,
            remote_path: None,
            bucket: None,
            key_prefix: None,
            region: None,
        }
    }

    #[test]
    fn test_from_config_requires_folder_id() {
        let mut missing = entry();
        missing.folder_id = None;
        let err = GoogleDriveDestination::from_config(&missing).unwrap_err();
        assert!(err.to_string().contains("folder_id"));
    }

    #[test]
    fn test_token_env_defaults() {
        let dest = GoogleDriveDestination::from_config(&entry()).unwrap();
        assert_eq!(dest.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(dest.remote_container(), "folder-abc");
    }

    #[tokio::test]
    async fn test_io_before_initialize_fails() {
        let dest = GoogleDriveDestination::from_config(&entry()).unwrap();
        let err = dest.list_files("folder-abc").await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }
}
