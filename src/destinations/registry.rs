//! Builds the active destination list from declarative config entries
//!
//! Construction-time dispatch on the `type` discriminator; required-field
//! validation happens here, before any archive is created or any remote is
//! touched.

use tracing::{debug, info};

use crate::config::{ConfigError, DestinationConfig};

use super::{
    GoogleDriveDestination, RcloneDestination, RcloneFlavor, S3Destination, StorageDestination,
};

/// Recognized values for the `type` field
pub const KNOWN_TYPES: &[&str] = &["gdrive", "rclone-drive", "rclone-s3", "s3"];

/// Build a `StorageDestination` per enabled config entry.
///
/// Entries with `enabled: false` are skipped; an unknown `type` or a missing
/// required field is a hard `ConfigError`; zero surviving destinations is
/// `NoActiveDestinations` rather than a silent no-op run.
pub fn build_destinations(
    entries: &[DestinationConfig],
) -> Result<Vec<Box<dyn StorageDestination>>, ConfigError> {
    let mut destinations: Vec<Box<dyn StorageDestination>> = Vec::new();

    for entry in entries {
        if !entry.enabled {
            debug!("Skipping disabled uploader entry '{}'", entry.kind);
            continue;
        }

        if entry.kind.is_empty() {
            return Err(ConfigError::ValidationError(
                "Uploader entry has an empty 'type' field".to_string(),
            ));
        }

        let destination: Box<dyn StorageDestination> = match entry.kind.as_str() {
            "gdrive" => Box::new(GoogleDriveDestination::from_config(entry)?),
            "rclone-drive" => Box::new(RcloneDestination::from_config(entry, RcloneFlavor::Drive)?),
            "rclone-s3" => {
                Box::new(RcloneDestination::from_config(entry, RcloneFlavor::ObjectStore)?)
            }
            "s3" => Box::new(S3Destination::from_config(entry)?),
            other => {
                return Err(ConfigError::UnsupportedType {
                    found: other.to_string(),
                    known: KNOWN_TYPES.join(", "),
                })
            }
        };

        info!(
            "Configured destination '{}' (container '{}')",
            destination.kind(),
            destination.remote_container()
        );
        destinations.push(destination);
    }

    if destinations.is_empty() {
        return Err(ConfigError::NoActiveDestinations);
    }

    Ok(destinations)
}

/// Pull a required provider field out of a config entry
pub(super) fn require_field(
    entry: &DestinationConfig,
    value: &Option<String>,
    field: &str,
) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(ConfigError::MissingField {
            kind: entry.kind.clone(),
            field: field.to_string(),
        }),
    }
}
