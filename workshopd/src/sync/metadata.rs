use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use workshop_core::ItemId;

use super::paths::{PathError, item_dir_for};

pub const METADATA_FILE_NAME: &str = "meta.json";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("time format error: {0}")]
    Time(#[from] time::error::Format),
    #[error("committed directory is missing: {0}")]
    MissingDirectory(PathBuf),
}

/// On-disk shape of `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
struct MetadataRecord {
    version_tag: String,
    title: String,
    #[serde(default)]
    written_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: ItemId,
    pub directory_path: PathBuf,
    pub recorded_version_tag: String,
    pub recorded_title: String,
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    committed_root: PathBuf,
}

impl MetadataStore {
    pub fn new(committed_root: impl Into<PathBuf>) -> Self {
        Self {
            committed_root: committed_root.into(),
        }
    }

    pub fn record_path(&self, id: &ItemId) -> Result<PathBuf, PathError> {
        Ok(item_dir_for(&self.committed_root, id)?.join(METADATA_FILE_NAME))
    }

    /// Missing or unreadable records read as "no prior entry".
    pub async fn read(&self, id: &ItemId) -> Option<CacheEntry> {
        let directory_path = match item_dir_for(&self.committed_root, id) {
            Ok(dir) => dir,
            Err(err) => {
                tracing::debug!(item_id = %id, error = %err, "metadata lookup for invalid id");
                return None;
            }
        };
        let record_path = directory_path.join(METADATA_FILE_NAME);
        let bytes = match tokio::fs::read(&record_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(item_id = %id, error = %err, "metadata record unreadable");
                }
                return None;
            }
        };
        match serde_json::from_slice::<MetadataRecord>(&bytes) {
            Ok(record) => Some(CacheEntry {
                id: id.clone(),
                directory_path,
                recorded_version_tag: record.version_tag,
                recorded_title: record.title,
            }),
            Err(err) => {
                tracing::debug!(item_id = %id, error = %err, "metadata record is corrupt");
                None
            }
        }
    }

    /// Writes the record into the item's committed directory, which must
    /// already exist.
    pub async fn write(
        &self,
        id: &ItemId,
        version_tag: &str,
        title: &str,
    ) -> Result<CacheEntry, MetadataError> {
        let directory_path = item_dir_for(&self.committed_root, id)?;
        if !is_dir(&directory_path).await {
            return Err(MetadataError::MissingDirectory(directory_path));
        }
        let record = MetadataRecord {
            version_tag: version_tag.to_string(),
            title: title.to_string(),
            written_at: Some(OffsetDateTime::now_utc().format(&Rfc3339)?),
        };
        let payload = serde_json::to_vec_pretty(&record)?;
        let record_path = directory_path.join(METADATA_FILE_NAME);
        let scratch = directory_path.join(format!(".{METADATA_FILE_NAME}.tmp"));
        tokio::fs::write(&scratch, &payload).await?;
        tokio::fs::rename(&scratch, &record_path).await?;

        Ok(CacheEntry {
            id: id.clone(),
            directory_path,
            recorded_version_tag: record.version_tag,
            recorded_title: record.title,
        })
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
