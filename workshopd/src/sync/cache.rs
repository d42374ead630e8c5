use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use workshop_core::ItemId;

use super::metadata::MetadataStore;
use super::paths::{PathError, item_dir_for, item_id_from_dir_name};

pub const COMMITTED_DIR_NAME: &str = "workshop";
pub const STAGING_DIR_NAME: &str = "tmp";
pub const DEFAULT_CONTENT_EXTENSION: &str = "map";
const PREVIEW_EXTENSION: &str = "png";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("staged file for {id} is missing: {}", .path.display())]
    MissingStaged { id: ItemId, path: PathBuf },
}

/// Two-phase directory layout: downloads land in `<root>/tmp/<id>` and are
/// promoted into `<root>/workshop/<id>` as a whole.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    staging_root: PathBuf,
    committed_root: PathBuf,
    content_extension: String,
    metadata: MetadataStore,
}

impl CacheLayout {
    pub fn new(data_root: &Path, content_extension: impl Into<String>) -> Self {
        let committed_root = data_root.join(COMMITTED_DIR_NAME);
        Self {
            staging_root: data_root.join(STAGING_DIR_NAME),
            metadata: MetadataStore::new(committed_root.clone()),
            committed_root,
            content_extension: content_extension.into(),
        }
    }

    pub async fn ensure_roots(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.staging_root).await?;
        tokio::fs::create_dir_all(&self.committed_root).await?;
        Ok(())
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn committed_root(&self) -> &Path {
        &self.committed_root
    }

    pub fn staging_path_for(&self, id: &ItemId) -> Result<PathBuf, PathError> {
        item_dir_for(&self.staging_root, id)
    }

    pub fn committed_path_for(&self, id: &ItemId) -> Result<PathBuf, PathError> {
        item_dir_for(&self.committed_root, id)
    }

    pub fn content_file_name(&self, id: &ItemId) -> String {
        format!("{id}.{}", self.content_extension)
    }

    pub fn preview_file_name(&self, id: &ItemId) -> String {
        format!("{id}.{PREVIEW_EXTENSION}")
    }

    pub fn staged_content_path(&self, id: &ItemId) -> Result<PathBuf, PathError> {
        Ok(self.staging_path_for(id)?.join(self.content_file_name(id)))
    }

    pub fn staged_preview_path(&self, id: &ItemId) -> Result<PathBuf, PathError> {
        Ok(self.staging_path_for(id)?.join(self.preview_file_name(id)))
    }

    pub fn committed_content_path(&self, id: &ItemId) -> Result<PathBuf, PathError> {
        Ok(self.committed_path_for(id)?.join(self.content_file_name(id)))
    }

    pub async fn prepare_staging(&self, id: &ItemId) -> Result<PathBuf, CacheError> {
        let staging = self.staging_path_for(id)?;
        tokio::fs::create_dir_all(&staging).await?;
        Ok(staging)
    }

    pub async fn has_committed_content(&self, id: &ItemId) -> bool {
        match self.committed_content_path(id) {
            Ok(path) => is_file(&path).await,
            Err(_) => false,
        }
    }

    /// Moves the staged directory into the committed tree, replacing any prior
    /// committed version. Fails without touching either side when a staged
    /// file is missing.
    pub async fn promote(&self, id: &ItemId) -> Result<PathBuf, CacheError> {
        let staging = self.staging_path_for(id)?;
        let committed = self.committed_path_for(id)?;
        for required in [self.staged_content_path(id)?, self.staged_preview_path(id)?] {
            if !is_file(&required).await {
                return Err(CacheError::MissingStaged {
                    id: id.clone(),
                    path: required,
                });
            }
        }

        tokio::fs::create_dir_all(&self.committed_root).await?;
        let displaced = self.committed_root.join(format!(".{id}.old"));
        remove_dir_if_exists(&displaced).await?;

        let had_previous = tokio::fs::metadata(&committed).await.is_ok();
        if had_previous {
            tokio::fs::rename(&committed, &displaced).await?;
        }
        if let Err(err) = tokio::fs::rename(&staging, &committed).await {
            if had_previous && let Err(restore) = tokio::fs::rename(&displaced, &committed).await {
                tracing::error!(
                    item_id = %id,
                    error = %restore,
                    "failed to restore previous committed version"
                );
            }
            return Err(err.into());
        }
        if had_previous && let Err(err) = remove_dir_if_exists(&displaced).await {
            tracing::warn!(item_id = %id, error = %err, "failed to drop displaced version");
        }
        Ok(committed)
    }

    /// Deletes the committed directory (metadata record included). Returns
    /// whether anything was removed.
    pub async fn remove(&self, id: &ItemId) -> Result<bool, CacheError> {
        let committed = self.committed_path_for(id)?;
        remove_dir_if_exists(&committed).await
    }

    pub async fn list_committed(&self) -> Result<Vec<ItemId>, CacheError> {
        let mut entries = match tokio::fs::read_dir(&self.committed_root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(item_id_from_dir_name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Empties the staging root, returning how many entries were deleted.
    pub async fn clear_staging(&self) -> Result<usize, CacheError> {
        let mut entries = match tokio::fs::read_dir(&self.staging_root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn remove_dir_if_exists(path: &Path) -> Result<bool, CacheError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}
