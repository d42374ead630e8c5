use std::path::{Path, PathBuf};

use thiserror::Error;
use workshop_core::{
    FileType, ItemId, ItemUpdate, PublishReceipt, PublishRequest, Visibility, WorkshopClient,
    WorkshopError,
};

use super::transfer::{TransferClient, TransferError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("api error: {0}")]
    Api(#[from] WorkshopError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("{} is not a readable file", .0.display())]
    MissingFile(PathBuf),
    #[error("{} has no usable file name", .0.display())]
    InvalidFileName(PathBuf),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Api(err) => err.is_retryable(),
            PublishError::Transfer(_) => true,
            _ => false,
        }
    }
}

/// A level authored on this machine, ready to be shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalItem {
    pub content_path: PathBuf,
    pub preview_path: PathBuf,
    pub title: String,
    pub description: String,
}

/// Uploads local content and preview files, then publishes or updates the
/// matching workshop item.
#[derive(Clone)]
pub struct Publisher {
    client: WorkshopClient,
    transfer: TransferClient,
    account_id: String,
    app_id: u32,
}

impl Publisher {
    pub fn new(
        client: WorkshopClient,
        transfer: TransferClient,
        account_id: impl Into<String>,
        app_id: u32,
    ) -> Self {
        Self {
            client,
            transfer,
            account_id: account_id.into(),
            app_id,
        }
    }

    /// New items are public community content for this app.
    pub async fn publish(&self, item: &LocalItem) -> Result<PublishReceipt, PublishError> {
        let title = validate_title(&item.title)?;
        let content_handle = self.upload(&item.content_path).await?;
        let preview_handle = self.upload(&item.preview_path).await?;
        let receipt = self
            .client
            .publish_item(
                &self.account_id,
                &PublishRequest {
                    app_id: self.app_id,
                    title: title.to_string(),
                    description: item.description.clone(),
                    content_handle,
                    preview_handle,
                    visibility: Visibility::Public,
                    file_type: FileType::Community,
                    tags: Vec::new(),
                },
            )
            .await?;
        if receipt.needs_legal_agreement {
            tracing::warn!(
                item_id = %receipt.id,
                "item published but hidden until the workshop agreement is accepted"
            );
        } else {
            tracing::info!(item_id = %receipt.id, title, "workshop item published");
        }
        Ok(receipt)
    }

    /// Replaces the files, title and description of an item this account
    /// already published.
    pub async fn update(&self, item_id: &ItemId, item: &LocalItem) -> Result<(), PublishError> {
        let title = validate_title(&item.title)?;
        let content_handle = self.upload(&item.content_path).await?;
        let preview_handle = self.upload(&item.preview_path).await?;
        let update = ItemUpdate {
            title: Some(title.to_string()),
            description: Some(item.description.clone()),
            content_handle: Some(content_handle),
            preview_handle: Some(preview_handle),
        };
        self.client.update_item(item_id, &update).await?;
        tracing::info!(item_id = %item_id, title, "workshop item updated");
        Ok(())
    }

    async fn upload(&self, source: &Path) -> Result<String, PublishError> {
        let is_file = tokio::fs::metadata(source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(PublishError::MissingFile(source.to_path_buf()));
        }
        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PublishError::InvalidFileName(source.to_path_buf()))?;
        let slot = self.client.get_upload_link(&self.account_id, file_name).await?;
        self.transfer.upload_from_path(&slot.href, source).await?;
        tracing::debug!(file = file_name, handle = %slot.handle, "file uploaded to account storage");
        Ok(slot.handle)
    }
}

fn validate_title(title: &str) -> Result<&str, PublishError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PublishError::EmptyTitle);
    }
    Ok(title)
}
