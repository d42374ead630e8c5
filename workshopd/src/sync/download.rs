use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use workshop_core::{ItemId, WorkshopClient, WorkshopError};

use super::cache::{CacheError, CacheLayout};
use super::catalog::ItemDescriptor;
use super::metadata::{CacheEntry, MetadataError};
use super::paths::PathError;
use super::transfer::{TransferClient, TransferError};

const READY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    ContentFetching,
    PreviewFetching,
    Promoting,
    Committed,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Committed | DownloadState::Failed)
    }

    fn can_enter(self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (Idle, ContentFetching)
                | (ContentFetching, PreviewFetching)
                | (PreviewFetching, Promoting)
                | (Promoting, Committed)
                | (ContentFetching | PreviewFetching | Promoting, Failed)
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadState::Idle => "idle",
            DownloadState::ContentFetching => "content_fetching",
            DownloadState::PreviewFetching => "preview_fetching",
            DownloadState::Promoting => "promoting",
            DownloadState::Committed => "committed",
            DownloadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("api error: {0}")]
    Api(#[from] WorkshopError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("invalid download transition {from} -> {to}")]
    InvalidTransition {
        from: DownloadState,
        to: DownloadState,
    },
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Api(err) => err.is_retryable(),
            DownloadError::Transfer(_) => true,
            _ => false,
        }
    }
}

/// Transient per-item state for one synchronization attempt.
#[derive(Debug)]
pub struct DownloadTask {
    pub id: ItemId,
    pub staging_path: PathBuf,
    pub committed_path: PathBuf,
    pub content_done: bool,
    pub preview_done: bool,
    state: DownloadState,
}

impl DownloadTask {
    pub fn new(layout: &CacheLayout, id: &ItemId) -> Result<Self, PathError> {
        Ok(Self {
            id: id.clone(),
            staging_path: layout.staging_path_for(id)?,
            committed_path: layout.committed_path_for(id)?,
            content_done: false,
            preview_done: false,
            state: DownloadState::Idle,
        })
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn enter(&mut self, next: DownloadState) -> Result<(), DownloadError> {
        if !self.state.can_enter(next) {
            return Err(DownloadError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(item_id = %self.id, from = %self.state, to = %next, "download transition");
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Committed(CacheEntry),
    TitleUpdated(CacheEntry),
    UpToDate,
    AlreadyInFlight,
}

/// Fired once per task that reaches [`DownloadState::Committed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentReady {
    pub id: ItemId,
    pub version_tag: String,
    pub title: String,
    pub directory_path: PathBuf,
}

/// Ids that currently own their cache slot. Claims are released on drop.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<ItemId>>>,
}

impl InFlight {
    pub fn try_claim(&self, id: &ItemId) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id: id.clone(),
        })
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<ItemId>>>,
    id: ItemId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

struct ActiveDownload {
    counter: Arc<watch::Sender<usize>>,
}

impl ActiveDownload {
    fn start(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for ActiveDownload {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Clone)]
pub struct Downloader {
    client: WorkshopClient,
    transfer: TransferClient,
    layout: CacheLayout,
    in_flight: InFlight,
    active: Arc<watch::Sender<usize>>,
    ready: broadcast::Sender<ContentReady>,
}

impl Downloader {
    pub fn new(client: WorkshopClient, transfer: TransferClient, layout: CacheLayout) -> Self {
        let (active, _) = watch::channel(0usize);
        let (ready, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Self {
            client,
            transfer,
            layout,
            in_flight: InFlight::default(),
            active: Arc::new(active),
            ready,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn downloads_in_flight(&self) -> watch::Receiver<usize> {
        self.active.subscribe()
    }

    pub fn content_ready(&self) -> broadcast::Receiver<ContentReady> {
        self.ready.subscribe()
    }

    /// Brings the cached copy of `item` up to date. A request for an id that
    /// is already being synchronized is coalesced into the running one.
    pub async fn sync_item(&self, item: &ItemDescriptor) -> Result<DownloadOutcome, DownloadError> {
        let Some(_claim) = self.in_flight.try_claim(&item.id) else {
            tracing::debug!(item_id = %item.id, "download already in flight");
            return Ok(DownloadOutcome::AlreadyInFlight);
        };

        if let Some(entry) = self.current_entry(&item.id).await
            && entry.recorded_version_tag == item.version_tag
        {
            if entry.recorded_title == item.title {
                return Ok(DownloadOutcome::UpToDate);
            }
            let updated = self
                .layout
                .metadata()
                .write(&item.id, &entry.recorded_version_tag, &item.title)
                .await?;
            tracing::info!(item_id = %item.id, title = %item.title, "cached item renamed");
            return Ok(DownloadOutcome::TitleUpdated(updated));
        }

        let _active = ActiveDownload::start(&self.active);
        let mut task = DownloadTask::new(&self.layout, &item.id)?;
        match self.run_task(&mut task, item).await {
            Ok(entry) => {
                tracing::info!(
                    item_id = %item.id,
                    version = %item.version_tag,
                    "workshop item committed"
                );
                let _ = self.ready.send(ContentReady {
                    id: entry.id.clone(),
                    version_tag: entry.recorded_version_tag.clone(),
                    title: entry.recorded_title.clone(),
                    directory_path: entry.directory_path.clone(),
                });
                Ok(DownloadOutcome::Committed(entry))
            }
            Err(err) => {
                let failed_in = task.state();
                if task.enter(DownloadState::Failed).is_err() {
                    tracing::debug!(item_id = %item.id, state = %failed_in, "task failed outside a fetch stage");
                }
                tracing::warn!(
                    item_id = %item.id,
                    stage = %failed_in,
                    error = %err,
                    "workshop item download failed"
                );
                Err(err)
            }
        }
    }

    /// Recorded entry, provided the committed content file is actually there.
    async fn current_entry(&self, id: &ItemId) -> Option<CacheEntry> {
        let entry = self.layout.metadata().read(id).await?;
        if self.layout.has_committed_content(id).await {
            Some(entry)
        } else {
            tracing::debug!(item_id = %id, "metadata record without committed content");
            None
        }
    }

    async fn run_task(
        &self,
        task: &mut DownloadTask,
        item: &ItemDescriptor,
    ) -> Result<CacheEntry, DownloadError> {
        task.enter(DownloadState::ContentFetching)?;
        self.layout.prepare_staging(&task.id).await?;
        let content_path = self.layout.staged_content_path(&task.id)?;
        self.fetch(&item.content_handle, &content_path).await?;
        task.content_done = true;

        task.enter(DownloadState::PreviewFetching)?;
        let preview_path = self.layout.staged_preview_path(&task.id)?;
        self.fetch(&item.preview_handle, &preview_path).await?;
        task.preview_done = true;

        task.enter(DownloadState::Promoting)?;
        self.layout.promote(&task.id).await?;
        let entry = self
            .layout
            .metadata()
            .write(&task.id, &item.version_tag, &item.title)
            .await?;
        task.enter(DownloadState::Committed)?;
        Ok(entry)
    }

    async fn fetch(&self, handle: &str, target: &Path) -> Result<u64, DownloadError> {
        let link = self.client.get_download_link(handle).await?;
        Ok(self.transfer.download_to_path(&link.href, target).await?)
    }
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
