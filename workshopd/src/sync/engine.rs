use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use workshop_core::{ItemId, ListKind, WorkshopClient, WorkshopError};

use super::cache::{CacheError, CacheLayout};
use super::catalog::{CatalogCursor, CatalogError, CatalogQuery, ItemDescriptor};
use super::download::{ContentReady, DownloadError, DownloadOutcome, Downloader};
use super::sweep::{PassObservations, sweep_unobserved};
use super::transfer::TransferClient;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("api error: {0}")]
    Api(#[from] WorkshopError),
    #[error("download error: {0}")]
    Download(#[from] DownloadError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("item {0} has a download in flight")]
    ItemBusy(ItemId),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Catalog(err) => err.is_retryable(),
            EngineError::Api(err) => err.is_retryable(),
            EngineError::Download(err) => err.is_retryable(),
            EngineError::ItemBusy(_) => true,
            EngineError::Cache(_) => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EngineError::Catalog(err) => err.retry_after_secs(),
            EngineError::Api(err) => err.retry_after_secs(),
            EngineError::Download(DownloadError::Api(err)) => err.retry_after_secs(),
            _ => None,
        }
    }
}

/// Notifications delivered by the platform while the game is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    ItemSubscribed { item_id: ItemId, app_id: u32 },
    OverlayActivated { active: bool },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pages: u32,
    pub observed: usize,
    pub committed: Vec<ItemId>,
    pub title_updates: Vec<ItemId>,
    pub up_to_date: usize,
    pub coalesced: Vec<ItemId>,
    pub failed: Vec<ItemId>,
    pub removed: Vec<ItemId>,
    pub skipped_in_flight: Vec<ItemId>,
}

impl PassReport {
    fn record(&mut self, id: &ItemId, outcome: Result<DownloadOutcome, DownloadError>) {
        match outcome {
            Ok(DownloadOutcome::Committed(_)) => self.committed.push(id.clone()),
            Ok(DownloadOutcome::TitleUpdated(_)) => self.title_updates.push(id.clone()),
            Ok(DownloadOutcome::UpToDate) => self.up_to_date += 1,
            Ok(DownloadOutcome::AlreadyInFlight) => self.coalesced.push(id.clone()),
            // Logged by the downloader; the id still counts as observed.
            Err(_) => self.failed.push(id.clone()),
        }
    }
}

/// Drives catalog passes and on-demand downloads over one cache layout.
pub struct SyncEngine {
    client: WorkshopClient,
    catalog: CatalogQuery,
    downloader: Downloader,
    pass_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        client: WorkshopClient,
        transfer: TransferClient,
        layout: CacheLayout,
        account_id: impl Into<String>,
        app_id: u32,
    ) -> Self {
        Self {
            catalog: CatalogQuery::subscribed(client.clone(), account_id, app_id),
            downloader: Downloader::new(client.clone(), transfer, layout),
            client,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        self.downloader.layout()
    }

    pub fn app_id(&self) -> u32 {
        self.catalog.app_id()
    }

    pub fn content_ready(&self) -> broadcast::Receiver<ContentReady> {
        self.downloader.content_ready()
    }

    pub fn downloads_in_flight(&self) -> watch::Receiver<usize> {
        self.downloader.downloads_in_flight()
    }

    /// Walks every page of the subscribed listing, synchronizing each page's
    /// items before the next page is requested, then sweeps entries the pass
    /// did not observe. A failed page aborts the pass without sweeping.
    pub async fn run_catalog_pass(&self) -> Result<PassReport, EngineError> {
        let _pass = self.pass_lock.lock().await;
        let mut cursor = CatalogCursor::start();
        let mut observations = PassObservations::default();
        let mut report = PassReport::default();

        loop {
            let page = self.catalog.fetch_next_page(&cursor).await?;
            observations.record_page(&page.observed);
            let outcomes = join_all(page.items.iter().map(|item| self.downloader.sync_item(item))).await;
            for (item, outcome) in page.items.iter().zip(outcomes) {
                report.record(&item.id, outcome);
            }
            cursor = page.cursor;
            if page.done {
                break;
            }
        }

        let pass = observations.finish();
        report.pages = pass.pages();
        report.observed = pass.len();
        let sweep = sweep_unobserved(self.downloader.layout(), self.downloader.in_flight(), &pass).await?;
        report.removed = sweep.removed;
        report.skipped_in_flight = sweep.skipped_in_flight;
        report.failed.extend(sweep.failed);

        tracing::info!(
            pages = report.pages,
            observed = report.observed,
            committed = report.committed.len(),
            failed = report.failed.len(),
            removed = report.removed.len(),
            "catalog pass complete"
        );
        Ok(report)
    }

    /// On-demand download for an item the player just subscribed to.
    /// Returns `None` when the item belongs to another app or is not
    /// downloadable community content.
    pub async fn on_item_subscribed(
        &self,
        item_id: &ItemId,
        app_id: u32,
    ) -> Result<Option<DownloadOutcome>, EngineError> {
        if app_id != self.catalog.app_id() {
            tracing::debug!(item_id = %item_id, app_id, "ignoring subscription for another app");
            return Ok(None);
        }
        let details = self.client.fetch_file_details(item_id).await?;
        if !self.catalog.is_eligible(&details) {
            tracing::debug!(item_id = %item_id, "subscribed item is not downloadable");
            return Ok(None);
        }
        let outcome = self
            .downloader
            .sync_item(&ItemDescriptor::from(details))
            .await?;
        Ok(Some(outcome))
    }

    pub async fn handle_event(&self, event: PlatformEvent) -> Result<(), EngineError> {
        match event {
            PlatformEvent::ItemSubscribed { item_id, app_id } => {
                self.on_item_subscribed(&item_id, app_id).await?;
            }
            PlatformEvent::OverlayActivated { active } => {
                tracing::trace!(active, "overlay toggled");
            }
        }
        Ok(())
    }

    /// First page of the account's own published items for this app.
    pub async fn published_items(&self) -> Result<Vec<ItemDescriptor>, EngineError> {
        let published = self.catalog.clone().with_list(ListKind::Published);
        let page = published.fetch_next_page(&CatalogCursor::start()).await?;
        Ok(page.items)
    }

    /// Drops a committed item right away instead of waiting for the next sweep.
    pub async fn unsubscribe(&self, item_id: &ItemId) -> Result<bool, EngineError> {
        let Some(_claim) = self.downloader.in_flight().try_claim(item_id) else {
            return Err(EngineError::ItemBusy(item_id.clone()));
        };
        let removed = self.downloader.layout().remove(item_id).await?;
        if removed {
            tracing::info!(item_id = %item_id, "workshop item removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
