use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use workshop_core::{ItemId, PublishReceipt, WorkshopClient};

use crate::progress::{FlushOutcome, ProgressSync};
use crate::sync::cache::{CacheLayout, DEFAULT_CONTENT_EXTENSION};
use crate::sync::engine::{PlatformEvent, SyncEngine};
use crate::sync::publish::{LocalItem, Publisher};
use crate::sync::retry::RetryPolicy;
use crate::sync::transfer::{TransferClient, TransferConfig};

const DEFAULT_DATA_DIR_NAME: &str = "workshopd";
const DEFAULT_CATALOG_POLL_SECS: u64 = 300;
const DEFAULT_PROGRESS_MIN_INTERVAL_SECS: u64 = 5;
const DEFAULT_PROGRESS_FLUSH_SECS: u64 = 5;
const DEFAULT_DOWNLOAD_CONCURRENCY: u64 = 4;
const DEFAULT_UPLOAD_CONCURRENCY: u64 = 2;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct DaemonConfig {
    pub token: String,
    pub account_id: String,
    pub app_id: u32,
    pub api_url: Option<String>,
    pub data_root: PathBuf,
    pub content_extension: String,
    pub catalog_poll_interval: Duration,
    pub progress_min_interval: Duration,
    pub progress_flush_interval: Duration,
    pub clear_staging: bool,
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = required_env(&lookup, "WORKSHOP_TOKEN")?;
        let account_id = required_env(&lookup, "WORKSHOP_ACCOUNT_ID")?;
        let app_id = required_env(&lookup, "WORKSHOP_APP_ID")?
            .trim()
            .parse::<u32>()
            .context("WORKSHOP_APP_ID must be an unsigned integer")?;
        let api_url = lookup("WORKSHOP_API_URL").filter(|value| !value.trim().is_empty());
        let data_root = match lookup("WORKSHOP_DATA_DIR") {
            Some(value) => match dirs::home_dir() {
                Some(home) => expand_with_home(&value, &home),
                None => PathBuf::from(value),
            },
            None => default_data_root()?,
        };
        let content_extension = lookup("WORKSHOP_CONTENT_EXT")
            .map(|value| value.trim().trim_start_matches('.').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_EXTENSION.to_string());
        let catalog_poll_interval = Duration::from_secs(read_u64_env(
            &lookup,
            "WORKSHOP_CATALOG_POLL_SECS",
            DEFAULT_CATALOG_POLL_SECS,
        ));
        let progress_min_interval = Duration::from_secs(read_u64_env(
            &lookup,
            "WORKSHOP_PROGRESS_MIN_INTERVAL_SECS",
            DEFAULT_PROGRESS_MIN_INTERVAL_SECS,
        ));
        let progress_flush_interval = Duration::from_secs(read_u64_env(
            &lookup,
            "WORKSHOP_PROGRESS_FLUSH_SECS",
            DEFAULT_PROGRESS_FLUSH_SECS,
        ));
        let clear_staging = read_bool_env(&lookup, "WORKSHOP_CLEAR_STAGING", false);
        let download_concurrency = read_u64_env(
            &lookup,
            "WORKSHOP_DOWNLOAD_CONCURRENCY",
            DEFAULT_DOWNLOAD_CONCURRENCY,
        ) as usize;
        let upload_concurrency = read_u64_env(
            &lookup,
            "WORKSHOP_UPLOAD_CONCURRENCY",
            DEFAULT_UPLOAD_CONCURRENCY,
        ) as usize;

        Ok(Self {
            token,
            account_id,
            app_id,
            api_url,
            data_root,
            content_extension,
            catalog_poll_interval,
            progress_min_interval,
            progress_flush_interval,
            clear_staging,
            download_concurrency,
            upload_concurrency,
        })
    }

    fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            download_concurrency: self.download_concurrency,
            upload_concurrency: self.upload_concurrency,
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
    progress: Arc<ProgressSync>,
    events_tx: mpsc::Sender<PlatformEvent>,
    events_rx: mpsc::Receiver<PlatformEvent>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let layout = CacheLayout::new(&config.data_root, config.content_extension.clone());
        layout
            .ensure_roots()
            .await
            .with_context(|| format!("failed to create cache roots under {:?}", config.data_root))?;
        if config.clear_staging {
            let cleared = layout
                .clear_staging()
                .await
                .context("failed to clear staging directory")?;
            tracing::info!(cleared, "staging directory cleared");
        }

        let client = build_client(config.api_url.as_deref(), &config.token)?;
        let transfer = TransferClient::with_config(config.transfer_config());
        let engine = SyncEngine::new(
            client.clone(),
            transfer,
            layout,
            config.account_id.clone(),
            config.app_id,
        );
        let progress = ProgressSync::new(client, config.account_id.clone())
            .with_min_interval(config.progress_min_interval);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            engine: Arc::new(engine),
            progress: Arc::new(progress),
            events_tx,
            events_rx,
        })
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    pub fn progress(&self) -> Arc<ProgressSync> {
        Arc::clone(&self.progress)
    }

    /// Producer side for platform notifications (subscriptions, overlay).
    pub fn event_sender(&self) -> mpsc::Sender<PlatformEvent> {
        self.events_tx.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            engine,
            progress,
            events_tx,
            events_rx,
        } = self;
        drop(events_tx);
        tracing::info!(
            data_root = %config.data_root.display(),
            app_id = config.app_id,
            poll_secs = config.catalog_poll_interval.as_secs(),
            "workshopd started"
        );

        let catalog_handle = tokio::spawn(run_catalog_loop(
            Arc::clone(&engine),
            config.catalog_poll_interval,
            RetryPolicy::for_poll_interval(config.catalog_poll_interval),
        ));
        let event_handle = tokio::spawn(run_event_loop(Arc::clone(&engine), events_rx));
        let progress_handle = tokio::spawn(run_progress_loop(
            Arc::clone(&progress),
            config.progress_flush_interval,
            RetryPolicy::for_poll_interval(config.catalog_poll_interval),
        ));
        let mut ready = engine.content_ready();
        let ready_handle = tokio::spawn(async move {
            loop {
                match ready.recv().await {
                    Ok(item) => tracing::info!(
                        item_id = %item.id,
                        version = %item.version_tag,
                        title = %item.title,
                        "content ready"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "content ready listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        tracing::info!("shutdown requested");

        catalog_handle.abort();
        event_handle.abort();
        progress_handle.abort();
        ready_handle.abort();

        match progress.flush(true).await {
            Ok(outcome) => tracing::debug!(?outcome, "final progress flush"),
            Err(err) => tracing::warn!(error = %err, "final progress flush failed"),
        }
        Ok(())
    }
}

/// Re-initializes the remote profile for the configured account.
pub async fn reset_progress(config: &DaemonConfig, include_flags: bool) -> anyhow::Result<()> {
    let client = build_client(config.api_url.as_deref(), &config.token)?;
    let progress = ProgressSync::new(client, config.account_id.clone());
    progress
        .reset(include_flags)
        .await
        .context("failed to reset player progress")?;
    Ok(())
}

/// Shares a locally authored item. With `update` set, the files and text of
/// that already published item are replaced instead.
pub async fn publish_local_item(
    config: &DaemonConfig,
    item: &LocalItem,
    update: Option<&ItemId>,
) -> anyhow::Result<Option<PublishReceipt>> {
    let client = build_client(config.api_url.as_deref(), &config.token)?;
    let transfer = TransferClient::with_config(config.transfer_config());
    let publisher = Publisher::new(client, transfer, config.account_id.clone(), config.app_id);
    match update {
        Some(item_id) => {
            publisher
                .update(item_id, item)
                .await
                .with_context(|| format!("failed to update workshop item {item_id}"))?;
            Ok(None)
        }
        None => {
            let receipt = publisher
                .publish(item)
                .await
                .context("failed to publish workshop item")?;
            Ok(Some(receipt))
        }
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
