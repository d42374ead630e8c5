use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use workshop_core::{WorkshopClient, WorkshopError};

use super::state::{Mutation, ProgressState};

pub const DEFAULT_MIN_UPLOAD_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("api error: {0}")]
    Api(#[from] WorkshopError),
}

impl ProgressError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProgressError::Api(err) => err.is_retryable(),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProgressError::Api(err) => err.retry_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Uploaded,
    Clean,
    /// Dirty, but the minimum interval since the last upload has not passed.
    Deferred,
    NotInitialized,
}

/// Player progress mirrored against the remote profile store.
///
/// Mutations are synchronous and local. Remote work (population, uploads,
/// resets) is serialized through `remote`, so at most one request against the
/// profile store is outstanding at a time.
pub struct ProgressSync {
    client: WorkshopClient,
    account_id: String,
    min_interval: Duration,
    state: Mutex<Option<ProgressState>>,
    remote: AsyncMutex<()>,
    changed: Notify,
}

impl ProgressSync {
    pub fn new(client: WorkshopClient, account_id: impl Into<String>) -> Self {
        Self {
            client,
            account_id: account_id.into(),
            min_interval: DEFAULT_MIN_UPLOAD_INTERVAL,
            state: Mutex::new(None),
            remote: AsyncMutex::new(()),
            changed: Notify::new(),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<ProgressState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Populates local state from the profile store once.
    pub async fn ensure_loaded(&self) -> Result<(), ProgressError> {
        if self.is_initialized() {
            return Ok(());
        }
        let _remote = self.remote.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        self.populate().await
    }

    async fn populate(&self) -> Result<(), ProgressError> {
        let snapshot = self.client.request_profile_snapshot(&self.account_id).await?;
        tracing::info!(
            counters = snapshot.counters.len(),
            flags = snapshot.flags.len(),
            "player progress loaded"
        );
        *self.lock_state() = Some(ProgressState::from_snapshot(snapshot));
        Ok(())
    }

    fn mutate(&self, apply: impl FnOnce(&mut ProgressState) -> Mutation) -> Mutation {
        let mutation = match self.lock_state().as_mut() {
            Some(state) => apply(state),
            None => Mutation::Rejected,
        };
        if mutation == Mutation::Changed {
            self.changed.notify_one();
        }
        mutation
    }

    pub fn set_counter(&self, name: &str, value: i64) -> Mutation {
        self.mutate(|state| state.set_counter(name, value))
    }

    pub fn increment_counter(&self, name: &str, delta: i64) -> Mutation {
        self.mutate(|state| state.increment_counter(name, delta))
    }

    pub fn set_flag(&self, name: &str) -> Mutation {
        self.mutate(|state| state.set_flag(name))
    }

    /// Unlocks `name` and pushes it to the profile store right away.
    pub async fn unlock_and_upload(&self, name: &str) -> Result<Mutation, ProgressError> {
        let mutation = self.set_flag(name);
        if mutation == Mutation::Changed {
            self.flush(true).await?;
        }
        Ok(mutation)
    }

    pub fn get_counter(&self, name: &str) -> i64 {
        self.lock_state()
            .as_ref()
            .and_then(|state| state.counter(name))
            .unwrap_or(0)
    }

    pub fn is_counter(&self, name: &str) -> bool {
        self.lock_state()
            .as_ref()
            .is_some_and(|state| state.is_counter(name))
    }

    pub fn is_unlocked(&self, name: &str) -> bool {
        self.lock_state()
            .as_ref()
            .is_some_and(|state| state.is_unlocked(name))
    }

    pub fn is_dirty(&self) -> bool {
        self.lock_state()
            .as_ref()
            .is_some_and(ProgressState::is_dirty)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Uploads the full state when dirty and either forced or past the
    /// minimum interval. A failed upload leaves the state dirty.
    pub async fn flush(&self, force: bool) -> Result<FlushOutcome, ProgressError> {
        let _remote = self.remote.lock().await;
        let (snapshot, revision) = {
            let guard = self.lock_state();
            let Some(state) = guard.as_ref() else {
                return Ok(FlushOutcome::NotInitialized);
            };
            if !state.is_dirty() {
                return Ok(FlushOutcome::Clean);
            }
            if !state.upload_due(Instant::now(), self.min_interval, force) {
                tracing::trace!("progress upload deferred");
                return Ok(FlushOutcome::Deferred);
            }
            state.snapshot()
        };

        if let Err(err) = self.client.upload_profile(&self.account_id, &snapshot).await {
            tracing::warn!(error = %err, "progress upload failed");
            return Err(err.into());
        }
        if let Some(state) = self.lock_state().as_mut() {
            state.mark_uploaded(revision, Instant::now());
        }
        tracing::debug!(revision, "progress uploaded");
        Ok(FlushOutcome::Uploaded)
    }

    /// Re-initializes the remote profile and re-populates from it. Mutations
    /// are rejected until the fresh snapshot is in place.
    pub async fn reset(&self, include_flags: bool) -> Result<(), ProgressError> {
        let _remote = self.remote.lock().await;
        *self.lock_state() = None;
        self.client
            .reset_profile(&self.account_id, include_flags)
            .await?;
        tracing::info!(include_flags, "player progress reset");
        self.populate().await
    }

    /// Resolves after a mutation changed the state.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
