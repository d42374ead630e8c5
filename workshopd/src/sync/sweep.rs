use std::collections::HashSet;

use workshop_core::ItemId;

use super::cache::{CacheError, CacheLayout};
use super::download::InFlight;

/// Ids collected page by page during a catalog pass.
#[derive(Debug, Default)]
pub struct PassObservations {
    ids: HashSet<ItemId>,
    pages: u32,
}

impl PassObservations {
    pub fn record_page<'a>(&mut self, ids: impl IntoIterator<Item = &'a ItemId>) {
        self.ids.extend(ids.into_iter().cloned());
        self.pages += 1;
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Seals the observations once the last page has been seen. Only a
    /// completed pass can drive a sweep.
    pub fn finish(self) -> CompletedPass {
        CompletedPass {
            ids: self.ids,
            pages: self.pages,
        }
    }
}

#[derive(Debug)]
pub struct CompletedPass {
    ids: HashSet<ItemId>,
    pages: u32,
}

impl CompletedPass {
    pub fn contains(&self, id: &ItemId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<ItemId>,
    pub skipped_in_flight: Vec<ItemId>,
    pub failed: Vec<ItemId>,
}

/// Removes every committed entry the completed pass did not observe.
pub async fn sweep_unobserved(
    layout: &CacheLayout,
    in_flight: &InFlight,
    pass: &CompletedPass,
) -> Result<SweepReport, CacheError> {
    let mut report = SweepReport::default();
    for id in layout.list_committed().await? {
        if pass.contains(&id) {
            continue;
        }
        // An on-demand download owns this id right now.
        let Some(_claim) = in_flight.try_claim(&id) else {
            tracing::debug!(item_id = %id, "sweep skipped item with active download");
            report.skipped_in_flight.push(id);
            continue;
        };
        match layout.remove(&id).await {
            Ok(_) => {
                tracing::info!(item_id = %id, "removed unsubscribed workshop item");
                report.removed.push(id);
            }
            Err(err) => {
                tracing::warn!(item_id = %id, error = %err, "failed to remove unsubscribed item");
                report.failed.push(id);
            }
        }
    }
    Ok(report)
}
