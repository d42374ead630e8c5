use thiserror::Error;
use workshop_core::{FileType, ItemId, ListKind, PublishedItem, WorkshopClient, WorkshopError};

/// What the download orchestrator needs to know about one remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDescriptor {
    pub id: ItemId,
    pub version_tag: String,
    pub title: String,
    pub content_handle: String,
    pub preview_handle: String,
}

impl From<PublishedItem> for ItemDescriptor {
    fn from(item: PublishedItem) -> Self {
        Self {
            id: item.id,
            version_tag: item.version_tag,
            title: item.title,
            content_handle: item.content_handle,
            preview_handle: item.preview_handle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogCursor {
    /// Next page to request, starting at 1.
    pub page_number: u32,
    pub total_results: u32,
    pub results_seen: u32,
}

impl CatalogCursor {
    pub fn start() -> Self {
        Self {
            page_number: 1,
            total_results: 0,
            results_seen: 0,
        }
    }
}

impl Default for CatalogCursor {
    fn default() -> Self {
        Self::start()
    }
}

#[derive(Debug, Clone)]
pub struct CatalogPage {
    /// Every id the platform returned on this page, eligible or not.
    pub observed: Vec<ItemId>,
    /// The subset that should be downloaded.
    pub items: Vec<ItemDescriptor>,
    pub cursor: CatalogCursor,
    pub done: bool,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog page {page} failed: {source}")]
    Page {
        page: u32,
        #[source]
        source: WorkshopError,
    },
    #[error("catalog pass exceeded {0} pages")]
    TooManyPages(u32),
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Page { source, .. } => source.is_retryable(),
            CatalogError::TooManyPages(_) => true,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CatalogError::Page { source, .. } => source.retry_after_secs(),
            CatalogError::TooManyPages(_) => None,
        }
    }
}

const MAX_PAGES_PER_PASS: u32 = 10_000;

/// Paginates one account listing; a fresh [`CatalogCursor`] starts a pass.
#[derive(Clone)]
pub struct CatalogQuery {
    client: WorkshopClient,
    account_id: String,
    app_id: u32,
    list: ListKind,
}

impl CatalogQuery {
    pub fn subscribed(client: WorkshopClient, account_id: impl Into<String>, app_id: u32) -> Self {
        Self {
            client,
            account_id: account_id.into(),
            app_id,
            list: ListKind::Subscribed,
        }
    }

    pub fn with_list(mut self, list: ListKind) -> Self {
        self.list = list;
        self
    }

    pub fn list(&self) -> ListKind {
        self.list
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    /// Only community items built for this app are downloaded.
    pub fn is_eligible(&self, item: &PublishedItem) -> bool {
        item.consumer_app_id == self.app_id && item.file_type == FileType::Community
    }

    /// Requests `cursor.page_number`. The pass is done once a page comes back
    /// empty, or once a single page carries every reported result.
    pub async fn fetch_next_page(&self, cursor: &CatalogCursor) -> Result<CatalogPage, CatalogError> {
        let page_number = cursor.page_number.max(1);
        if page_number > MAX_PAGES_PER_PASS {
            return Err(CatalogError::TooManyPages(MAX_PAGES_PER_PASS));
        }
        let page = self
            .client
            .query_catalog(&self.account_id, self.list, self.app_id, page_number)
            .await
            .map_err(|source| CatalogError::Page {
                page: page_number,
                source,
            })?;

        let returned = page.items.len() as u32;
        let done = returned == 0 || returned >= page.total;
        let next = CatalogCursor {
            page_number: page_number.saturating_add(1),
            total_results: page.total,
            results_seen: cursor.results_seen.saturating_add(returned),
        };
        tracing::debug!(
            page = page_number,
            returned,
            total = page.total,
            seen = next.results_seen,
            done,
            "catalog page fetched"
        );

        let mut observed = Vec::with_capacity(page.items.len());
        let mut items = Vec::new();
        for item in page.items {
            observed.push(item.id.clone());
            if self.is_eligible(&item) {
                items.push(ItemDescriptor::from(item));
            } else {
                tracing::trace!(item_id = %item.id, "skipping ineligible catalog item");
            }
        }

        Ok(CatalogPage {
            observed,
            items,
            cursor: next,
            done,
        })
    }
}
