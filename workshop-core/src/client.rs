use std::time::SystemTime;

use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use thiserror::Error;
use url::Url;

use crate::types::{
    CatalogPage, ItemId, ItemUpdate, ListKind, ProfileSnapshot, PublishReceipt, PublishRequest,
    PublishedItem, TransferLink, UploadSlot,
};

const DEFAULT_BASE_URL: &str = "https://api.workshop.example";

#[derive(Debug, Error)]
pub enum WorkshopError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments")]
    InvalidBaseUrl,
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct WorkshopClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl WorkshopClient {
    pub fn new(token: impl Into<String>) -> Result<Self, WorkshopError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, WorkshopError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(WorkshopError::InvalidBaseUrl);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    /// Fetches one page (1-based) of an account's item listing.
    pub async fn query_catalog(
        &self,
        account_id: &str,
        list: ListKind,
        app_id: u32,
        page: u32,
    ) -> Result<CatalogPage, WorkshopError> {
        let mut url = self.endpoint(&["v1", "accounts", account_id, "ugc"])?;
        url.query_pairs_mut()
            .append_pair("list", list.as_str())
            .append_pair("app_id", &app_id.to_string())
            .append_pair("page", &page.max(1).to_string())
            .append_pair("sort", list.sort_order());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn fetch_file_details(&self, item_id: &ItemId) -> Result<PublishedItem, WorkshopError> {
        let url = self.endpoint(&["v1", "files", item_id.as_str()])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_download_link(&self, handle: &str) -> Result<TransferLink, WorkshopError> {
        let url = self.endpoint(&["v1", "content", handle, "link"])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Reserves `file_name` in the account's remote storage and returns
    /// where to upload it.
    pub async fn get_upload_link(
        &self,
        account_id: &str,
        file_name: &str,
    ) -> Result<UploadSlot, WorkshopError> {
        let mut url = self.endpoint(&["v1", "accounts", account_id, "storage", "upload"])?;
        url.query_pairs_mut().append_pair("file_name", file_name);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn publish_item(
        &self,
        account_id: &str,
        request: &PublishRequest,
    ) -> Result<PublishReceipt, WorkshopError> {
        let url = self.endpoint(&["v1", "accounts", account_id, "ugc"])?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(request)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn update_item(
        &self,
        item_id: &ItemId,
        update: &ItemUpdate,
    ) -> Result<(), WorkshopError> {
        let url = self.endpoint(&["v1", "files", item_id.as_str()])?;
        let response = self
            .http
            .patch(url)
            .header("Authorization", self.auth_header_value())
            .json(update)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn request_profile_snapshot(
        &self,
        account_id: &str,
    ) -> Result<ProfileSnapshot, WorkshopError> {
        let url = self.endpoint(&["v1", "accounts", account_id, "profile"])?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn upload_profile(
        &self,
        account_id: &str,
        snapshot: &ProfileSnapshot,
    ) -> Result<(), WorkshopError> {
        let url = self.endpoint(&["v1", "accounts", account_id, "profile"])?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .json(snapshot)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    /// Asks the profile store to re-initialize counters, and flags too when
    /// `include_flags` is set.
    pub async fn reset_profile(
        &self,
        account_id: &str,
        include_flags: bool,
    ) -> Result<(), WorkshopError> {
        let mut url = self.endpoint(&["v1", "accounts", account_id, "profile"])?;
        url.query_pairs_mut()
            .append_pair("include_flags", if include_flags { "true" } else { "false" });
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, WorkshopError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| WorkshopError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, WorkshopError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), WorkshopError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> WorkshopError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        WorkshopError::Api {
            status,
            body,
            retry_after,
        }
    }
}

impl WorkshopError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            WorkshopError::Api { status, .. } => Some(classify_api_status(*status)),
            WorkshopError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            WorkshopError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// Retry-After is either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )
}
