use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque identifier the platform assigns to a published item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Subscribed,
    Published,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Subscribed => "subscribed",
            ListKind::Published => "published",
        }
    }

    /// Sort order the platform applies to this listing.
    pub fn sort_order(&self) -> &'static str {
        match self {
            ListKind::Subscribed => "subscription_date_desc",
            ListKind::Published => "last_updated_desc",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Community,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PublishedItem {
    pub id: ItemId,
    pub version_tag: String,
    pub title: String,
    pub content_handle: String,
    pub preview_handle: String,
    pub consumer_app_id: u32,
    #[serde(default)]
    pub file_type: FileType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogPage {
    pub total: u32,
    #[serde(default)]
    pub items: Vec<PublishedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileSnapshot {
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransferLink {
    pub href: Url,
    pub method: String,
    #[serde(default)]
    pub templated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    FriendsOnly,
    Private,
}

/// Creates a new published item from files already placed in account storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishRequest {
    pub app_id: u32,
    pub title: String,
    pub description: String,
    pub content_handle: String,
    pub preview_handle: String,
    pub visibility: Visibility,
    pub file_type: FileType,
    pub tags: Vec<String>,
}

/// Fields left as `None` keep their published value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PublishReceipt {
    pub id: ItemId,
    /// Set when the account still has to accept the platform's legal
    /// agreement before the item becomes visible.
    #[serde(default)]
    pub needs_legal_agreement: bool,
}

/// Pre-signed destination for one file, plus the shareable handle the file
/// is known by once uploaded.
#[derive(Debug, Deserialize, Serialize)]
pub struct UploadSlot {
    pub href: Url,
    pub method: String,
    pub handle: String,
}
