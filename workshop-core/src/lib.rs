mod client;
mod types;

pub use client::{ApiErrorClass, WorkshopClient, WorkshopError};
pub use types::{
    CatalogPage, FileType, ItemId, ItemUpdate, ListKind, ProfileSnapshot, PublishReceipt,
    PublishRequest, PublishedItem, TransferLink, UploadSlot, Visibility,
};
