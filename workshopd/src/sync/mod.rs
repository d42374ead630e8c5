pub mod cache;
pub mod catalog;
pub mod download;
pub mod engine;
pub mod metadata;
pub mod paths;
pub mod publish;
pub mod retry;
pub mod sweep;
pub mod transfer;
