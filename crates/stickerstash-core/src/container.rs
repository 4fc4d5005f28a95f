//! Remote container client
//!
//! The messaging platform hosts the volumes. This module defines the narrow
//! interface the allocator and pipeline need from it; the platform
//! implementation lives in the server crate.

use crate::shard::ShardMetadata;
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the container service or the media source.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container is full and refused the item
    #[error("container {name} rejected the item: capacity reached")]
    CapacityExceeded { name: String },

    /// The platform refused to deliver to this user
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The platform asked us to slow down
    #[error("rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    /// The platform rejected the request
    #[error("request rejected ({code}): {description}")]
    Rejected { code: i64, description: String },

    /// A downloaded file exceeded the allowed size
    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// Network or decoding failure talking to the platform
    #[error("transport error: {0}")]
    Transport(String),
}

/// What is sent to the platform for one sticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StickerPayload {
    /// A file already hosted by the platform
    FileId(String),
    /// PNG bytes to upload
    Upload(Vec<u8>),
}

/// One item to place into a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerItem {
    pub payload: StickerPayload,
    pub emoji: String,
    pub is_animated: bool,
}

/// Creates, fetches and appends to named volumes on the platform.
///
/// Implementations enforce no business rules; capacity and homogeneity are
/// decided by the allocator.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Metadata of the named volume, `None` when it does not exist.
    async fn get_container(&self, name: &str) -> Result<Option<ShardMetadata>, ContainerError>;

    /// Append an item to an existing volume owned by `owner_id`.
    async fn append_item(
        &self,
        owner_id: u64,
        name: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError>;

    /// Create a volume owned by `owner_id` with `item` as its first item.
    async fn create_container(
        &self,
        owner_id: u64,
        name: &str,
        title: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError>;
}

/// Downloads files hosted by the platform.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Fetch a file, refusing anything larger than `max_bytes`.
    async fn fetch(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, ContainerError>;
}
