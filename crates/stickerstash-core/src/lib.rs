//! Core allocation engine and usage ledger for stickerstash
//!
//! This crate decides which collection volume (sticker set) receives a cloned
//! sticker, records per-user and global usage in the content store, and
//! orchestrates the two through the ingestion pipeline. Platform transport,
//! image conversion and localization are consumed through the traits in
//! [`container`] and [`external`].

pub mod allocator;
pub mod container;
pub mod error;
pub mod external;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod shard;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use allocator::{Allocator, Placement, ProbeStep};
pub use container::{ContainerClient, ContainerError, MediaSource, StickerItem, StickerPayload};
pub use error::{Error, Step};
pub use external::{Codec, CodecError, LanguageCatalog};
pub use ledger::{Ledger, ProfileRefresh};
pub use models::{ContentKind, Profile, UsageSnapshot, UserIdentity};
pub use pipeline::{
    InboundContent, IngestLimits, IngestOutcome, IngestionPipeline, PhotoSize, PlacementKind,
};
pub use reconcile::DriftReport;
pub use shard::{Capacity, ShardMetadata, ShardReference};
pub use store::{Batch, Command, ContentStore, StoreError};
