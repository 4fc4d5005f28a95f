//! Ingestion pipeline
//!
//! Turns one piece of inbound content into an item placed in the owner's
//! collection: classify, pick a volume, append or create, then record usage.
//! Each step fails independently and a failure stops everything after it.

use crate::allocator::{Allocator, Placement};
use crate::container::{ContainerClient, ContainerError, MediaSource, StickerItem, StickerPayload};
use crate::error::{Error, Step};
use crate::external::{Codec, CodecError};
use crate::ledger::Ledger;
use crate::models::{ContentKind, UserIdentity};
use crate::shard::{shard_title, ShardReference};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use strum::{AsRefStr, Display};
use tracing::{debug, info, warn};

/// Emoji attached to items produced by the codec.
pub const CONVERTED_EMOJI: &str = "🖼";

/// One size variant of an inbound photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

impl PhotoSize {
    fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Content received from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Sticker {
        file_id: String,
        emoji: Option<String>,
        is_animated: bool,
        is_video: bool,
        file_size: Option<u64>,
    },
    Photo {
        sizes: Vec<PhotoSize>,
    },
}

/// Pick the smallest photo whose longest side reaches `target`, or the
/// largest one when none does.
pub fn select_photo_size(sizes: &[PhotoSize], target: u32) -> Option<&PhotoSize> {
    sizes
        .iter()
        .filter(|size| size.longest_side() >= target)
        .min_by_key(|size| size.longest_side())
        .or_else(|| sizes.iter().max_by_key(|size| size.longest_side()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    /// Largest file downloaded for conversion
    pub max_input_bytes: u64,
    /// Bounding box side of converted images
    pub max_dimension: u32,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 512 * 1024,
            max_dimension: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlacementKind {
    NewShard,
    ExistingShard,
}

/// Successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub placement: PlacementKind,
    pub shard: ShardReference,
    pub kind: ContentKind,
    /// Volumes inspected by the allocator
    pub probes: u32,
    /// Set when the item was placed but the usage counters were not updated
    pub counter_drift: Option<String>,
}

/// Classified content, ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Classified {
    item: StickerItem,
    kind: ContentKind,
}

impl Classified {
    /// The volume homogeneity flag follows from the content kind.
    fn new(payload: StickerPayload, emoji: String, kind: ContentKind) -> Self {
        Self {
            item: StickerItem {
                payload,
                emoji,
                is_animated: kind.is_animated(),
            },
            kind,
        }
    }
}

pub struct IngestionPipeline {
    allocator: Arc<Allocator>,
    ledger: Arc<Ledger>,
    containers: Arc<dyn ContainerClient>,
    media: Arc<dyn MediaSource>,
    codec: Arc<dyn Codec>,
    limits: IngestLimits,
}

impl IngestionPipeline {
    pub fn new(
        allocator: Arc<Allocator>,
        ledger: Arc<Ledger>,
        containers: Arc<dyn ContainerClient>,
        media: Arc<dyn MediaSource>,
        codec: Arc<dyn Codec>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            allocator,
            ledger,
            containers,
            media,
            codec,
            limits,
        }
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    /// Place `content` into the collection of `identity`.
    #[tracing::instrument(skip(self, identity, content), fields(owner_id = identity.id))]
    pub async fn ingest(
        &self,
        identity: &UserIdentity,
        content: &InboundContent,
    ) -> Result<IngestOutcome, Error> {
        let started = Instant::now();
        let owner_id = identity.id;

        let classified = self.classify(owner_id, content).await?;
        let placement = self
            .allocator
            .place_item(owner_id, classified.item.is_animated)
            .await?;

        let shard = self.mutate(identity, &placement, &classified.item).await?;

        let counter_drift = match self
            .ledger
            .increment_content_counter(owner_id, classified.kind)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    owner_id,
                    shard = %shard.name,
                    kind = %classified.kind,
                    error = %e,
                    "Item placed but usage was not recorded"
                );
                Some(e.to_string())
            }
        };

        let placement_kind = if placement.created {
            PlacementKind::NewShard
        } else {
            PlacementKind::ExistingShard
        };
        info!(
            owner_id,
            shard = %shard.name,
            kind = %classified.kind,
            placement = %placement_kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Item placed"
        );

        Ok(IngestOutcome {
            placement: placement_kind,
            shard,
            kind: classified.kind,
            probes: placement.probes,
            counter_drift,
        })
    }

    async fn classify(&self, owner_id: u64, content: &InboundContent) -> Result<Classified, Error> {
        match content {
            InboundContent::Sticker { is_video: true, .. } => Err(Error::Validation(
                "video stickers are not supported".to_string(),
            )),
            InboundContent::Sticker {
                file_id,
                emoji: Some(emoji),
                is_animated,
                ..
            } => {
                let kind = if *is_animated {
                    ContentKind::Animated
                } else {
                    ContentKind::Static
                };
                Ok(Classified::new(
                    StickerPayload::FileId(file_id.clone()),
                    emoji.clone(),
                    kind,
                ))
            }
            // Animated payloads cannot be re-encoded; keep the file as is.
            InboundContent::Sticker {
                file_id,
                emoji: None,
                is_animated: true,
                ..
            } => Ok(Classified::new(
                StickerPayload::FileId(file_id.clone()),
                CONVERTED_EMOJI.to_string(),
                ContentKind::Animated,
            )),
            InboundContent::Sticker {
                file_id,
                emoji: None,
                file_size,
                ..
            } => {
                let png = self.download_and_convert(owner_id, file_id, *file_size).await?;
                Ok(Classified::new(
                    StickerPayload::Upload(png),
                    CONVERTED_EMOJI.to_string(),
                    ContentKind::Static,
                ))
            }
            InboundContent::Photo { sizes } => {
                let photo = select_photo_size(sizes, self.limits.max_dimension)
                    .ok_or_else(|| Error::Validation("photo has no sizes".to_string()))?;
                debug!(
                    owner_id,
                    width = photo.width,
                    height = photo.height,
                    "Selected photo size"
                );
                let png = self
                    .download_and_convert(owner_id, &photo.file_id, photo.file_size)
                    .await?;
                Ok(Classified::new(
                    StickerPayload::Upload(png),
                    CONVERTED_EMOJI.to_string(),
                    ContentKind::Image,
                ))
            }
        }
    }

    async fn download_and_convert(
        &self,
        owner_id: u64,
        file_id: &str,
        reported_size: Option<u64>,
    ) -> Result<Vec<u8>, Error> {
        let limit = self.limits.max_input_bytes;
        if let Some(size) = reported_size.filter(|size| *size > limit) {
            return Err(Error::Oversized { size, limit });
        }

        let bytes = self
            .media
            .fetch(file_id, limit)
            .await
            .map_err(|e| match e {
                ContainerError::TooLarge { size, limit } => Error::Oversized { size, limit },
                other => Error::transient(Step::Download, owner_id, None, other),
            })?;

        let codec = Arc::clone(&self.codec);
        let max_dimension = self.limits.max_dimension;
        let converted = tokio::task::spawn_blocking(move || {
            codec.convert_to_target_format(&bytes, max_dimension)
        })
        .await
        .map_err(|e| {
            Error::transient(
                Step::Convert,
                owner_id,
                None,
                CodecError::Encode(format!("conversion task failed: {e}")),
            )
        })?;

        converted.map_err(|e| match e {
            CodecError::Oversized { size, limit } => Error::Oversized {
                size: size as u64,
                limit: limit as u64,
            },
            CodecError::Decode(reason) => {
                Error::Validation(format!("unsupported or corrupt image: {reason}"))
            }
            encode @ CodecError::Encode(_) => {
                Error::transient(Step::Convert, owner_id, None, encode)
            }
        })
    }

    /// Append to the selected volume, or create it with the item.
    async fn mutate(
        &self,
        identity: &UserIdentity,
        placement: &Placement,
        item: &StickerItem,
    ) -> Result<ShardReference, Error> {
        let owner_id = identity.id;
        let name = placement.shard_name.as_str();

        if placement.created {
            let title = shard_title(identity.first_name.as_deref(), placement.volume_index);
            self.containers
                .create_container(owner_id, name, &title, item)
                .await
                .map_err(|e| mutation_error(Step::Create, owner_id, name, e))?;
            return Ok(ShardReference {
                name: name.to_string(),
                title,
                volume_index: placement.volume_index,
            });
        }

        self.containers
            .append_item(owner_id, name, item)
            .await
            .map_err(|e| mutation_error(Step::Append, owner_id, name, e))?;
        let title = placement
            .existing
            .as_ref()
            .map(|shard| shard.title.clone())
            .unwrap_or_else(|| shard_title(identity.first_name.as_deref(), placement.volume_index));
        Ok(ShardReference {
            name: name.to_string(),
            title,
            volume_index: placement.volume_index,
        })
    }
}

/// A capacity rejection means the volume filled after the probe.
fn mutation_error(step: Step, owner_id: u64, name: &str, e: ContainerError) -> Error {
    match e {
        ContainerError::CapacityExceeded { .. } => Error::CapacityRace {
            owner_id,
            shard: name.to_string(),
        },
        other => Error::transient(step, owner_id, Some(name), other),
    }
}
