//! Collection volume allocator
//!
//! Finds the first volume in an owner's ordered sequence that can receive an
//! item of a given homogeneity flag, or names the volume to create. The
//! allocator only decides; the caller performs the append or create, so a
//! decision can be recomputed from scratch whenever the mutation fails.
//!
//! Probing is sequential and unbounded above: it stops at the first volume
//! index that does not exist on the platform.

use crate::container::ContainerClient;
use crate::error::{Error, Step};
use crate::shard::{shard_name, Capacity, ShardMetadata, ShardReference};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of inspecting one volume index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    /// The volume exists and has room for the item
    Select,
    /// The volume exists but is full or holds the other homogeneity flag
    Skip,
    /// The volume does not exist; create it here
    Create,
}

/// Index probed after `volume_index`; the sequence ends at `u32::MAX`.
fn next_volume_index(owner_id: u64, volume_index: u32) -> Result<u32, Error> {
    volume_index
        .checked_add(1)
        .ok_or(Error::VolumesExhausted { owner_id })
}

/// Decide what to do with the volume observed at the current index.
pub fn decide(observed: Option<&ShardMetadata>, is_animated: bool, capacity: &Capacity) -> ProbeStep {
    match observed {
        None => ProbeStep::Create,
        Some(shard) if shard.is_animated != is_animated => ProbeStep::Skip,
        Some(shard) if capacity.is_full(shard) => ProbeStep::Skip,
        Some(_) => ProbeStep::Select,
    }
}

/// Target volume chosen for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub shard_name: String,
    pub volume_index: u32,
    /// Whether the volume must be created by the caller
    pub created: bool,
    /// Metadata of the selected volume when it already exists
    pub existing: Option<ShardMetadata>,
    /// Number of volumes inspected to reach the decision
    pub probes: u32,
}

pub struct Allocator {
    containers: Arc<dyn ContainerClient>,
    bot_username: String,
    capacity: Capacity,
}

impl Allocator {
    pub fn new(
        containers: Arc<dyn ContainerClient>,
        bot_username: impl Into<String>,
        capacity: Capacity,
    ) -> Self {
        Self {
            containers,
            bot_username: bot_username.into(),
            capacity,
        }
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    pub fn shard_name(&self, owner_id: u64, volume_index: u32) -> String {
        shard_name(owner_id, &self.bot_username, volume_index)
    }

    /// Find the volume that receives the next item of `owner_id`.
    #[tracing::instrument(skip(self))]
    pub async fn place_item(&self, owner_id: u64, is_animated: bool) -> Result<Placement, Error> {
        let mut volume_index: u32 = 1;

        loop {
            let name = self.shard_name(owner_id, volume_index);
            let observed = self
                .containers
                .get_container(&name)
                .await
                .map_err(|e| Error::transient(Step::Probe, owner_id, Some(&name), e))?;

            match decide(observed.as_ref(), is_animated, &self.capacity) {
                ProbeStep::Select => {
                    debug!(owner_id, volume_index, shard = %name, "Selected existing volume");
                    return Ok(Placement {
                        shard_name: name,
                        volume_index,
                        created: false,
                        existing: observed,
                        probes: volume_index,
                    });
                }
                ProbeStep::Create => {
                    debug!(owner_id, volume_index, shard = %name, "Volume missing, will create");
                    return Ok(Placement {
                        shard_name: name,
                        volume_index,
                        created: true,
                        existing: None,
                        probes: volume_index,
                    });
                }
                ProbeStep::Skip => {
                    trace!(owner_id, volume_index, shard = %name, "Skipping volume");
                    volume_index = next_volume_index(owner_id, volume_index)?;
                }
            }
        }
    }

    /// Every existing volume of `owner_id`, up to the first missing index.
    #[tracing::instrument(skip(self))]
    pub async fn list_shards(&self, owner_id: u64) -> Result<Vec<ShardReference>, Error> {
        let mut shards = Vec::new();

        for volume_index in 1u32.. {
            let name = self.shard_name(owner_id, volume_index);
            let observed = self
                .containers
                .get_container(&name)
                .await
                .map_err(|e| Error::transient(Step::Probe, owner_id, Some(&name), e))?;

            let Some(shard) = observed else {
                break;
            };
            shards.push(ShardReference {
                name: shard.name,
                title: shard.title,
                volume_index,
            });
        }

        Ok(shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryContainers;

    fn meta(is_animated: bool, item_count: usize) -> ShardMetadata {
        ShardMetadata {
            name: "n".to_string(),
            title: "t".to_string(),
            is_animated,
            item_count,
        }
    }

    #[test]
    fn test_decide() {
        let capacity = Capacity::default();
        assert_eq!(decide(None, false, &capacity), ProbeStep::Create);
        assert_eq!(decide(Some(&meta(false, 3)), false, &capacity), ProbeStep::Select);
        assert_eq!(decide(Some(&meta(false, 3)), true, &capacity), ProbeStep::Skip);
        assert_eq!(decide(Some(&meta(true, 50)), true, &capacity), ProbeStep::Skip);
        assert_eq!(decide(Some(&meta(false, 120)), false, &capacity), ProbeStep::Skip);
        assert_eq!(decide(Some(&meta(false, 119)), false, &capacity), ProbeStep::Select);
    }

    #[tokio::test]
    async fn test_first_placement_creates_volume_one() {
        let containers = Arc::new(MemoryContainers::new());
        let allocator = Allocator::new(containers, "stash_bot", Capacity::default());

        let placement = allocator.place_item(42, false).await.unwrap();
        assert_eq!(placement.volume_index, 1);
        assert!(placement.created);
        assert_eq!(placement.shard_name, "Collection_1_42_by_stash_bot");
    }

    #[tokio::test]
    async fn test_full_volume_moves_to_next_index() {
        let containers = Arc::new(MemoryContainers::new());
        containers.seed("Collection_1_42_by_stash_bot", false, 120);
        let allocator = Allocator::new(containers.clone(), "stash_bot", Capacity::default());

        let placement = allocator.place_item(42, false).await.unwrap();
        assert_eq!(placement.volume_index, 2);
        assert!(placement.created);
        assert_eq!(containers.item_count("Collection_1_42_by_stash_bot"), Some(120));
    }

    #[tokio::test]
    async fn test_opposite_flag_never_reuses_partial_volume() {
        let containers = Arc::new(MemoryContainers::new());
        containers.seed("Collection_1_42_by_stash_bot", false, 3);
        containers.seed("Collection_2_42_by_stash_bot", true, 10);
        let allocator = Allocator::new(containers, "stash_bot", Capacity::default());

        let animated = allocator.place_item(42, true).await.unwrap();
        assert_eq!(animated.volume_index, 2);
        assert!(!animated.created);

        let fresh = allocator.place_item(42, false).await.unwrap();
        assert_eq!(fresh.volume_index, 1);
        assert!(!fresh.created);
    }

    #[tokio::test]
    async fn test_skips_mismatched_and_full_until_missing() {
        let containers = Arc::new(MemoryContainers::new());
        containers.seed("Collection_1_7_by_b", true, 1);
        containers.seed("Collection_2_7_by_b", false, 120);
        containers.seed("Collection_3_7_by_b", true, 50);
        let allocator = Allocator::new(containers, "b", Capacity::default());

        let placement = allocator.place_item(7, false).await.unwrap();
        assert_eq!(placement.volume_index, 4);
        assert!(placement.created);
        assert_eq!(placement.probes, 4);
    }

    #[tokio::test]
    async fn test_probe_failure_is_transient() {
        let containers = Arc::new(MemoryContainers::new());
        containers.fail_lookups(true);
        let allocator = Allocator::new(containers, "b", Capacity::default());

        let err = allocator.place_item(7, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transient {
                step: Step::Probe,
                owner_id: 7,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_shards_stops_at_first_gap() {
        let containers = Arc::new(MemoryContainers::new());
        containers.seed("Collection_1_7_by_b", true, 1);
        containers.seed("Collection_2_7_by_b", false, 5);
        containers.seed("Collection_4_7_by_b", false, 5);
        let allocator = Allocator::new(containers, "b", Capacity::default());

        let shards = allocator.list_shards(7).await.unwrap();
        let indices: Vec<u32> = shards.iter().map(|s| s.volume_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_volume_index_overflow_is_exhaustion() {
        assert_eq!(next_volume_index(42, 1).unwrap(), 2);
        let err = next_volume_index(42, u32::MAX).unwrap_err();
        assert!(matches!(err, Error::VolumesExhausted { owner_id: 42 }));
    }
}
