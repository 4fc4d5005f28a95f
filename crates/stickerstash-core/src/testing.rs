//! In-memory collaborators for tests
//!
//! `MemoryContainers` behaves like the platform's sticker set service: it
//! stores volumes by name, records every appended item and can be told to
//! reject lookups, appends or anything past a hard capacity.

use crate::container::{ContainerClient, ContainerError, MediaSource, StickerItem};
use crate::external::{Codec, CodecError, LanguageCatalog};
use crate::shard::{Capacity, ShardMetadata};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct StoredVolume {
    pub owner_id: u64,
    pub title: String,
    pub is_animated: bool,
    /// Homogeneity flag of every item, in insertion order
    pub items: Vec<bool>,
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<String, StoredVolume>,
    files: HashMap<String, Vec<u8>>,
    fail_lookups: bool,
    fail_appends: bool,
    hard_limit: Option<Capacity>,
    lookups: u64,
}

#[derive(Debug, Default)]
pub struct MemoryContainers {
    state: Mutex<State>,
}

impl MemoryContainers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a volume holding `count` items of the given flag.
    pub fn seed(&self, name: &str, is_animated: bool, count: usize) {
        self.lock().volumes.insert(
            name.to_string(),
            StoredVolume {
                owner_id: 0,
                title: format!("{name} title"),
                is_animated,
                items: vec![is_animated; count],
            },
        );
    }

    pub fn add_file(&self, file_id: &str, bytes: Vec<u8>) {
        self.lock().files.insert(file_id.to_string(), bytes);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.lock().fail_lookups = fail;
    }

    pub fn fail_appends(&self, fail: bool) {
        self.lock().fail_appends = fail;
    }

    /// Reject appends past these ceilings, like the platform does.
    pub fn enforce_capacity(&self, capacity: Capacity) {
        self.lock().hard_limit = Some(capacity);
    }

    pub fn item_count(&self, name: &str) -> Option<usize> {
        self.lock().volumes.get(name).map(|v| v.items.len())
    }

    pub fn volume(&self, name: &str) -> Option<StoredVolume> {
        self.lock().volumes.get(name).cloned()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    pub fn lookups(&self) -> u64 {
        self.lock().lookups
    }
}

#[async_trait]
impl ContainerClient for MemoryContainers {
    async fn get_container(&self, name: &str) -> Result<Option<ShardMetadata>, ContainerError> {
        let mut state = self.lock();
        state.lookups += 1;
        if state.fail_lookups {
            return Err(ContainerError::Transport("lookup timed out".to_string()));
        }
        Ok(state.volumes.get(name).map(|volume| ShardMetadata {
            name: name.to_string(),
            title: volume.title.clone(),
            is_animated: volume.is_animated,
            item_count: volume.items.len(),
        }))
    }

    async fn append_item(
        &self,
        _owner_id: u64,
        name: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError> {
        let mut state = self.lock();
        if state.fail_appends {
            return Err(ContainerError::Transport("append timed out".to_string()));
        }
        let hard_limit = state.hard_limit;
        let volume = state.volumes.get_mut(name).ok_or_else(|| ContainerError::Rejected {
            code: 400,
            description: "STICKERSET_INVALID".to_string(),
        })?;
        if let Some(limit) = hard_limit {
            if volume.items.len() >= limit.ceiling(volume.is_animated) {
                return Err(ContainerError::CapacityExceeded {
                    name: name.to_string(),
                });
            }
        }
        volume.items.push(item.is_animated);
        Ok(())
    }

    async fn create_container(
        &self,
        owner_id: u64,
        name: &str,
        title: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError> {
        let mut state = self.lock();
        if state.fail_appends {
            return Err(ContainerError::Transport("create timed out".to_string()));
        }
        if state.volumes.contains_key(name) {
            return Err(ContainerError::Rejected {
                code: 400,
                description: "STICKERSET_NAME_OCCUPIED".to_string(),
            });
        }
        state.volumes.insert(
            name.to_string(),
            StoredVolume {
                owner_id,
                title: title.to_string(),
                is_animated: item.is_animated,
                items: vec![item.is_animated],
            },
        );
        Ok(())
    }
}

#[async_trait]
impl MediaSource for MemoryContainers {
    async fn fetch(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, ContainerError> {
        let state = self.lock();
        let bytes = state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| ContainerError::Rejected {
                code: 400,
                description: "file not found".to_string(),
            })?;
        if bytes.len() as u64 > max_bytes {
            return Err(ContainerError::TooLarge {
                size: bytes.len() as u64,
                limit: max_bytes,
            });
        }
        Ok(bytes)
    }
}

/// Codec that prefixes its input, so tests can tell converted payloads apart.
#[derive(Debug, Default)]
pub struct TaggingCodec {
    pub fail: bool,
}

impl Codec for TaggingCodec {
    fn convert_to_target_format(
        &self,
        bytes: &[u8],
        _max_dimension: u32,
    ) -> Result<Vec<u8>, CodecError> {
        if self.fail {
            return Err(CodecError::Decode("not an image".to_string()));
        }
        let mut out = b"png:".to_vec();
        out.extend_from_slice(bytes);
        Ok(out)
    }
}

/// Fixed set of supported language codes.
#[derive(Debug, Clone)]
pub struct StaticCatalog(pub HashSet<String>);

impl StaticCatalog {
    pub fn of(codes: &[&str]) -> Self {
        Self(codes.iter().map(|c| c.to_string()).collect())
    }
}

impl LanguageCatalog for StaticCatalog {
    fn is_supported_language(&self, code: &str) -> bool {
        self.0.contains(code)
    }
}
