//! In-memory content store
//!
//! Applies batches under a single lock, which gives the same all-or-nothing
//! behaviour as the etcd backend. Used by tests and `--store memory` runs.
//! Writes to selected keys can be made to fail to exercise partial-failure
//! paths.

use super::{Batch, Command, ContentStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Entry {
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    failing_keys: HashSet<String>,
    applied_batches: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write touching `key` fail until [`Self::clear_failures`].
    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.lock().failing_keys.insert(key.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failing_keys.clear();
    }

    /// Number of successfully applied write batches (single commands count as one).
    pub fn applied_batches(&self) -> u64 {
        self.lock().applied_batches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn command_key(command: &Command) -> &str {
    match command {
        Command::HashSet { key, .. }
        | Command::HashDelete { key, .. }
        | Command::HashIncrement { key, .. }
        | Command::SetAdd { key, .. } => key,
    }
}

fn hash_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut BTreeMap<String, String>, StoreError> {
    match entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::Hash(BTreeMap::new()))
    {
        Entry::Hash(hash) => Ok(hash),
        Entry::Set(_) => Err(StoreError::Malformed(format!("{key} is a set, not a hash"))),
    }
}

fn increment(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    field: &str,
    delta: i64,
) -> Result<i64, StoreError> {
    let hash = hash_mut(entries, key)?;
    let current = match hash.get(field) {
        Some(value) => value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
            key: format!("{key}.{field}"),
            value: value.clone(),
        })?,
        None => 0,
    };
    let next = current + delta;
    hash.insert(field.to_string(), next.to_string());
    Ok(next)
}

fn apply(entries: &mut HashMap<String, Entry>, command: Command) -> Result<(), StoreError> {
    match command {
        Command::HashSet { key, fields } => {
            let hash = hash_mut(entries, &key)?;
            hash.extend(fields);
        }
        Command::HashDelete { key, fields } => {
            if let Some(Entry::Hash(hash)) = entries.get_mut(&key) {
                for field in &fields {
                    hash.remove(field);
                }
                if hash.is_empty() {
                    entries.remove(&key);
                }
            }
        }
        Command::HashIncrement { key, field, delta } => {
            increment(entries, &key, &field, delta)?;
        }
        Command::SetAdd { key, member } => {
            match entries
                .entry(key.clone())
                .or_insert_with(|| Entry::Set(BTreeSet::new()))
            {
                Entry::Set(set) => {
                    set.insert(member);
                }
                Entry::Hash(_) => {
                    return Err(StoreError::Malformed(format!("{key} is a hash, not a set")))
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.lock().entries.get(key) {
            Some(Entry::Hash(hash)) => Ok(hash.clone().into_iter().collect()),
            Some(Entry::Set(_)) => Err(StoreError::Malformed(format!("{key} is a set, not a hash"))),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        if inner.failing_keys.contains(key) {
            return Err(StoreError::Request(format!("injected failure on {key}")));
        }
        let value = increment(&mut inner.entries, key, field, delta)?;
        inner.applied_batches += 1;
        Ok(value)
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        match self.lock().entries.get(key) {
            Some(Entry::Set(set)) => Ok(set.len() as u64),
            Some(Entry::Hash(_)) => Err(StoreError::Malformed(format!("{key} is a hash, not a set"))),
            None => Ok(0),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.lock().entries.get(key) {
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(Entry::Hash(_)) => Err(StoreError::Malformed(format!("{key} is a hash, not a set"))),
            None => Ok(Vec::new()),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        match self.lock().entries.get(key) {
            Some(Entry::Set(set)) => Ok(set.contains(member)),
            Some(Entry::Hash(_)) => Err(StoreError::Malformed(format!("{key} is a hash, not a set"))),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().entries.contains_key(key))
    }

    async fn submit(&self, batch: Batch) -> Result<(), StoreError> {
        let mut inner = self.lock();

        if let Some(key) = batch
            .commands()
            .iter()
            .map(command_key)
            .find(|key| inner.failing_keys.contains(*key))
        {
            return Err(StoreError::Request(format!("injected failure on {key}")));
        }

        // Apply to a scratch copy so a failing command leaves nothing behind.
        let mut scratch = inner.entries.clone();
        for command in batch.into_commands() {
            apply(&mut scratch, command)?;
        }
        inner.entries = scratch;
        inner.applied_batches += 1;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::USERS_SET;

    #[tokio::test]
    async fn test_hash_roundtrip_and_delete() {
        let store = MemoryStore::new();
        store
            .hash_set_many(
                "user:1",
                vec![
                    ("first_name".to_string(), "Ada".to_string()),
                    ("last_name".to_string(), "Lovelace".to_string()),
                ],
            )
            .await
            .unwrap();

        let fields = store.hash_get_all("user:1").await.unwrap();
        assert_eq!(fields.get("first_name").map(String::as_str), Some("Ada"));

        store
            .hash_delete_fields("user:1", vec!["first_name".to_string(), "last_name".to_string()])
            .await
            .unwrap();
        assert!(!store.exists("user:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let store = MemoryStore::new();
        store
            .hash_set_many("h", vec![("f".to_string(), "abc".to_string())])
            .await
            .unwrap();
        let err = store.hash_increment_field("h", "f", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { .. }));
        assert_eq!(store.hash_increment_field("h", "g", 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = MemoryStore::new();
        store
            .hash_set_many("h", vec![("f".to_string(), "abc".to_string())])
            .await
            .unwrap();

        let batch = Batch::new()
            .set_add(USERS_SET, "7")
            .hash_increment("h", "f", 1);
        assert!(store.submit(batch).await.is_err());
        assert_eq!(store.set_cardinality(USERS_SET).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_writes_to("stickers_usage");
        assert!(store
            .hash_increment_field("stickers_usage", "static", 1)
            .await
            .is_err());
        store.clear_failures();
        assert_eq!(
            store
                .hash_increment_field("stickers_usage", "static", 1)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_set_members_are_unique() {
        let store = MemoryStore::new();
        store.set_add(USERS_SET, "1").await.unwrap();
        store.set_add(USERS_SET, "1").await.unwrap();
        store.set_add(USERS_SET, "2").await.unwrap();
        assert_eq!(store.set_cardinality(USERS_SET).await.unwrap(), 2);
        assert_eq!(store.set_members(USERS_SET).await.unwrap(), vec!["1", "2"]);
    }
}
