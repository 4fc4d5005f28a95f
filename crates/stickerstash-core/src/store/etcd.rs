//! etcd content store
//!
//! Hashes and sets are flattened into one etcd key per field or member:
//!
//! - hash `K`, field `f`  -> `{prefix}K/f` holding the value
//! - set `S`, member `m`  -> `{prefix}S/m` holding an empty value
//!
//! A batch is folded into at most one operation per etcd key and committed as
//! a single transaction. Increments read the current value first and guard the
//! transaction with a revision compare, so a concurrent writer makes the
//! transaction fail and the batch is retried.

use super::{Batch, Command, ContentStore, StoreError};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, Compare, CompareOp, GetOptions, Txn, TxnOp};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Attempts before a conflicting batch is given up.
const MAX_TXN_ATTEMPTS: u32 = 16;

/// Folded operation on a single etcd key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyOp {
    Put(String),
    Delete,
    Increment(i64),
}

/// Connection backoff settings.
#[derive(Debug, Clone)]
pub struct ConnectBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_elapsed: Duration,
    pub multiplier: f64,
}

impl Default for ConnectBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    prefix: String,
}

impl EtcdStore {
    /// Connect to etcd with exponential backoff.
    pub async fn connect(
        endpoints: &[String],
        prefix: impl Into<String>,
        settings: &ConnectBackoff,
    ) -> Result<Self, StoreError> {
        let backoff = ExponentialBackoff {
            initial_interval: settings.initial,
            max_interval: settings.max,
            max_elapsed_time: Some(settings.max_elapsed),
            multiplier: settings.multiplier,
            ..Default::default()
        };

        let client = retry(backoff, || async {
            match Client::connect(endpoints, None).await {
                Ok(client) => {
                    debug!("Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| StoreError::Connection(format!("etcd unreachable after retries: {e}")))?;

        Ok(Self::new(client, prefix))
    }

    pub fn new(client: Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn entry_prefix(&self, key: &str) -> String {
        format!("{}{}/", self.prefix, key)
    }

    fn entry_key(&self, key: &str, field: &str) -> String {
        entry_key(&self.prefix, key, field)
    }

    /// Current integer value and mod revision of a counter key.
    async fn read_counter(
        client: &mut Client,
        key: &str,
    ) -> Result<(i64, Option<i64>), StoreError> {
        let resp = client.get(key, None).await.map_err(request_error)?;
        match resp.kvs().first() {
            Some(kv) => {
                let value = kv.value_str().map_err(request_error)?;
                let current = value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
                Ok((current, Some(kv.mod_revision())))
            }
            None => Ok((0, None)),
        }
    }

    /// Commit folded operations as one transaction, returning the new value of
    /// every incremented key.
    async fn commit(
        &self,
        folded: &BTreeMap<String, KeyOp>,
    ) -> Result<HashMap<String, i64>, StoreError> {
        if folded.is_empty() {
            return Ok(HashMap::new());
        }

        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut client = self.client.clone();
            let mut compares = Vec::new();
            let mut ops = Vec::with_capacity(folded.len());
            let mut incremented = HashMap::new();

            for (key, op) in folded {
                match op {
                    KeyOp::Put(value) => ops.push(TxnOp::put(key.as_str(), value.as_str(), None)),
                    KeyOp::Delete => ops.push(TxnOp::delete(key.as_str(), None)),
                    KeyOp::Increment(delta) => {
                        let (current, revision) = Self::read_counter(&mut client, key).await?;
                        compares.push(match revision {
                            Some(revision) => {
                                Compare::mod_revision(key.as_str(), CompareOp::Equal, revision)
                            }
                            None => Compare::version(key.as_str(), CompareOp::Equal, 0),
                        });
                        let next = current + delta;
                        ops.push(TxnOp::put(key.as_str(), next.to_string(), None));
                        incremented.insert(key.clone(), next);
                    }
                }
            }

            let txn = Txn::new().when(compares).and_then(ops);
            let resp = client.txn(txn).await.map_err(request_error)?;
            if resp.succeeded() {
                trace!(keys = folded.len(), attempt, "etcd batch committed");
                return Ok(incremented);
            }

            debug!(attempt, "etcd batch lost a revision race, retrying");
        }

        Err(StoreError::Conflict {
            attempts: MAX_TXN_ATTEMPTS,
        })
    }

    async fn count_prefix(&self, key: &str) -> Result<u64, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(
                self.entry_prefix(key),
                Some(GetOptions::new().with_prefix().with_count_only()),
            )
            .await
            .map_err(request_error)?;
        Ok(resp.count().max(0) as u64)
    }
}

fn request_error(e: etcd_client::Error) -> StoreError {
    StoreError::Request(e.to_string())
}

fn entry_key(prefix: &str, key: &str, field: &str) -> String {
    format!("{prefix}{key}/{field}")
}

/// Fold a batch into one operation per etcd key, preserving command order.
fn fold_batch(prefix: &str, batch: Batch) -> Result<BTreeMap<String, KeyOp>, StoreError> {
    let mut folded: BTreeMap<String, KeyOp> = BTreeMap::new();

    for command in batch.into_commands() {
        match command {
            Command::HashSet { key, fields } => {
                for (field, value) in fields {
                    folded.insert(entry_key(prefix, &key, &field), KeyOp::Put(value));
                }
            }
            Command::HashDelete { key, fields } => {
                for field in fields {
                    folded.insert(entry_key(prefix, &key, &field), KeyOp::Delete);
                }
            }
            Command::SetAdd { key, member } => {
                folded.insert(entry_key(prefix, &key, &member), KeyOp::Put(String::new()));
            }
            Command::HashIncrement { key, field, delta } => {
                let entry = entry_key(prefix, &key, &field);
                let next = match folded.remove(&entry) {
                    None => KeyOp::Increment(delta),
                    Some(KeyOp::Increment(previous)) => KeyOp::Increment(previous + delta),
                    Some(KeyOp::Delete) => KeyOp::Put(delta.to_string()),
                    Some(KeyOp::Put(value)) => {
                        let current = value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                            key: entry.clone(),
                            value: value.clone(),
                        })?;
                        KeyOp::Put((current + delta).to_string())
                    }
                };
                folded.insert(entry, next);
            }
        }
    }

    Ok(folded)
}

#[async_trait]
impl ContentStore for EtcdStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let prefix = self.entry_prefix(key);
        let mut client = self.client.clone();
        let resp = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(request_error)?;

        let mut fields = HashMap::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let full_key = kv.key_str().map_err(request_error)?;
            let Some(field) = full_key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let value = kv.value_str().map_err(request_error)?;
            fields.insert(field.to_string(), value.to_string());
        }
        Ok(fields)
    }

    async fn hash_increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let folded = fold_batch(&self.prefix, Batch::new().hash_increment(key, field, delta))?;
        let entry = self.entry_key(key, field);
        let values = self.commit(&folded).await?;
        values
            .get(&entry)
            .copied()
            .ok_or_else(|| StoreError::Malformed(format!("increment of {entry} was not applied")))
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        self.count_prefix(key).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let prefix = self.entry_prefix(key);
        let mut client = self.client.clone();
        let resp = client
            .get(
                prefix.as_str(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await
            .map_err(request_error)?;

        let mut members = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let full_key = kv.key_str().map_err(request_error)?;
            if let Some(member) = full_key.strip_prefix(prefix.as_str()) {
                members.push(member.to_string());
            }
        }
        Ok(members)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(
                self.entry_key(key, member),
                Some(GetOptions::new().with_count_only()),
            )
            .await
            .map_err(request_error)?;
        Ok(resp.count() > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.count_prefix(key).await? > 0)
    }

    async fn submit(&self, batch: Batch) -> Result<(), StoreError> {
        let folded = fold_batch(&self.prefix, batch)?;
        self.commit(&folded).await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.status().await.map_err(request_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_flattens_hashes_and_sets() {
        let batch = Batch::new()
            .hash_set(
                "user:42",
                vec![("first_name".to_string(), "Ada".to_string())],
            )
            .hash_delete("user:42", vec!["last_name".to_string()])
            .set_add("users", "42");

        let folded = fold_batch("/s/", batch).unwrap();
        assert_eq!(
            folded.get("/s/user:42/first_name"),
            Some(&KeyOp::Put("Ada".to_string()))
        );
        assert_eq!(folded.get("/s/user:42/last_name"), Some(&KeyOp::Delete));
        assert_eq!(folded.get("/s/users/42"), Some(&KeyOp::Put(String::new())));
    }

    #[test]
    fn test_fold_merges_increments() {
        let batch = Batch::new()
            .hash_increment("stickers_usage", "static", 1)
            .hash_increment("stickers_usage", "static", 2)
            .hash_set("h", vec![("n".to_string(), "5".to_string())])
            .hash_increment("h", "n", 1)
            .hash_delete("h", vec!["m".to_string()])
            .hash_increment("h", "m", 4);

        let folded = fold_batch("", batch).unwrap();
        assert_eq!(folded.get("stickers_usage/static"), Some(&KeyOp::Increment(3)));
        assert_eq!(folded.get("h/n"), Some(&KeyOp::Put("6".to_string())));
        assert_eq!(folded.get("h/m"), Some(&KeyOp::Put("4".to_string())));
    }

    #[test]
    fn test_fold_rejects_increment_of_text() {
        let batch = Batch::new()
            .hash_set("h", vec![("n".to_string(), "abc".to_string())])
            .hash_increment("h", "n", 1);
        assert!(matches!(
            fold_batch("", batch),
            Err(StoreError::NotAnInteger { .. })
        ));
    }
}
