//! Content store
//!
//! Hashes, counters and sets held in a remote key-value store. Every command
//! is individually atomic, and [`ContentStore::submit`] applies an ordered
//! [`Batch`] of commands without interleaving from other clients.
//!
//! Backends:
//! - `etcd`: production backend over etcd transactions
//! - `memory`: in-process backend for tests and development runs

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Set of registered user ids.
pub const USERS_SET: &str = "users";
/// Hash of per content kind totals.
pub const STICKERS_USAGE: &str = "stickers_usage";
/// Hash of per command invocation counts.
pub const COMMANDS_USAGE: &str = "commands_usage";

/// Key of the hash holding a user's profile.
pub fn user_key(owner_id: u64) -> String {
    format!("user:{owner_id}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("value at {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },

    #[error("batch kept conflicting after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("malformed store data: {0}")]
    Malformed(String),
}

/// One command of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    HashDelete {
        key: String,
        fields: Vec<String>,
    },
    HashIncrement {
        key: String,
        field: String,
        delta: i64,
    },
    SetAdd {
        key: String,
        member: String,
    },
}

/// An ordered batch of independent commands submitted atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_set(mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        if !fields.is_empty() {
            self.commands.push(Command::HashSet {
                key: key.into(),
                fields,
            });
        }
        self
    }

    pub fn hash_delete(mut self, key: impl Into<String>, fields: Vec<String>) -> Self {
        if !fields.is_empty() {
            self.commands.push(Command::HashDelete {
                key: key.into(),
                fields,
            });
        }
        self
    }

    pub fn hash_increment(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: i64,
    ) -> Self {
        self.commands.push(Command::HashIncrement {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn set_add(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.commands.push(Command::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Remote key-value store holding profiles and aggregate counters.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// All fields of a hash; empty when the hash does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Increment an integer hash field, returning the new value.
    async fn hash_increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError>;

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Whether a hash or set exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Apply every command of the batch atomically, in order.
    async fn submit(&self, batch: Batch) -> Result<(), StoreError>;

    /// Round-trip to the store, for health checks.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn hash_set_many(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
    ) -> Result<(), StoreError> {
        self.submit(Batch::new().hash_set(key, fields)).await
    }

    async fn hash_delete_fields(&self, key: &str, fields: Vec<String>) -> Result<(), StoreError> {
        self.submit(Batch::new().hash_delete(key, fields)).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.submit(Batch::new().set_add(key, member)).await
    }
}
