//! Usage ledger
//!
//! Persists user profiles and usage counters in the content store. Profile
//! refreshes and block transitions are submitted as single atomic batches;
//! content counters are two independent increments (user hash first, then the
//! aggregate), so the aggregate may lag behind the per-user counters after a
//! partial failure. See [`crate::reconcile`].

use crate::error::{Error, Step};
use crate::external::LanguageCatalog;
use crate::models::{fields, ContentKind, Profile, StickerTotals, UsageSnapshot, UserIdentity};
use crate::store::{user_key, Batch, ContentStore, StoreError, COMMANDS_USAGE, STICKERS_USAGE, USERS_SET};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

/// Result of refreshing a profile from an inbound identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRefresh {
    pub profile: Profile,
    /// The user had no stored profile before this call
    pub registered: bool,
    /// Number of identity fields written or cleared
    pub changed_fields: usize,
}

pub struct Ledger {
    store: Arc<dyn ContentStore>,
    default_language: String,
}

impl Ledger {
    pub fn new(store: Arc<dyn ContentStore>, default_language: impl Into<String>) -> Self {
        Self {
            store,
            default_language: default_language.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Load the profile of `identity`, creating or refreshing it as needed.
    pub async fn load_or_create_profile(&self, identity: &UserIdentity) -> Result<Profile, Error> {
        Ok(self.refresh_profile(identity).await?.profile)
    }

    /// Upsert the identity fields of a user and register them in the users set.
    ///
    /// Present fields overwrite, absent fields are cleared. Nothing is written
    /// when the stored profile already matches and the user is registered.
    #[tracing::instrument(skip(self, identity), fields(owner_id = identity.id))]
    pub async fn refresh_profile(&self, identity: &UserIdentity) -> Result<ProfileRefresh, Error> {
        let owner_id = identity.id;
        let key = user_key(owner_id);
        let mut stored = self
            .store
            .hash_get_all(&key)
            .await
            .map_err(|e| Error::transient(Step::Profile, owner_id, None, e))?;
        // Counters alone can create the hash, so membership is checked directly.
        let registered = !self
            .store
            .set_contains(USERS_SET, &owner_id.to_string())
            .await
            .map_err(|e| Error::transient(Step::Profile, owner_id, None, e))?;

        let mut updates = Vec::new();
        let mut removals = Vec::new();
        for (field, value) in identity.profile_fields() {
            match value {
                Some(value) if stored.get(field).map(String::as_str) != Some(value) => {
                    updates.push((field.to_string(), value.to_string()));
                }
                None if stored.contains_key(field) => removals.push(field.to_string()),
                _ => {}
            }
        }
        let changed_fields = updates.len() + removals.len();

        if registered || changed_fields > 0 {
            let batch = Batch::new()
                .hash_set(&key, updates.clone())
                .hash_delete(&key, removals.clone())
                .set_add(USERS_SET, owner_id.to_string());
            self.store
                .submit(batch)
                .await
                .map_err(|e| Error::transient(Step::Profile, owner_id, None, e))?;
            debug!(registered, changed_fields, "Profile refreshed");
        }

        for field in &removals {
            stored.remove(field);
        }
        stored.extend(updates);

        Ok(ProfileRefresh {
            profile: Profile::from_fields(owner_id, &stored),
            registered,
            changed_fields,
        })
    }

    /// Record the latest delivery signal for `owner_id`.
    ///
    /// Returns whether the stored flag changed. Entering the blocked state
    /// also bumps `blocked_times` in the same batch.
    #[tracing::instrument(skip(self))]
    pub async fn set_blocked(&self, owner_id: u64, blocked: bool) -> Result<bool, Error> {
        let key = user_key(owner_id);
        let stored = self
            .store
            .hash_get_all(&key)
            .await
            .map_err(|e| Error::transient(Step::Profile, owner_id, None, e))?;
        let currently_blocked = stored.get(fields::BLOCKED).is_some_and(|v| v == "true");
        if currently_blocked == blocked {
            return Ok(false);
        }

        let batch = if blocked {
            Batch::new()
                .hash_set(
                    &key,
                    vec![(fields::BLOCKED.to_string(), "true".to_string())],
                )
                .hash_increment(&key, fields::BLOCKED_TIMES, 1)
        } else {
            Batch::new().hash_delete(&key, vec![fields::BLOCKED.to_string()])
        };
        self.store
            .submit(batch)
            .await
            .map_err(|e| Error::transient(Step::Profile, owner_id, None, e))?;
        Ok(true)
    }

    /// Store the preferred language after checking the catalogue supports it.
    #[tracing::instrument(skip(self, catalog))]
    pub async fn set_language(
        &self,
        owner_id: u64,
        language_code: &str,
        catalog: &dyn LanguageCatalog,
    ) -> Result<(), Error> {
        if !catalog.is_supported_language(language_code) {
            return Err(Error::Validation(format!(
                "unsupported language code: {language_code}"
            )));
        }

        self.store
            .hash_set_many(
                &user_key(owner_id),
                vec![(fields::LANGUAGE.to_string(), language_code.to_string())],
            )
            .await
            .map_err(|e| Error::transient(Step::Profile, owner_id, None, e))
    }

    /// Count one placed item for the user and for the aggregate.
    ///
    /// The two increments are independent; when the second one fails the
    /// user counter keeps its new value.
    #[tracing::instrument(skip(self))]
    pub async fn increment_content_counter(
        &self,
        owner_id: u64,
        kind: ContentKind,
    ) -> Result<(), Error> {
        self.store
            .hash_increment_field(&user_key(owner_id), &kind.user_counter_field(), 1)
            .await
            .map_err(|e| Error::transient(Step::Record, owner_id, None, e))?;
        self.store
            .hash_increment_field(STICKERS_USAGE, kind.as_ref(), 1)
            .await
            .map_err(|e| Error::transient(Step::Record, owner_id, None, e))?;
        Ok(())
    }

    pub async fn increment_command_counter(&self, command: &str) -> Result<(), StoreError> {
        self.store
            .hash_increment_field(COMMANDS_USAGE, command, 1)
            .await
            .map(|_| ())
    }

    /// Language to talk to this user in.
    pub fn language_of<'a>(&'a self, profile: &'a Profile) -> &'a str {
        profile
            .language
            .as_deref()
            .unwrap_or(self.default_language.as_str())
    }

    pub async fn usage_snapshot(&self) -> Result<UsageSnapshot, StoreError> {
        let users_count = self.store.set_cardinality(USERS_SET).await?;

        let usage = self.store.hash_get_all(STICKERS_USAGE).await?;
        let mut stickers = StickerTotals::default();
        for kind in ContentKind::iter() {
            stickers.add(kind, parse_counter(STICKERS_USAGE, kind.as_ref(), &usage));
        }

        let raw_commands = self.store.hash_get_all(COMMANDS_USAGE).await?;
        let commands: BTreeMap<String, u64> = raw_commands
            .keys()
            .map(|command| {
                let count = parse_counter(COMMANDS_USAGE, command, &raw_commands);
                (command.clone(), count)
            })
            .collect();

        Ok(UsageSnapshot {
            users_count,
            stickers,
            commands,
        })
    }

    /// Stored profile of `owner_id`, `None` when the user never interacted.
    pub async fn user_snapshot(&self, owner_id: u64) -> Result<Option<Profile>, StoreError> {
        let stored = self.store.hash_get_all(&user_key(owner_id)).await?;
        if stored.is_empty() {
            return Ok(None);
        }
        Ok(Some(Profile::from_fields(owner_id, &stored)))
    }

    /// Ids of every registered user, ascending.
    pub async fn user_ids(&self) -> Result<Vec<u64>, StoreError> {
        let mut ids: Vec<u64> = self
            .store
            .set_members(USERS_SET)
            .await?
            .iter()
            .filter_map(|member| match member.parse::<u64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(member = %member, "Skipping malformed users set member");
                    None
                }
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

fn parse_counter(key: &str, field: &str, raw: &HashMap<String, String>) -> u64 {
    match raw.get(field) {
        Some(value) => value.parse::<u64>().unwrap_or_else(|_| {
            warn!(key, field, value = %value, "Counter is not a non-negative integer");
            0
        }),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::StaticCatalog;

    fn ledger() -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), "en");
        (store, ledger)
    }

    fn ada() -> UserIdentity {
        let mut identity = UserIdentity::new(42).with_first_name("Ada");
        identity.username = Some("ada".to_string());
        identity.language_code = Some("en".to_string());
        identity
    }

    #[tokio::test]
    async fn test_first_interaction_registers_user() {
        let (store, ledger) = ledger();

        let refresh = ledger.refresh_profile(&ada()).await.unwrap();
        assert!(refresh.registered);
        assert_eq!(refresh.changed_fields, 3);
        assert_eq!(refresh.profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(store.set_cardinality(USERS_SET).await.unwrap(), 1);
        assert_eq!(store.applied_batches(), 1);
    }

    #[tokio::test]
    async fn test_counters_without_profile_still_register() {
        let (store, ledger) = ledger();
        ledger
            .increment_content_counter(7, ContentKind::Static)
            .await
            .unwrap();
        assert!(store.exists("user:7").await.unwrap());

        let refresh = ledger.refresh_profile(&UserIdentity::new(7)).await.unwrap();
        assert!(refresh.registered);
        assert_eq!(refresh.changed_fields, 0);
        assert_eq!(refresh.profile.counter(ContentKind::Static), 1);
        assert_eq!(store.set_cardinality(USERS_SET).await.unwrap(), 1);

        let again = ledger.refresh_profile(&UserIdentity::new(7)).await.unwrap();
        assert!(!again.registered);
    }

    #[tokio::test]
    async fn test_load_or_create_profile_is_idempotent() {
        let (store, ledger) = ledger();

        let first = ledger.load_or_create_profile(&ada()).await.unwrap();
        let batches = store.applied_batches();
        let second = ledger.load_or_create_profile(&ada()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.applied_batches(), batches);
        assert_eq!(store.set_cardinality(USERS_SET).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_absent_identity_fields_are_cleared() {
        let (store, ledger) = ledger();
        ledger.load_or_create_profile(&ada()).await.unwrap();

        let mut renamed = ada();
        renamed.username = None;
        renamed.first_name = Some("Augusta".to_string());
        let refresh = ledger.refresh_profile(&renamed).await.unwrap();

        assert!(!refresh.registered);
        assert_eq!(refresh.changed_fields, 2);
        assert!(refresh.profile.user_name.is_none());
        let stored = store.hash_get_all("user:42").await.unwrap();
        assert_eq!(stored.get("first_name").map(String::as_str), Some("Augusta"));
        assert!(!stored.contains_key("user_name"));
    }

    #[tokio::test]
    async fn test_counters_survive_profile_refresh() {
        let (_store, ledger) = ledger();
        ledger.load_or_create_profile(&ada()).await.unwrap();
        ledger
            .increment_content_counter(42, ContentKind::Animated)
            .await
            .unwrap();

        let profile = ledger.load_or_create_profile(&ada()).await.unwrap();
        assert_eq!(profile.counter(ContentKind::Animated), 1);
    }

    #[tokio::test]
    async fn test_increment_content_counter_three_times() {
        let (_store, ledger) = ledger();
        for _ in 0..3 {
            ledger
                .increment_content_counter(42, ContentKind::Static)
                .await
                .unwrap();
        }

        let profile = ledger.user_snapshot(42).await.unwrap().unwrap();
        assert_eq!(profile.counter(ContentKind::Static), 3);
        let snapshot = ledger.usage_snapshot().await.unwrap();
        assert_eq!(snapshot.stickers.get(ContentKind::Static), 3);
        assert_eq!(snapshot.stickers.get(ContentKind::Image), 0);
    }

    #[tokio::test]
    async fn test_aggregate_failure_keeps_user_counter() {
        let (store, ledger) = ledger();
        store.fail_writes_to(STICKERS_USAGE);

        let err = ledger
            .increment_content_counter(42, ContentKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient { step: Step::Record, .. }));

        let profile = ledger.user_snapshot(42).await.unwrap().unwrap();
        assert_eq!(profile.counter(ContentKind::Image), 1);
        assert_eq!(ledger.usage_snapshot().await.unwrap().stickers.image, 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_mutates_nothing() {
        let (store, ledger) = ledger();
        let catalog = StaticCatalog::of(&["en", "es"]);

        let err = ledger.set_language(42, "xx", &catalog).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.applied_batches(), 0);
        assert!(!store.exists("user:42").await.unwrap());
    }

    #[tokio::test]
    async fn test_language_of_falls_back_to_default() {
        let (_store, ledger) = ledger();
        let catalog = StaticCatalog::of(&["en", "es"]);
        let profile = ledger.load_or_create_profile(&ada()).await.unwrap();
        assert_eq!(ledger.language_of(&profile), "en");

        ledger.set_language(42, "es", &catalog).await.unwrap();
        let profile = ledger.load_or_create_profile(&ada()).await.unwrap();
        assert_eq!(ledger.language_of(&profile), "es");
    }

    #[tokio::test]
    async fn test_block_transitions() {
        let (store, ledger) = ledger();
        ledger.load_or_create_profile(&ada()).await.unwrap();

        assert!(ledger.set_blocked(42, true).await.unwrap());
        assert!(!ledger.set_blocked(42, true).await.unwrap());
        let profile = ledger.user_snapshot(42).await.unwrap().unwrap();
        assert!(profile.blocked);
        assert_eq!(profile.blocked_times, 1);

        assert!(ledger.set_blocked(42, false).await.unwrap());
        assert!(!ledger.set_blocked(42, false).await.unwrap());
        assert!(ledger.set_blocked(42, true).await.unwrap());

        let stored = store.hash_get_all("user:42").await.unwrap();
        assert_eq!(stored.get("blocked_times").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_usage_snapshot_and_user_ids() {
        let (_store, ledger) = ledger();
        ledger.load_or_create_profile(&ada()).await.unwrap();
        ledger
            .load_or_create_profile(&UserIdentity::new(7))
            .await
            .unwrap();
        ledger.increment_command_counter("start").await.unwrap();
        ledger.increment_command_counter("start").await.unwrap();
        ledger.increment_command_counter("packs").await.unwrap();

        let snapshot = ledger.usage_snapshot().await.unwrap();
        assert_eq!(snapshot.users_count, 2);
        assert_eq!(snapshot.commands.get("start"), Some(&2));
        assert_eq!(snapshot.commands.get("packs"), Some(&1));

        assert_eq!(ledger.user_ids().await.unwrap(), vec![7, 42]);
        assert!(ledger.user_snapshot(1).await.unwrap().is_none());
    }
}
