//! Structured Events
//!
//! One function per event type so field names stay consistent across the
//! bot. Every event carries an `event_type` field.
//!
//! Event types:
//! - `profile_registered` - first interaction of a user
//! - `shard_created` - a new collection volume was created
//! - `item_placed` - an item landed in a volume
//! - `placement_failed` - an ingestion did not place its item
//! - `counter_drift` - an item was placed but usage was not recorded
//! - `user_blocked` / `user_unblocked` - delivery state changes
//! - `language_changed` - a user picked a language
//! - `command_invoked` - a bot command was handled

use tracing::{error, info, warn};

pub fn profile_registered(owner_id: u64, language_code: Option<&str>) {
    info!(
        event_type = "profile_registered",
        owner_id = owner_id,
        language_code = language_code.unwrap_or("none"),
        "Profile registered"
    );
}

pub fn shard_created(owner_id: u64, shard: &str, volume_index: u32, kind: &str) {
    info!(
        event_type = "shard_created",
        owner_id = owner_id,
        shard = %shard,
        volume_index = volume_index,
        kind = %kind,
        "Collection volume created"
    );
}

pub fn item_placed(owner_id: u64, shard: &str, kind: &str, placement: &str, probes: u32) {
    info!(
        event_type = "item_placed",
        owner_id = owner_id,
        shard = %shard,
        kind = %kind,
        placement = %placement,
        probes = probes,
        "Item placed"
    );
}

pub fn placement_failed(owner_id: u64, kind: &str, reason: &str, error: &str, will_retry: bool) {
    warn!(
        event_type = "placement_failed",
        owner_id = owner_id,
        kind = %kind,
        reason = %reason,
        error = %error,
        will_retry = will_retry,
        "Placement failed"
    );
}

pub fn counter_drift(owner_id: u64, shard: &str, kind: &str, error: &str) {
    error!(
        event_type = "counter_drift",
        owner_id = owner_id,
        shard = %shard,
        kind = %kind,
        error = %error,
        "Item placed but usage counters were not updated"
    );
}

pub fn user_blocked(owner_id: u64) {
    warn!(
        event_type = "user_blocked",
        owner_id = owner_id,
        "User blocked the bot"
    );
}

pub fn user_unblocked(owner_id: u64) {
    info!(
        event_type = "user_unblocked",
        owner_id = owner_id,
        "User unblocked the bot"
    );
}

pub fn language_changed(owner_id: u64, language: &str) {
    info!(
        event_type = "language_changed",
        owner_id = owner_id,
        language = %language,
        "Language changed"
    );
}

pub fn command_invoked(owner_id: u64, command: &str) {
    info!(
        event_type = "command_invoked",
        owner_id = owner_id,
        command = %command,
        "Command invoked"
    );
}
