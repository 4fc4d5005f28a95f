//! Aggregate counter reconciliation
//!
//! Content counters are recorded as two independent increments, so the
//! `stickers_usage` aggregate can fall behind the per-user counters. [`scan`]
//! measures the difference and [`apply`] shifts the aggregate by it. The bot
//! may keep counting while this runs; increments landing after the scan are
//! kept because only the measured difference is written. Nothing here runs
//! implicitly.

use crate::models::{ContentKind, Profile, StickerTotals};
use crate::store::{user_key, Batch, ContentStore, StoreError, STICKERS_USAGE, USERS_SET};
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{info, warn};

/// Difference between the per-user sums and the stored aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub users_scanned: u64,
    /// Sum of the per-user counters
    pub expected: StickerTotals,
    /// Current `stickers_usage` values
    pub recorded: StickerTotals,
}

impl DriftReport {
    /// Kinds whose aggregate differs from the per-user sum, as
    /// `(kind, expected, recorded)`.
    pub fn drifted(&self) -> Vec<(ContentKind, u64, u64)> {
        ContentKind::iter()
            .filter(|kind| self.expected.get(*kind) != self.recorded.get(*kind))
            .map(|kind| (kind, self.expected.get(kind), self.recorded.get(kind)))
            .collect()
    }

    pub fn is_consistent(&self) -> bool {
        self.drifted().is_empty()
    }
}

/// Sum every registered user's counters and compare with the aggregate.
pub async fn scan(store: &dyn ContentStore) -> Result<DriftReport, StoreError> {
    let mut report = DriftReport::default();

    for member in store.set_members(USERS_SET).await? {
        let Ok(owner_id) = member.parse::<u64>() else {
            warn!(member = %member, "Skipping malformed users set member");
            continue;
        };
        let fields = store.hash_get_all(&user_key(owner_id)).await?;
        let profile = Profile::from_fields(owner_id, &fields);
        for kind in ContentKind::iter() {
            report.expected.add(kind, profile.counter(kind));
        }
        report.users_scanned += 1;
    }

    let usage = store.hash_get_all(STICKERS_USAGE).await?;
    for kind in ContentKind::iter() {
        let recorded = usage
            .get(kind.as_ref())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        report.recorded.add(kind, recorded);
    }

    Ok(report)
}

/// Move each drifted aggregate field by `expected - recorded` of `report`.
pub async fn apply(store: &dyn ContentStore, report: &DriftReport) -> Result<(), StoreError> {
    let drifted = report.drifted();
    if drifted.is_empty() {
        return Ok(());
    }

    let batch = drifted
        .iter()
        .fold(Batch::new(), |batch, (kind, expected, recorded)| {
            let delta = *expected as i64 - *recorded as i64;
            batch.hash_increment(STICKERS_USAGE, kind.as_ref(), delta)
        });
    store.submit(batch).await?;
    info!(
        users = report.users_scanned,
        drifted = drifted.len(),
        "Usage aggregate reconciled"
    );
    Ok(())
}
