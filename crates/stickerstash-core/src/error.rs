//! Error taxonomy of the allocation engine and ledger

use crate::container::ContainerError;
use crate::external::CodecError;
use crate::store::StoreError;
use strum::Display;
use thiserror::Error;

/// Step of an ingestion (or ledger operation) where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Download,
    Convert,
    Probe,
    Append,
    Create,
    Record,
    Profile,
}

/// External failure wrapped by [`Error::Transient`].
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any mutation; retrying will not help
    #[error("validation failed: {0}")]
    Validation(String),

    /// Input larger than the configured bound; a validation failure the user
    /// is told about explicitly
    #[error("input is {size} bytes, limit is {limit} bytes")]
    Oversized { size: u64, limit: u64 },

    /// A collaborator failed; the caller may retry the whole request
    #[error("{step} failed for owner {owner_id}{}: {source}", shard_suffix(.shard))]
    Transient {
        step: Step,
        owner_id: u64,
        shard: Option<String>,
        #[source]
        source: ExternalError,
    },

    /// The volume filled up between the probe and the append
    #[error("volume {shard} of owner {owner_id} filled up before the append")]
    CapacityRace { owner_id: u64, shard: String },

    /// Every addressable volume index of the owner is taken
    #[error("owner {owner_id} has no volume index left")]
    VolumesExhausted { owner_id: u64 },
}

fn shard_suffix(shard: &Option<String>) -> String {
    match shard {
        Some(name) => format!(" (shard {name})"),
        None => String::new(),
    }
}

impl Error {
    pub fn transient(
        step: Step,
        owner_id: u64,
        shard: Option<&str>,
        source: impl Into<ExternalError>,
    ) -> Self {
        Error::Transient {
            step,
            owner_id,
            shard: shard.map(str::to_string),
            source: source.into(),
        }
    }

    /// Whether re-sending the original content may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_) | Error::Oversized { .. } | Error::VolumesExhausted { .. }
        )
    }

    /// Short machine readable reason, used as a metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::Oversized { .. } => "validation",
            Error::Transient { .. } => "transient",
            Error::CapacityRace { .. } => "capacity_race",
            Error::VolumesExhausted { .. } => "volumes_exhausted",
        }
    }
}
