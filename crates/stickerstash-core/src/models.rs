//! Data models shared by the allocator, ledger and pipeline

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Field names of the per-user hash.
pub mod fields {
    pub const FIRST_NAME: &str = "first_name";
    pub const LAST_NAME: &str = "last_name";
    pub const USER_NAME: &str = "user_name";
    pub const LANGUAGE_CODE: &str = "language_code";
    pub const LANGUAGE: &str = "language";
    pub const BLOCKED: &str = "blocked";
    pub const BLOCKED_TIMES: &str = "blocked_times";
}

/// Kind of content a user submitted, used for the usage counters.
///
/// `Static` and `Image` both land in non-animated volumes; they differ only in
/// which counter records them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentKind {
    Static,
    Animated,
    Image,
}

impl ContentKind {
    /// Homogeneity flag of the volume this kind of content goes into.
    pub fn is_animated(self) -> bool {
        matches!(self, ContentKind::Animated)
    }

    /// Name of the per-user counter field for this kind.
    pub fn user_counter_field(self) -> String {
        format!("{}_stickers", self.as_ref())
    }
}

/// Identity of a user as reported by the platform on an inbound update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: u64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl UserIdentity {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            username: None,
            language_code: None,
        }
    }

    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    /// Identity fields as stored in the user hash, `None` meaning "clear it".
    pub fn profile_fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            (fields::FIRST_NAME, self.first_name.as_deref()),
            (fields::LAST_NAME, self.last_name.as_deref()),
            (fields::USER_NAME, self.username.as_deref()),
            (fields::LANGUAGE_CODE, self.language_code.as_deref()),
        ]
    }
}

/// Stored profile of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_name: Option<String>,
    pub language_code: Option<String>,
    /// Language picked through the language menu
    pub language: Option<String>,
    pub blocked: bool,
    pub blocked_times: u64,
    pub static_stickers: u64,
    pub animated_stickers: u64,
    pub image_stickers: u64,
}

impl Profile {
    /// Build a profile from the raw fields of its hash.
    ///
    /// Unknown fields are ignored and malformed counters read as zero.
    pub fn from_fields(id: u64, raw: &HashMap<String, String>) -> Self {
        let text = |name: &str| raw.get(name).cloned();
        let counter = |name: &str| {
            raw.get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Self {
            id,
            first_name: text(fields::FIRST_NAME),
            last_name: text(fields::LAST_NAME),
            user_name: text(fields::USER_NAME),
            language_code: text(fields::LANGUAGE_CODE),
            language: text(fields::LANGUAGE),
            blocked: raw.get(fields::BLOCKED).is_some_and(|v| v == "true"),
            blocked_times: counter(fields::BLOCKED_TIMES),
            static_stickers: counter(&ContentKind::Static.user_counter_field()),
            animated_stickers: counter(&ContentKind::Animated.user_counter_field()),
            image_stickers: counter(&ContentKind::Image.user_counter_field()),
        }
    }

    pub fn counter(&self, kind: ContentKind) -> u64 {
        match kind {
            ContentKind::Static => self.static_stickers,
            ContentKind::Animated => self.animated_stickers,
            ContentKind::Image => self.image_stickers,
        }
    }
}

/// Per content kind totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerTotals {
    #[serde(rename = "static")]
    pub static_: u64,
    pub animated: u64,
    pub image: u64,
}

impl StickerTotals {
    pub fn get(&self, kind: ContentKind) -> u64 {
        match kind {
            ContentKind::Static => self.static_,
            ContentKind::Animated => self.animated,
            ContentKind::Image => self.image,
        }
    }

    pub fn add(&mut self, kind: ContentKind, amount: u64) {
        match kind {
            ContentKind::Static => self.static_ += amount,
            ContentKind::Animated => self.animated += amount,
            ContentKind::Image => self.image += amount,
        }
    }
}

/// Aggregate usage snapshot exposed to the reporting endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub users_count: u64,
    pub stickers: StickerTotals,
    pub commands: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_content_kind_names() {
        assert_eq!(ContentKind::Static.to_string(), "static");
        assert_eq!(ContentKind::Animated.user_counter_field(), "animated_stickers");
        assert_eq!(ContentKind::from_str("image").unwrap(), ContentKind::Image);
        assert!(ContentKind::Animated.is_animated());
        assert!(!ContentKind::Image.is_animated());
    }

    #[test]
    fn test_profile_from_fields() {
        let raw: HashMap<String, String> = [
            ("first_name", "Ada"),
            ("blocked", "true"),
            ("blocked_times", "2"),
            ("static_stickers", "7"),
            ("image_stickers", "not-a-number"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let profile = Profile::from_fields(42, &raw);
        assert_eq!(profile.id, 42);
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert!(profile.last_name.is_none());
        assert!(profile.blocked);
        assert_eq!(profile.blocked_times, 2);
        assert_eq!(profile.counter(ContentKind::Static), 7);
        assert_eq!(profile.counter(ContentKind::Image), 0);
    }

    #[test]
    fn test_usage_snapshot_serializes_camel_case() {
        let mut snapshot = UsageSnapshot {
            users_count: 3,
            ..Default::default()
        };
        snapshot.stickers.add(ContentKind::Static, 4);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["usersCount"], 3);
        assert_eq!(json["stickers"]["static"], 4);
    }
}
