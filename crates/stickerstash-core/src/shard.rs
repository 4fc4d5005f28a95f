//! Collection volumes (shards)
//!
//! Names are derived deterministically from the owner, the bot identity and
//! the volume index, so the allocator can probe an owner's volumes without an
//! index of its own.

use serde::{Deserialize, Serialize};

/// Metadata of an existing volume as reported by the container service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub name: String,
    pub title: String,
    pub is_animated: bool,
    pub item_count: usize,
}

/// Capacity ceilings per homogeneity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub animated: usize,
    pub static_: usize,
}

impl Default for Capacity {
    fn default() -> Self {
        Self {
            animated: 50,
            static_: 120,
        }
    }
}

impl Capacity {
    pub fn ceiling(&self, is_animated: bool) -> usize {
        if is_animated {
            self.animated
        } else {
            self.static_
        }
    }

    /// A volume at or above its ceiling never receives new items.
    pub fn is_full(&self, shard: &ShardMetadata) -> bool {
        shard.item_count >= self.ceiling(shard.is_animated)
    }
}

/// Name of volume `volume_index` of `owner_id` for the bot `bot_username`.
pub fn shard_name(owner_id: u64, bot_username: &str, volume_index: u32) -> String {
    format!("Collection_{volume_index}_{owner_id}_by_{bot_username}")
}

/// Title given to a freshly created volume.
pub fn shard_title(first_name: Option<&str>, volume_index: u32) -> String {
    match first_name {
        Some(name) if !name.trim().is_empty() => {
            format!("{name}'s collection vol. {volume_index}")
        }
        _ => format!("Collection vol. {volume_index}"),
    }
}

/// Reference to a volume handed back to callers for messaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReference {
    pub name: String,
    pub title: String,
    pub volume_index: u32,
}

impl ShardReference {
    pub fn url(&self) -> String {
        format!("https://t.me/addstickers/{}", self.name)
    }

    /// HTML anchor suitable for an HTML formatted chat message.
    pub fn html_link(&self) -> String {
        format!(
            "<a href=\"{}\">{}</a>",
            self.url(),
            escape_html(&self.title)
        )
    }
}

/// Escape the characters that are significant in chat HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
