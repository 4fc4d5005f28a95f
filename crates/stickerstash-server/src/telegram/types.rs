//! Bot API objects
//!
//! Only the fields the bot reads are modelled; everything else in the
//! payloads is ignored on deserialization.

use serde::{Deserialize, Serialize};
use stickerstash_core::pipeline::PhotoSize as InboundPhotoSize;
use stickerstash_core::{InboundContent, ShardMetadata, UserIdentity};

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl User {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            first_name: Some(self.first_name.clone()).filter(|name| !name.is_empty()),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            language_code: self.language_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
    pub emoji: Option<String>,
    pub set_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub sticker: Option<Sticker>,
    pub photo: Option<Vec<PhotoSize>>,
}

impl Message {
    /// Sticker or photo carried by this message, in pipeline terms.
    pub fn content(&self) -> Option<InboundContent> {
        if let Some(sticker) = &self.sticker {
            return Some(InboundContent::Sticker {
                file_id: sticker.file_id.clone(),
                emoji: sticker.emoji.clone().filter(|emoji| !emoji.is_empty()),
                is_animated: sticker.is_animated,
                is_video: sticker.is_video,
                file_size: sticker.file_size,
            });
        }
        self.photo.as_ref().map(|sizes| InboundContent::Photo {
            sizes: sizes
                .iter()
                .map(|size| InboundPhotoSize {
                    file_id: size.file_id.clone(),
                    width: size.width,
                    height: size.height,
                    file_size: size.file_size,
                })
                .collect(),
        })
    }

    /// Command name of a `/command[@bot] args` text, lowercased.
    pub fn command(&self) -> Option<String> {
        let text = self.text.as_deref()?.trim_start();
        let first = text.split_whitespace().next()?.strip_prefix('/')?;
        let name = first.split('@').next().unwrap_or(first);
        (!name.is_empty()).then(|| name.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
    pub my_chat_member: Option<ChatMemberUpdated>,
}

impl Update {
    /// Metric label of the update kind.
    pub fn kind(&self) -> &'static str {
        if self.message.is_some() {
            "message"
        } else if self.callback_query.is_some() {
            "callback_query"
        } else if self.my_chat_member.is_some() {
            "my_chat_member"
        } else {
            "other"
        }
    }

    pub fn sender(&self) -> Option<&User> {
        if let Some(message) = &self.message {
            return message.from.as_ref();
        }
        if let Some(query) = &self.callback_query {
            return Some(&query.from);
        }
        self.my_chat_member.as_ref().map(|member| &member.from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerSet {
    pub name: String,
    pub title: String,
    /// Dropped from newer Bot API versions in favour of per-sticker flags
    pub is_animated: Option<bool>,
    #[serde(default)]
    pub stickers: Vec<Sticker>,
}

impl StickerSet {
    pub fn metadata(&self) -> ShardMetadata {
        let is_animated = self
            .is_animated
            .or_else(|| self.stickers.first().map(|sticker| sticker.is_animated))
            .unwrap_or(false);
        ShardMetadata {
            name: self.name.clone(),
            title: self.title.clone(),
            is_animated,
            item_count: self.stickers.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub file_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}
