//! Telegram Bot API transport
//!
//! - `types`: the subset of Bot API objects the bot reads
//! - `client`: HTTP client, also the platform side of the container and
//!   media traits

pub mod client;
pub mod types;

pub use client::{TelegramClient, ALLOWED_UPDATES};
pub use types::{
    CallbackQuery, ChatMemberUpdated, InlineKeyboardButton, InlineKeyboardMarkup, Message, Update,
    User,
};
