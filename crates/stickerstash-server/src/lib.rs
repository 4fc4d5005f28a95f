//! stickerstash server
//!
//! Telegram bot that clones stickers and pictures into per-user collection
//! sets, plus a small read-only statistics API.

pub mod api;
pub mod bot;
pub mod codec;
pub mod config;
pub mod localization;
pub mod observability;
pub mod telegram;
pub mod version;
