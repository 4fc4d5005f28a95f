//! Slash commands

use super::BotContext;
use crate::observability::{events, metrics};
use crate::telegram::Message;
use std::str::FromStr;
use stickerstash_core::shard::escape_html;
use stickerstash_core::{Profile, ShardReference};
use strum::{AsRefStr, Display, EnumString};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Start,
    Language,
    Help,
    Packs,
    Ping,
    ChatId,
    Profile,
    Stop,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    /// Only available when debug commands are enabled; never counted.
    pub fn is_debug(self) -> bool {
        matches!(self, Command::ChatId | Command::Profile | Command::Stop)
    }
}

/// Run `command` for the sender of `message`.
#[tracing::instrument(skip(context, message, profile), fields(owner_id = profile.id))]
pub async fn handle(context: &BotContext, command: Command, message: &Message, profile: &Profile) {
    if command.is_debug() && !context.debug_commands {
        return;
    }

    let owner_id = profile.id;
    let chat_id = message.chat.id;
    let language = context.ledger.language_of(profile);
    let l10n = &context.localization;

    if !command.is_debug() {
        if let Err(e) = context
            .ledger
            .increment_command_counter(command.as_ref())
            .await
        {
            warn!(command = %command, error = %e, "Failed to count command");
        }
        metrics::record_command(command.as_ref());
        events::command_invoked(owner_id, command.as_ref());
    }

    match command {
        Command::Start | Command::Language => {
            let keyboard = l10n.languages_keyboard();
            let text = l10n.render(language, "language_select", &[]);
            context.reply(owner_id, chat_id, &text, Some(&keyboard)).await;
        }
        Command::Help => {
            let text = l10n.render(language, "basic_help", &[]);
            context.reply(owner_id, chat_id, &text, None).await;
        }
        Command::Packs => {
            if let Err(e) = context.messenger.send_chat_action(chat_id, "typing").await {
                context.delivery_failed(owner_id, &e).await;
            }
            let text = match context.pipeline.allocator().list_shards(owner_id).await {
                Ok(shards) if shards.is_empty() => l10n.render(language, "stickers_list_empty", &[]),
                Ok(shards) => {
                    let count = shards.len().to_string();
                    let links = packs_links(&shards);
                    l10n.render(
                        language,
                        "stickers_list_success",
                        &[("count", count.as_str()), ("packs_links", links.as_str())],
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Failed to list collections");
                    l10n.render(language, "stickers_add_failure", &[])
                }
            };
            context.reply(owner_id, chat_id, &text, None).await;
        }
        Command::Ping => {
            context.reply(owner_id, chat_id, "Pong 🏓", None).await;
        }
        Command::ChatId => {
            let text = format!("Chat id: <pre>{chat_id}</pre>");
            context.reply(owner_id, chat_id, &text, None).await;
        }
        Command::Profile => {
            let text = match context
                .ledger
                .store()
                .hash_get_all(&stickerstash_core::store::user_key(owner_id))
                .await
            {
                Ok(fields) => {
                    let sorted: std::collections::BTreeMap<_, _> = fields.into_iter().collect();
                    let json = serde_json::to_string_pretty(&sorted).unwrap_or_default();
                    format!("<pre>{}</pre>", escape_html(&json))
                }
                Err(e) => format!("<pre>{}</pre>", escape_html(&e.to_string())),
            };
            context.reply(owner_id, chat_id, &text, None).await;
        }
        Command::Stop => {
            context
                .reply(owner_id, chat_id, "It was nice to serve you 😊", None)
                .await;
            tracing::info!(owner_id, "Stop requested from chat");
            context.request_shutdown();
        }
    }
}

/// Newline separated HTML links to every collection.
pub fn packs_links(shards: &[ShardReference]) -> String {
    shards
        .iter()
        .map(ShardReference::html_link)
        .collect::<Vec<_>>()
        .join("\n")
}
