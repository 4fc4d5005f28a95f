//! Update routing
//!
//! Every update refreshes the sender's profile first, then goes to exactly
//! one handler: membership changes, language picker callbacks, commands, or
//! sticker and photo ingestion.

use super::commands::{self, Command};
use super::BotContext;
use crate::localization::SET_LANGUAGE_PREFIX;
use crate::observability::{events, metrics};
use crate::telegram::{CallbackQuery, ChatMemberUpdated, Message, Update, User};
use std::time::Instant;
use stickerstash_core::{Error, InboundContent, PlacementKind, Profile};
use tracing::{debug, warn};

/// Callback data longer than this is never produced by the bot.
const MAX_CALLBACK_DATA: usize = 64;

pub async fn handle_update(context: &BotContext, update: Update) {
    metrics::record_update(update.kind());

    let Some(sender) = update.sender().cloned() else {
        debug!(update_id = update.update_id, "Update without sender ignored");
        return;
    };
    if sender.is_bot {
        return;
    }
    let profile = refresh(context, &sender).await;

    if let Some(member) = &update.my_chat_member {
        membership_changed(context, member).await;
    } else if let Some(query) = &update.callback_query {
        callback(context, query, &profile).await;
    } else if let Some(message) = &update.message {
        if let Some(name) = message.command() {
            match Command::parse(&name) {
                Some(command) => commands::handle(context, command, message, &profile).await,
                None => debug!(owner_id = sender.id, command = %name, "Unknown command"),
            }
        } else if let Some(content) = message.content() {
            ingest(context, &sender, message, &profile, content).await;
        }
    }
}

/// Upsert the sender's profile, falling back to an unsaved one on failure.
async fn refresh(context: &BotContext, sender: &User) -> Profile {
    let identity = sender.identity();
    match context.ledger.refresh_profile(&identity).await {
        Ok(refresh) => {
            if refresh.registered {
                events::profile_registered(identity.id, identity.language_code.as_deref());
            }
            refresh.profile
        }
        Err(e) => {
            warn!(owner_id = identity.id, error = %e, "Failed to refresh profile");
            Profile {
                id: identity.id,
                first_name: identity.first_name,
                last_name: identity.last_name,
                user_name: identity.username,
                language_code: identity.language_code,
                ..Profile::default()
            }
        }
    }
}

async fn membership_changed(context: &BotContext, member: &ChatMemberUpdated) {
    let owner_id = member.from.id;
    let blocked = member.new_chat_member.status == "kicked";
    match context.ledger.set_blocked(owner_id, blocked).await {
        Ok(true) if blocked => events::user_blocked(owner_id),
        Ok(true) => events::user_unblocked(owner_id),
        Ok(false) => {}
        Err(e) => warn!(owner_id, error = %e, "Failed to record membership change"),
    }
}

async fn callback(context: &BotContext, query: &CallbackQuery, profile: &Profile) {
    let owner_id = query.from.id;
    let Some(code) = query
        .data
        .as_deref()
        .filter(|data| data.len() <= MAX_CALLBACK_DATA)
        .and_then(|data| data.strip_prefix(SET_LANGUAGE_PREFIX))
    else {
        debug!(owner_id, "Unrecognized callback data");
        return;
    };

    let l10n = &context.localization;
    if let Err(e) = context
        .ledger
        .set_language(owner_id, code, &**l10n)
        .await
    {
        warn!(owner_id, language = %code, error = %e, "Language not changed");
        if let Err(e) = context.messenger.answer_callback_query(&query.id, None).await {
            context.delivery_failed(owner_id, &e).await;
        }
        return;
    }
    events::language_changed(owner_id, code);

    let selected = l10n.render(code, "language_selected", &[]);
    if let Err(e) = context
        .messenger
        .answer_callback_query(&query.id, Some(&selected))
        .await
    {
        context.delivery_failed(owner_id, &e).await;
    }

    let chat_id = match &query.message {
        Some(menu) => {
            if let Err(e) = context
                .messenger
                .delete_message(menu.chat.id, menu.message_id)
                .await
            {
                debug!(owner_id, error = %e, "Language menu not deleted");
            }
            menu.chat.id
        }
        None => owner_id as i64,
    };

    let help = l10n.render(code, "basic_help", &[]);
    context.reply(profile.id, chat_id, &help, None).await;
}

/// Metric label for content that may never reach classification.
fn content_label(content: &InboundContent) -> &'static str {
    match content {
        InboundContent::Sticker {
            is_animated: true, ..
        } => "animated",
        InboundContent::Sticker { .. } => "static",
        InboundContent::Photo { .. } => "image",
    }
}

#[tracing::instrument(skip_all, fields(owner_id = sender.id))]
async fn ingest(
    context: &BotContext,
    sender: &User,
    message: &Message,
    profile: &Profile,
    content: InboundContent,
) {
    let owner_id = sender.id;
    let chat_id = message.chat.id;
    let language = context.ledger.language_of(profile);
    let l10n = &context.localization;
    let label = content_label(&content);
    let started = Instant::now();

    if let Err(e) = context.messenger.send_chat_action(chat_id, "typing").await {
        context.delivery_failed(owner_id, &e).await;
    }

    let identity = sender.identity();
    let mut attempt = 0;
    let result = loop {
        match context.pipeline.ingest(&identity, &content).await {
            Err(e @ Error::CapacityRace { .. }) if attempt < context.capacity_race_retries => {
                attempt += 1;
                events::placement_failed(owner_id, label, e.reason(), &e.to_string(), true);
            }
            other => break other,
        }
    };
    metrics::record_ingest_duration(label, started.elapsed());

    let text = match result {
        Ok(outcome) => {
            let kind = outcome.kind.as_ref();
            let placement = outcome.placement.as_ref();
            metrics::record_item_placed(kind, placement, outcome.probes);
            if outcome.placement == PlacementKind::NewShard {
                events::shard_created(
                    owner_id,
                    &outcome.shard.name,
                    outcome.shard.volume_index,
                    kind,
                );
            }
            events::item_placed(owner_id, &outcome.shard.name, kind, placement, outcome.probes);
            if let Some(error) = &outcome.counter_drift {
                events::counter_drift(owner_id, &outcome.shard.name, kind, error);
            }

            let id = match outcome.placement {
                PlacementKind::NewShard => "stickers_add_success_new",
                PlacementKind::ExistingShard => "stickers_add_success",
            };
            let link = outcome.shard.html_link();
            l10n.render(language, id, &[("pack_link", link.as_str())])
        }
        Err(e) => {
            metrics::record_placement_failure(label, e.reason());
            events::placement_failed(owner_id, label, e.reason(), &e.to_string(), false);
            let id = match (&e, &content) {
                (Error::Oversized { .. }, _) => "sticker_too_large",
                (_, InboundContent::Photo { .. }) => "sticker_image_failure",
                _ => "stickers_add_failure",
            };
            l10n.render(language, id, &[])
        }
    };

    context.reply(owner_id, chat_id, &text, None).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{harness, Sent, BOT};
    use crate::telegram::types::{Chat, ChatMember, PhotoSize, Sticker};
    use stickerstash_core::shard::shard_name;
    use stickerstash_core::store::{ContentStore, COMMANDS_USAGE, STICKERS_USAGE};
    use stickerstash_core::Capacity;

    const OWNER: u64 = 42;

    fn user() -> User {
        User {
            id: OWNER,
            is_bot: false,
            first_name: "Ada".to_string(),
            last_name: None,
            username: Some("ada".to_string()),
            language_code: Some("en".to_string()),
        }
    }

    fn chat() -> Chat {
        Chat {
            id: OWNER as i64,
            kind: "private".to_string(),
        }
    }

    fn message(text: Option<&str>, sticker: Option<Sticker>, photo: Option<Vec<PhotoSize>>) -> Update {
        Update {
            update_id: 1,
            message: Some(Message {
                message_id: 10,
                from: Some(user()),
                chat: chat(),
                text: text.map(str::to_string),
                sticker,
                photo,
            }),
            callback_query: None,
            my_chat_member: None,
        }
    }

    fn sticker(emoji: Option<&str>, is_animated: bool, is_video: bool) -> Sticker {
        Sticker {
            file_id: "file-1".to_string(),
            is_animated,
            is_video,
            emoji: emoji.map(str::to_string),
            set_name: Some("someone_elses".to_string()),
            file_size: Some(2048),
        }
    }

    fn callback_update(data: &str) -> Update {
        Update {
            update_id: 2,
            message: None,
            callback_query: Some(CallbackQuery {
                id: "cb-1".to_string(),
                from: user(),
                message: Some(Message {
                    message_id: 77,
                    from: None,
                    chat: chat(),
                    text: Some("Please choose your language:".to_string()),
                    sticker: None,
                    photo: None,
                }),
                data: Some(data.to_string()),
            }),
            my_chat_member: None,
        }
    }

    fn membership(status: &str) -> Update {
        Update {
            update_id: 3,
            message: None,
            callback_query: None,
            my_chat_member: Some(ChatMemberUpdated {
                chat: chat(),
                from: user(),
                new_chat_member: ChatMember {
                    status: status.to_string(),
                    user: User {
                        id: 1,
                        is_bot: true,
                        first_name: "Stash".to_string(),
                        last_name: None,
                        username: Some(BOT.to_string()),
                        language_code: None,
                    },
                },
            }),
        }
    }

    #[tokio::test]
    async fn test_first_sticker_creates_a_collection() {
        let h = harness(false);
        handle_update(&h.context, message(None, Some(sticker(Some("😀"), false, false)), None)).await;

        let name = shard_name(OWNER, BOT, 1);
        assert_eq!(h.containers.item_count(&name), Some(1));

        let texts = h.messenger.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("I started a new collection"));
        assert!(texts[0].contains(&format!("https://t.me/addstickers/{name}")));
        assert!(texts[0].contains(">Ada's collection vol. 1</a>"));

        assert!(matches!(h.messenger.sent()[0], Sent::Action { .. }));

        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert_eq!(profile.static_stickers, 1);
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_second_sticker_reuses_the_collection() {
        let h = harness(false);
        let update = message(None, Some(sticker(Some("😀"), false, false)), None);
        handle_update(&h.context, update.clone()).await;
        handle_update(&h.context, update).await;

        assert_eq!(h.containers.item_count(&shard_name(OWNER, BOT, 1)), Some(2));
        let texts = h.messenger.texts();
        assert!(texts[1].starts_with("Sticker added to"));
    }

    #[tokio::test]
    async fn test_video_sticker_is_refused() {
        let h = harness(false);
        handle_update(&h.context, message(None, Some(sticker(Some("😀"), false, true)), None)).await;

        assert!(h.containers.volume_names().is_empty());
        assert_eq!(h.containers.lookups(), 0);
        assert_eq!(
            h.messenger.texts(),
            vec!["Sorry, I couldn't add this sticker. Please try again later.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_oversized_photo_gets_its_own_message() {
        let h = harness(false);
        let photo = vec![PhotoSize {
            file_id: "big".to_string(),
            width: 2000,
            height: 2000,
            file_size: Some(10 * 1024 * 1024),
        }];
        handle_update(&h.context, message(None, None, Some(photo))).await;

        assert!(h.containers.volume_names().is_empty());
        assert!(h.messenger.texts()[0].starts_with("This file is too large"));
    }

    #[tokio::test]
    async fn test_undecodable_photo_reports_image_failure() {
        let h = harness(false);
        let photo = vec![PhotoSize {
            file_id: "missing".to_string(),
            width: 800,
            height: 600,
            file_size: Some(4096),
        }];
        handle_update(&h.context, message(None, None, Some(photo))).await;

        assert_eq!(
            h.messenger.texts(),
            vec!["Sorry, I couldn't turn this picture into a sticker.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_photo_is_converted_and_counted_as_image() {
        let h = harness(false);
        h.containers.add_file("pic", b"jpeg bytes".to_vec());
        let photo = vec![PhotoSize {
            file_id: "pic".to_string(),
            width: 800,
            height: 600,
            file_size: Some(10),
        }];
        handle_update(&h.context, message(None, None, Some(photo))).await;

        assert_eq!(h.containers.item_count(&shard_name(OWNER, BOT, 1)), Some(1));
        let usage = h.store.hash_get_all(STICKERS_USAGE).await.unwrap();
        assert_eq!(usage.get("image").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_capacity_race_is_retried_then_reported() {
        let h = harness(false);
        h.containers.seed(&shard_name(OWNER, BOT, 1), false, 1);
        h.containers.enforce_capacity(Capacity {
            animated: 1,
            static_: 1,
        });

        handle_update(&h.context, message(None, Some(sticker(Some("😀"), false, false)), None)).await;

        assert_eq!(h.containers.item_count(&shard_name(OWNER, BOT, 1)), Some(1));
        assert_eq!(
            h.messenger.texts(),
            vec!["Sorry, I couldn't add this sticker. Please try again later.".to_string()]
        );
        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert_eq!(profile.static_stickers, 0);
    }

    #[tokio::test]
    async fn test_language_callback_updates_profile() {
        let h = harness(false);
        handle_update(&h.context, callback_update("set_language:es")).await;

        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert_eq!(profile.language.as_deref(), Some("es"));

        let sent = h.messenger.sent();
        assert_eq!(
            sent[0],
            Sent::Answer {
                id: "cb-1".to_string(),
                text: Some("Idioma cambiado a español".to_string()),
            }
        );
        assert_eq!(
            sent[1],
            Sent::Deleted {
                chat_id: OWNER as i64,
                message_id: 77,
            }
        );
        assert!(h.messenger.texts()[0].starts_with("Envíame"));
    }

    #[tokio::test]
    async fn test_unsupported_language_is_ignored() {
        let h = harness(false);
        handle_update(&h.context, callback_update("set_language:xx")).await;

        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert_eq!(profile.language, None);
        assert!(h.messenger.texts().is_empty());
        assert_eq!(
            h.messenger.sent(),
            vec![Sent::Answer {
                id: "cb-1".to_string(),
                text: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_oversized_callback_data_is_dropped() {
        let h = harness(false);
        let data = format!("set_language:{}", "e".repeat(60));
        handle_update(&h.context, callback_update(&data)).await;
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_membership_changes_toggle_blocked() {
        let h = harness(false);
        handle_update(&h.context, membership("kicked")).await;
        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert!(profile.blocked);
        assert_eq!(profile.blocked_times, 1);

        handle_update(&h.context, membership("member")).await;
        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert!(!profile.blocked);
        assert_eq!(profile.blocked_times, 1);
    }

    #[tokio::test]
    async fn test_forbidden_reply_flags_user_as_blocked() {
        let h = harness(false);
        h.messenger.forbid();
        handle_update(&h.context, message(Some("/help"), None, None)).await;

        let profile = h.context.ledger.user_snapshot(OWNER).await.unwrap().unwrap();
        assert!(profile.blocked);
    }

    #[tokio::test]
    async fn test_commands_are_counted_and_debug_commands_gated() {
        let h = harness(false);
        handle_update(&h.context, message(Some("/packs@stash_bot"), None, None)).await;
        handle_update(&h.context, message(Some("/chatid"), None, None)).await;

        let usage = h.store.hash_get_all(COMMANDS_USAGE).await.unwrap();
        assert_eq!(usage.get("packs").map(String::as_str), Some("1"));
        assert!(!usage.contains_key("chatid"));
        assert_eq!(
            h.messenger.texts(),
            vec!["You don't have any collections yet. Send me a sticker to start one!".to_string()]
        );
    }

    #[tokio::test]
    async fn test_debug_commands_when_enabled() {
        let h = harness(true);
        let mut shutdown = h.context.shutdown.subscribe();

        handle_update(&h.context, message(Some("/chatid"), None, None)).await;
        handle_update(&h.context, message(Some("/stop"), None, None)).await;

        let texts = h.messenger.texts();
        assert_eq!(texts[0], "Chat id: <pre>42</pre>");
        assert!(shutdown.has_changed().unwrap());
        assert!(*shutdown.borrow_and_update());
    }

    #[tokio::test]
    async fn test_packs_lists_every_collection() {
        let h = harness(false);
        h.containers.seed(&shard_name(OWNER, BOT, 1), false, 120);
        h.containers.seed(&shard_name(OWNER, BOT, 2), true, 3);

        handle_update(&h.context, message(Some("/packs"), None, None)).await;

        let text = &h.messenger.texts()[0];
        assert!(text.starts_with("You have 2 collection(s):"));
        assert!(text.contains(&shard_name(OWNER, BOT, 2)));
    }
}
