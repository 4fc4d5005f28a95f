//! Telegram bot
//!
//! - `commands`: slash command parsing and handlers
//! - `dispatcher`: per-update routing, profile refresh, content ingestion
//!
//! Updates are fetched by long polling and each one is handled on its own
//! task; nothing is shared between tasks except the [`BotContext`]. Handler
//! tasks are tracked and awaited before polling returns.

pub mod commands;
pub mod dispatcher;

use crate::localization::Localization;
use crate::observability::events;
use crate::telegram::{InlineKeyboardMarkup, Message, TelegramClient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stickerstash_core::{ContainerError, IngestionPipeline, Ledger};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Outbound chat operations used by the handlers.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send an HTML message, returning the sent message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64, ContainerError>;

    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), ContainerError>;

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ContainerError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ContainerError>;
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64, ContainerError> {
        let message: Message = TelegramClient::send_message(self, chat_id, text, keyboard).await?;
        Ok(message.message_id)
    }

    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), ContainerError> {
        TelegramClient::send_chat_action(self, chat_id, action).await
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ContainerError> {
        TelegramClient::answer_callback_query(self, callback_query_id, text).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ContainerError> {
        TelegramClient::delete_message(self, chat_id, message_id).await
    }
}

/// Everything a handler needs, shared by all update tasks.
pub struct BotContext {
    pub ledger: Arc<Ledger>,
    pub pipeline: Arc<IngestionPipeline>,
    pub localization: Arc<Localization>,
    pub messenger: Arc<dyn Messenger>,
    pub debug_commands: bool,
    pub capacity_race_retries: u32,
    /// Set to `true` to stop polling
    pub shutdown: watch::Sender<bool>,
}

impl BotContext {
    /// Send a message to a user's private chat.
    ///
    /// A `403` means the user blocked the bot; the profile is flagged and
    /// the error is swallowed.
    pub async fn reply(
        &self,
        owner_id: u64,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Option<i64> {
        match self.messenger.send_message(chat_id, text, keyboard).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                self.delivery_failed(owner_id, &e).await;
                None
            }
        }
    }

    /// Record a failed outbound call.
    pub async fn delivery_failed(&self, owner_id: u64, error: &ContainerError) {
        match error {
            ContainerError::Forbidden(reason) => {
                debug!(owner_id, reason = %reason, "Delivery forbidden");
                match self.ledger.set_blocked(owner_id, true).await {
                    Ok(true) => events::user_blocked(owner_id),
                    Ok(false) => {}
                    Err(e) => warn!(owner_id, error = %e, "Failed to flag blocked user"),
                }
            }
            other => warn!(owner_id, error = %other, "Failed to deliver message"),
        }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Long-poll the Bot API until shutdown is requested.
pub async fn run_polling(
    client: TelegramClient,
    context: Arc<BotContext>,
    poll_timeout: Duration,
) {
    let mut shutdown = context.shutdown.subscribe();
    let mut offset: i64 = 0;
    let mut failures: u32 = 0;
    let mut handlers = JoinSet::new();

    info!(poll_timeout_secs = poll_timeout.as_secs(), "Polling for updates");

    loop {
        if *shutdown.borrow() {
            break;
        }

        while let Some(result) = handlers.try_join_next() {
            log_handler_exit(result);
        }

        let updates = tokio::select! {
            result = client.get_updates(offset, poll_timeout) => result,
            _ = shutdown.changed() => break,
        };

        match updates {
            Ok(updates) => {
                failures = 0;
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let context = Arc::clone(&context);
                    handlers.spawn(async move {
                        dispatcher::handle_update(&context, update).await;
                    });
                }
            }
            Err(ContainerError::RateLimited { retry_after }) => {
                let wait = Duration::from_secs(retry_after.unwrap_or(1));
                warn!(wait_secs = wait.as_secs(), "getUpdates rate limited");
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                failures += 1;
                let wait = Duration::from_secs(2u64.saturating_pow(failures.min(5)));
                error!(error = %e, failures, wait_secs = wait.as_secs(), "getUpdates failed");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    info!(in_flight = handlers.len(), "Polling stopped, draining handlers");
    drain_handlers(&mut handlers).await;
}

/// Wait for every tracked handler task to finish.
async fn drain_handlers(handlers: &mut JoinSet<()>) {
    while let Some(result) = handlers.join_next().await {
        log_handler_exit(result);
    }
}

fn log_handler_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Update handler task failed");
    }
}
