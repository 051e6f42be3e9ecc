use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, UpdateKind};
use tracing::{debug, info};

use super::{GatewayError, RemoteEvent, RemoteGateway};

/// Extra time the HTTP client waits on top of the server-side long-poll
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Bot API gateway backed by teloxide
pub struct TelegramGateway {
    bot: Bot,
    poll_timeout_secs: u32,
}

impl TelegramGateway {
    pub fn new(bot_token: &str, poll_timeout: Duration) -> Result<Self> {
        let poll_timeout_secs = u32::try_from(poll_timeout.as_secs())
            .with_context(|| format!("Poll timeout too large: {}s", poll_timeout.as_secs()))?;

        // teloxide's default client gives up before a 30s long-poll returns
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + CLIENT_TIMEOUT_SLACK)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        info!(
            "Telegram gateway configured (long-poll timeout {}s)",
            poll_timeout_secs
        );

        Ok(Self {
            bot: Bot::with_client(bot_token, client),
            poll_timeout_secs,
        })
    }
}

fn to_remote_event(update: Update) -> RemoteEvent {
    let id = i64::from(update.id.0);
    match update.kind {
        UpdateKind::Message(msg) => RemoteEvent {
            id,
            chat_id: Some(msg.chat.id.0),
            sender_name: msg.from.as_ref().map(|user| user.first_name.clone()),
            text: msg.text().map(str::to_string),
            date: msg.date.timestamp(),
            message_id: i64::from(msg.id.0),
        },
        _ => RemoteEvent {
            id,
            chat_id: None,
            sender_name: None,
            text: None,
            date: 0,
            message_id: 0,
        },
    }
}

#[async_trait]
impl RemoteGateway for TelegramGateway {
    async fn poll(&self, offset: i64) -> Result<Vec<RemoteEvent>, GatewayError> {
        let offset = i32::try_from(offset)
            .map_err(|_| GatewayError::Rejected(format!("offset {offset} out of range")))?;

        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(self.poll_timeout_secs)
            .await
            .inspect_err(|e| debug!("getUpdates failed at offset {}: {:?}", offset, e))?;

        debug!("Fetched {} update(s) from offset {}", updates.len(), offset);
        Ok(updates.into_iter().map(to_remote_event).collect())
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<i64, GatewayError> {
        let sent = self
            .bot
            .send_message(ChatId(chat_id), text)
            .await
            .inspect_err(|e| debug!("sendMessage to chat {} failed: {:?}", chat_id, e))?;

        info!("Sent message to Telegram chat {} (id {})", chat_id, sent.id.0);
        Ok(i64::from(sent.id.0))
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), GatewayError> {
        let remote = i32::try_from(message_id).map_err(|_| {
            GatewayError::Rejected(format!("message id {message_id} out of range"))
        })?;

        self.bot
            .delete_message(ChatId(chat_id), MessageId(remote))
            .await
            .inspect_err(|e| {
                debug!(
                    "deleteMessage {} in chat {} failed: {:?}",
                    message_id, chat_id, e
                )
            })?;

        info!("Deleted Telegram message {} in chat {}", message_id, chat_id);
        Ok(())
    }
}
