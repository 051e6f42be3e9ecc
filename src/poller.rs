use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::gateway::{GatewayError, RemoteEvent, RemoteGateway};
use crate::store::{MessageStore, Source};

const UNKNOWN_SENDER: &str = "Unknown";

/// Background loop pulling Telegram updates into the message store.
///
/// Owns the update offset. The offset lives in memory only, so a restart
/// polls from 0 again; re-delivered messages are dropped by remote id.
pub struct SyncPoller {
    gateway: Arc<dyn RemoteGateway>,
    store: MessageStore,
    chat_id: i64,
    command_prefix: Option<String>,
    idle_interval: Duration,
    error_backoff: Duration,
    last_offset: i64,
}

impl SyncPoller {
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: MessageStore, chat_id: i64) -> Self {
        Self {
            gateway,
            store,
            chat_id,
            command_prefix: None,
            idle_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            last_offset: 0,
        }
    }

    pub fn with_command_prefix(mut self, prefix: Option<String>) -> Self {
        self.command_prefix = prefix;
        self
    }

    pub fn with_intervals(mut self, idle: Duration, error_backoff: Duration) -> Self {
        self.idle_interval = idle;
        self.error_backoff = error_backoff;
        self
    }

    /// Highest update id seen so far
    #[cfg(test)]
    pub fn last_offset(&self) -> i64 {
        self.last_offset
    }

    fn next_offset(&self) -> i64 {
        if self.last_offset > 0 {
            self.last_offset + 1
        } else {
            0
        }
    }

    /// Run one poll cycle and return how many messages were stored
    pub async fn poll_once(&mut self) -> Result<usize, GatewayError> {
        let events = self.gateway.poll(self.next_offset()).await?;
        let mut stored = 0;

        for event in events {
            self.last_offset = self.last_offset.max(event.id);

            let Some(text) = accepted_text(&event, self.chat_id, self.command_prefix.as_deref())
            else {
                debug!("Skipping update {}", event.id);
                continue;
            };

            match self
                .store
                .contains_remote(Source::Telegram, event.message_id)
                .await
            {
                Ok(false) => {}
                Ok(true) => {
                    debug!("Telegram message {} already stored", event.message_id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to check for duplicate message: {:#}", e);
                    continue;
                }
            }

            let sender = event.sender_name.as_deref().unwrap_or(UNKNOWN_SENDER);
            match self
                .store
                .insert(
                    Source::Telegram,
                    sender,
                    &text,
                    &iso_timestamp(event.date),
                    Some(event.message_id),
                )
                .await
            {
                Ok(local_id) => {
                    info!(
                        "Received from Telegram ({} in chat {}): {} [local id {}]",
                        sender, self.chat_id, text, local_id
                    );
                    stored += 1;
                }
                Err(e) => error!(
                    "Failed to store Telegram message {}: {:#}",
                    event.message_id, e
                ),
            }
        }

        Ok(stored)
    }

    /// Poll until `stop` flips to true or its sender is dropped
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Telegram polling started for chat {}", self.chat_id);
        let (idle, backoff) = (self.idle_interval, self.error_backoff);

        loop {
            if *stop.borrow() {
                break;
            }

            let result = tokio::select! {
                _ = stop.changed() => break,
                result = self.poll_once() => result,
            };

            let delay = match result {
                Ok(_) => idle,
                Err(e) => {
                    warn!("Telegram poll failed, retrying in {}s: {}", backoff.as_secs(), e);
                    backoff
                }
            };

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Telegram polling stopped at offset {}", self.last_offset);
    }
}

/// Text to store for an update, or `None` when the update is not relayed.
pub fn accepted_text(
    event: &RemoteEvent,
    chat_id: i64,
    command_prefix: Option<&str>,
) -> Option<String> {
    if event.chat_id != Some(chat_id) {
        return None;
    }
    let text = event.text.as_deref().filter(|t| !t.trim().is_empty())?;

    match command_prefix {
        Some(prefix) => {
            let rest = text.strip_prefix(prefix)?.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        }
        None => Some(text.to_string()),
    }
}

fn iso_timestamp(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
