use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::gateway::RemoteGateway;
use crate::store::{Message, MessageStore, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Warning,
    Error,
}

/// What the caller is told: fully done, partially done, or failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl Outcome {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            id: None,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warning,
            message: message.into(),
            id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            id: None,
        }
    }

    fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error("Message {0} not found")]
    NotFound(i64),
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// A configured Telegram chat to mirror web messages into
#[derive(Clone)]
pub struct Remote {
    pub gateway: Arc<dyn RemoteGateway>,
    pub chat_id: i64,
}

/// Web-facing operations over the store and the Telegram gateway
pub struct Relay {
    store: MessageStore,
    remote: Option<Remote>,
    history_limit: usize,
    web_sender: String,
}

impl Relay {
    pub fn new(store: MessageStore, remote: Option<Remote>, config: &RelayConfig) -> Self {
        Self {
            store,
            remote,
            history_limit: config.history_limit,
            web_sender: config.web_sender.clone(),
        }
    }

    pub fn telegram_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn list(&self) -> Result<Vec<Message>, RelayError> {
        Ok(self.store.list_recent(self.history_limit).await?)
    }

    /// Save a web message, then forward it to Telegram.
    /// The local row is kept whatever happens on the Telegram side.
    pub async fn post(
        &self,
        text: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<Outcome, RelayError> {
        let text = text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| RelayError::Validation("Message cannot be empty".to_string()))?;
        let timestamp = match timestamp.filter(|t| !t.trim().is_empty()) {
            Some(ts) => ts.to_string(),
            None => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let local_id = self
            .store
            .insert(Source::Web, &self.web_sender, text, &timestamp, None)
            .await?;

        let Some(remote) = &self.remote else {
            return Ok(Outcome::warning(
                "Message saved, but Telegram integration is not configured.",
            )
            .with_id(local_id));
        };

        let remote_id = match remote.gateway.send(remote.chat_id, text).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                warn!("Message {} saved but not forwarded: {}", local_id, e);
                return Ok(
                    Outcome::warning("Message saved but failed to send to Telegram.")
                        .with_id(local_id),
                );
            }
        };

        let recorded = match self.store.set_remote_id(local_id, remote_id).await {
            Ok(found) => found,
            Err(e) => {
                error!("Failed to record Telegram id for message {}: {:#}", local_id, e);
                false
            }
        };
        if !recorded {
            warn!(
                "Message {} sent as Telegram message {} but the id was not recorded",
                local_id, remote_id
            );
            return Ok(Outcome::warning(
                "Message sent to Telegram, but its Telegram id could not be recorded.",
            )
            .with_id(local_id));
        }

        info!("Relayed web message {} as Telegram message {}", local_id, remote_id);
        Ok(Outcome::success("Message sent to Telegram and saved!").with_id(local_id))
    }

    /// Delete on Telegram first, then locally. Only a failed local delete
    /// is an error; a failed Telegram delete downgrades to a warning.
    pub async fn delete(&self, local_id: Option<i64>) -> Result<Outcome, RelayError> {
        let local_id =
            local_id.ok_or_else(|| RelayError::Validation("Message id is required".to_string()))?;

        let message = self
            .store
            .get(local_id)
            .await?
            .ok_or(RelayError::NotFound(local_id))?;

        let remote_deleted = match (message.remote_id, &self.remote) {
            (Some(remote_id), Some(remote)) => Some(
                remote
                    .gateway
                    .delete(remote.chat_id, remote_id)
                    .await
                    .inspect_err(|e| {
                        warn!("Telegram delete failed for message {}: {}", local_id, e)
                    })
                    .is_ok(),
            ),
            _ => None,
        };

        match self.store.delete(local_id).await {
            Ok(true) => {}
            // Removed concurrently between lookup and delete
            Ok(false) if remote_deleted == Some(true) => {
                warn!("Message {} vanished locally after its Telegram delete", local_id);
                return Ok(Outcome::warning(
                    "Message deleted from Telegram, but it was already gone from the database.",
                )
                .with_id(local_id));
            }
            Ok(false) => return Err(RelayError::NotFound(local_id)),
            Err(e) => {
                error!(
                    "Failed to delete message {} locally (Telegram deleted: {:?}): {:#}",
                    local_id, remote_deleted, e
                );
                return Err(RelayError::Storage(e));
            }
        }

        let outcome = match (remote_deleted, message.remote_id) {
            (Some(true), _) => Outcome::success("Message deleted from Telegram and the database."),
            (Some(false), _) => Outcome::warning(
                "Message deleted from the database, but could not be deleted from Telegram.",
            ),
            (None, Some(_)) => Outcome::warning(
                "Message deleted from the database, but Telegram integration is not configured.",
            ),
            (None, None) => Outcome::success("Message deleted."),
        };

        info!("Deleted message {} ({:?})", local_id, outcome.status);
        Ok(outcome.with_id(local_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;

    const CHAT: i64 = -1001;

    fn relay_with(store: &MessageStore, gateway: Option<Arc<FakeGateway>>) -> Relay {
        let remote = gateway.map(|gateway| Remote {
            gateway,
            chat_id: CHAT,
        });
        Relay::new(store.clone(), remote, &RelayConfig::default())
    }

    #[tokio::test]
    async fn test_post_success_backfills_remote_id() {
        let store = MessageStore::open_in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let relay = relay_with(&store, Some(gateway.clone()));

        let outcome = relay
            .post(Some("hello"), Some("2026-03-01T12:00:00"))
            .await
            .unwrap();
        assert_eq!(outcome.status, Status::Success);

        let messages = relay.list().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source, Source::Web);
        assert_eq!(messages[0].sender, "Web User");
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].timestamp, "2026-03-01T12:00:00");
        assert_eq!(messages[0].remote_id, Some(1001));
        assert_eq!(Some(messages[0].local_id), outcome.id);
        assert_eq!(*gateway.sent.lock().unwrap(), vec![(CHAT, "hello".to_string())]);
    }

    #[tokio::test]
    async fn test_post_send_failure_still_saves() {
        let store = MessageStore::open_in_memory().unwrap();
        let gateway = Arc::new(FakeGateway {
            fail_send: true,
            ..Default::default()
        });
        let relay = relay_with(&store, Some(gateway));

        let outcome = relay.post(Some("kept"), Some("t")).await.unwrap();
        assert_eq!(outcome.status, Status::Warning);

        let messages = store.list_recent(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].remote_id, None);
    }

    #[tokio::test]
    async fn test_post_without_telegram_warns() {
        let store = MessageStore::open_in_memory().unwrap();
        let relay = relay_with(&store, None);

        let outcome = relay.post(Some("local only"), None).await.unwrap();
        assert_eq!(outcome.status, Status::Warning);
        assert!(outcome.message.contains("not configured"));

        let messages = store.list_recent(10).await.unwrap();
        assert_eq!(messages[0].text, "local only");
        assert!(!messages[0].timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_post_requires_text() {
        let store = MessageStore::open_in_memory().unwrap();
        let relay = relay_with(&store, None);

        for text in [None, Some(""), Some("   ")] {
            let result = relay.post(text, Some("t")).await;
            assert!(matches!(result, Err(RelayError::Validation(_))));
        }
        assert!(store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_capped_by_history_limit() {
        let store = MessageStore::open_in_memory().unwrap();
        let config = RelayConfig {
            history_limit: 2,
            ..Default::default()
        };
        let relay = Relay::new(store.clone(), None, &config);
        for text in ["a", "b", "c"] {
            relay.post(Some(text), Some("t")).await.unwrap();
        }

        let texts: Vec<_> = relay
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MessageStore::open_in_memory().unwrap();
        let relay = relay_with(&store, None);
        relay.post(Some("stays"), Some("t")).await.unwrap();

        let result = relay.delete(Some(42)).await;
        assert!(matches!(result, Err(RelayError::NotFound(42))));
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_id() {
        let store = MessageStore::open_in_memory().unwrap();
        let relay = relay_with(&store, None);
        assert!(matches!(
            relay.delete(None).await,
            Err(RelayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_sides() {
        let store = MessageStore::open_in_memory().unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let relay = relay_with(&store, Some(gateway.clone()));

        let id = relay.post(Some("bye"), Some("t")).await.unwrap().id.unwrap();
        let outcome = relay.delete(Some(id)).await.unwrap();

        assert_eq!(outcome.status, Status::Success);
        assert_eq!(*gateway.deleted.lock().unwrap(), vec![(CHAT, 1001)]);
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_remote_failure_still_removes_locally() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store
            .insert(Source::Telegram, "Alice", "old", "t", Some(5))
            .await
            .unwrap();
        let gateway = Arc::new(FakeGateway {
            fail_delete: true,
            ..Default::default()
        });
        let relay = relay_with(&store, Some(gateway));

        let outcome = relay.delete(Some(id)).await.unwrap();
        assert_eq!(outcome.status, Status::Warning);
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_unsent_message_skips_telegram() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store
            .insert(Source::Web, "Web User", "never sent", "t", None)
            .await
            .unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let relay = relay_with(&store, Some(gateway.clone()));

        let outcome = relay.delete(Some(id)).await.unwrap();
        assert_eq!(outcome.status, Status::Success);
        assert!(gateway.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_unrecorded_remote_id_warns() {
        let store = MessageStore::open_in_memory().unwrap();
        // The row about to be inserted gets id 1 and disappears mid-send
        let gateway = Arc::new(FakeGateway {
            vanish: Some((store.clone(), 1)),
            ..Default::default()
        });
        let relay = relay_with(&store, Some(gateway.clone()));

        let outcome = relay.post(Some("racy"), Some("t")).await.unwrap();
        assert_eq!(outcome.status, Status::Warning);
        assert_eq!(outcome.id, Some(1));
        assert!(outcome.message.contains("could not be recorded"));
        assert_eq!(gateway.sent.lock().unwrap().len(), 1);
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_sent_message_without_telegram_warns() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store
            .insert(Source::Telegram, "Alice", "from the group", "t", Some(9))
            .await
            .unwrap();
        let relay = relay_with(&store, None);

        let outcome = relay.delete(Some(id)).await.unwrap();
        assert_eq!(outcome.status, Status::Warning);
        assert!(outcome.message.contains("not configured"));
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_after_concurrent_removal_reports_remote_delete() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store
            .insert(Source::Telegram, "Alice", "twice", "t", Some(12))
            .await
            .unwrap();
        let gateway = Arc::new(FakeGateway {
            vanish: Some((store.clone(), id)),
            ..Default::default()
        });
        let relay = relay_with(&store, Some(gateway.clone()));

        let outcome = relay.delete(Some(id)).await.unwrap();
        assert_eq!(outcome.status, Status::Warning);
        assert!(outcome.message.contains("deleted from Telegram"));
        assert_eq!(*gateway.deleted.lock().unwrap(), vec![(CHAT, 12)]);
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(Outcome::warning("partial")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "warning", "message": "partial"}));
    }
}
