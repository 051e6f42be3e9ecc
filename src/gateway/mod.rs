pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

/// One update returned by a poll.
///
/// Updates that are not chat messages still come back, with `chat_id`
/// and `text` empty, so their ids move the offset forward.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    /// Update id, monotonic on the remote side
    pub id: i64,
    pub chat_id: Option<i64>,
    pub sender_name: Option<String>,
    pub text: Option<String>,
    /// Unix epoch seconds
    pub date: i64,
    pub message_id: i64,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
    #[error("telegram rejected the call: {0}")]
    Rejected(String),
}

/// The remote chat platform, as far as the relay needs it
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Long-poll for updates with id >= `offset`
    async fn poll(&self, offset: i64) -> Result<Vec<RemoteEvent>, GatewayError>;

    /// Post `text` to a chat, returning the remote message id
    async fn send(&self, chat_id: i64, text: &str) -> Result<i64, GatewayError>;

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), GatewayError>;
}
