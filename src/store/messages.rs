use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use super::MessageStore;

/// Where a message was first written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Web,
    Telegram,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Web => "web",
            Source::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Source {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Source {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "web" => Ok(Source::Web),
            "telegram" => Ok(Source::Telegram),
            other => Err(FromSqlError::Other(
                format!("unknown message source: {other}").into(),
            )),
        }
    }
}

/// A relayed chat message as stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub local_id: i64,
    pub source: Source,
    pub sender: String,
    pub text: String,
    /// ISO-8601
    pub timestamp: String,
    /// Telegram message id; `None` until a web message has been forwarded
    pub remote_id: Option<i64>,
}

const SELECT_COLUMNS: &str =
    "SELECT id, source, sender, message_text, timestamp, telegram_message_id FROM messages";

impl MessageStore {
    /// Insert a message and return its freshly assigned local id
    pub async fn insert(
        &self,
        source: Source,
        sender: &str,
        text: &str,
        timestamp: &str,
        remote_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (source, sender, message_text, timestamp, telegram_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![source, sender, text, timestamp, remote_id],
        )
        .context("Failed to insert message")?;

        Ok(conn.last_insert_rowid())
    }

    pub async fn get(&self, local_id: i64) -> Result<Option<Message>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            rusqlite::params![local_id],
            parse_message_row,
        )
        .optional()
        .with_context(|| format!("Failed to load message {local_id}"))
    }

    /// The newest `limit` messages, returned oldest-first
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;

        let mut messages = stmt
            .query_map(rusqlite::params![limit as i64], parse_message_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list messages")?;

        messages.reverse();
        Ok(messages)
    }

    /// Back-fill the Telegram id of a forwarded message.
    /// Returns false when no row has that local id.
    pub async fn set_remote_id(&self, local_id: i64, remote_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "UPDATE messages SET telegram_message_id = ?1 WHERE id = ?2",
                rusqlite::params![remote_id, local_id],
            )
            .context("Failed to update telegram message id")?;
        Ok(rows > 0)
    }

    /// Returns false when no row has that local id
    pub async fn delete(&self, local_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "DELETE FROM messages WHERE id = ?1",
                rusqlite::params![local_id],
            )
            .context("Failed to delete message")?;
        Ok(rows > 0)
    }

    /// Whether a message from `source` already carries this remote id
    pub async fn contains_remote(&self, source: Source, remote_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let found: bool = conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM messages WHERE source = ?1 AND telegram_message_id = ?2
                 )",
                rusqlite::params![source, remote_id],
                |row| row.get(0),
            )
            .context("Failed to look up remote message id")?;
        Ok(found)
    }
}

fn parse_message_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        local_id: row.get(0)?,
        source: row.get(1)?,
        sender: row.get(2)?,
        text: row.get(3)?,
        timestamp: row.get(4)?,
        remote_id: row.get(5)?,
    })
}
