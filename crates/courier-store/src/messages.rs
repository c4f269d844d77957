//! CRUD and seen-state operations for [`Message`] records.
//!
//! The two `mark_*_seen` helpers are the persistence half of the
//! read-receipt reconciler.  Both are single conditional statements with a
//! `RETURNING` clause: the rows they touch are exactly the rows they
//! report, so interleaved callers can neither lose an update nor be told
//! about the same transition twice.

use chrono::{DateTime, Utc};
use rusqlite::params;

use courier_shared::{GroupId, Message, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Persist a new message atomically.  For group messages the `seen_by`
    /// set (normally just the sender) is written alongside; a failure on
    /// any row leaves no trace of the message.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO messages
                 (id, sender_id, receiver_id, group_id, text, image_url,
                  created_at, seen, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.map(|u| u.to_string()),
                message.group_id.map(|g| g.to_string()),
                message.text,
                message.image_url,
                message.created_at.to_rfc3339(),
                message.seen,
                message.seen_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        for reader in &message.seen_by {
            tx.execute(
                "INSERT OR IGNORE INTO message_seen_by (message_id, user_id)
                 VALUES (?1, ?2)",
                params![message.id.to_string(), reader.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch a single message by id, `seen_by` included.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, group_id, text, image_url,
                        created_at, seen, seen_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        message.seen_by = self.load_seen_by(id)?;
        Ok(message)
    }

    /// The full direct conversation between two users, in creation order.
    pub fn get_direct_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, group_id, text, image_url,
                    created_at, seen, seen_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// All messages in a group, in creation order, `seen_by` included.
    pub fn get_group_messages(&self, group_id: GroupId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, group_id, text, image_url,
                    created_at, seen, seen_at
             FROM messages
             WHERE group_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![group_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            message.seen_by = self.load_seen_by(message.id)?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Transition every unseen direct message from `other` to `viewer` to
    /// seen, stamped with `seen_at = now`.  Returns the ids that actually
    /// changed; an empty result means there was nothing to do.
    pub fn mark_direct_seen(&self, viewer: UserId, other: UserId) -> Result<Vec<MessageId>> {
        let now = Utc::now().to_rfc3339();

        let mut stmt = self.conn().prepare(
            "UPDATE messages
             SET seen = 1, seen_at = ?3
             WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0
             RETURNING id",
        )?;

        let rows = stmt.query_map(params![other.to_string(), viewer.to_string(), now], |row| {
            row.get::<_, String>(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(MessageId::parse(&row?)?);
        }
        Ok(ids)
    }

    /// Add `viewer` to the `seen_by` set of every group message they have
    /// not yet seen (excluding their own).  Set-union semantics: the
    /// `INSERT OR IGNORE` plus the primary key make concurrent calls from
    /// different viewers compose, and a repeated call returns nothing.
    pub fn mark_group_seen(&self, viewer: UserId, group_id: GroupId) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "INSERT OR IGNORE INTO message_seen_by (message_id, user_id)
             SELECT m.id, ?1
             FROM messages m
             WHERE m.group_id = ?2
               AND m.sender_id != ?1
               AND NOT EXISTS (
                   SELECT 1 FROM message_seen_by s
                   WHERE s.message_id = m.id AND s.user_id = ?1
               )
             RETURNING message_id",
        )?;

        let rows = stmt.query_map(params![viewer.to_string(), group_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(MessageId::parse(&row?)?);
        }
        Ok(ids)
    }

    /// The set of users who have seen a group message.
    pub fn load_seen_by(&self, message_id: MessageId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM message_seen_by
             WHERE message_id = ?1
             ORDER BY user_id ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut readers = Vec::new();
        for row in rows {
            readers.push(UserId::parse(&row?)?);
        }
        Ok(readers)
    }
}

/// Map a `rusqlite::Row` to a [`Message`] with an empty `seen_by`.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: Option<String> = row.get(2)?;
    let group_str: Option<String> = row.get(3)?;
    let text: Option<String> = row.get(4)?;
    let image_url: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;
    let seen: bool = row.get(7)?;
    let seen_at_str: Option<String> = row.get(8)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = receiver_str
        .map(|s| UserId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let group_id = group_str
        .map(|s| GroupId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let seen_at = seen_at_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        sender_id,
        receiver_id,
        group_id,
        text,
        image_url,
        created_at,
        seen,
        seen_at,
        seen_by: Vec::new(),
    })
}
