// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message rows and the forward-only status transition.

use parley_core::envelope::StatusUpdate;
use parley_core::traits::StatusChange;
use parley_core::types::{Message, MessageStatus};
use parley_core::ParleyError;
use rusqlite::{params, OptionalExtension, Row};

use super::{json_col, opt_ts_col, parse_col, to_json, ts, ts_col};
use crate::database::Database;

const COLUMNS: &str = "m.id, m.conversation_id, m.sender_type, m.sender_id, m.content_type, \
                       m.content, m.metadata, m.attachments, m.status, m.external_id, m.error, \
                       m.created_at, m.sent_at, m.delivered_at, m.read_at";

pub(crate) fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_type: parse_col(row, 2)?,
        sender_id: row.get(3)?,
        content_type: parse_col(row, 4)?,
        content: row.get(5)?,
        metadata: json_col(row, 6)?,
        attachments: json_col(row, 7)?,
        status: parse_col(row, 8)?,
        external_id: row.get(9)?,
        error: row.get(10)?,
        created_at: ts_col(row, 11)?,
        sent_at: opt_ts_col(row, 12)?,
        delivered_at: opt_ts_col(row, 13)?,
        read_at: opt_ts_col(row, 14)?,
    })
}

const INSERT: &str = "INSERT INTO messages (id, conversation_id, channel_id, sender_type, sender_id,
                      content_type, content, metadata, attachments, status, external_id, error,
                      created_at, sent_at, delivered_at, read_at)
                      VALUES (?1, ?2, (SELECT channel_id FROM conversations WHERE id = ?2),
                      ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

/// A message with its JSON columns already encoded.
struct NewRow {
    msg: Message,
    metadata: String,
    attachments: String,
}

impl NewRow {
    fn new(msg: &Message) -> Result<Self, ParleyError> {
        Ok(Self {
            metadata: to_json(&msg.metadata)?,
            attachments: to_json(&msg.attachments)?,
            msg: msg.clone(),
        })
    }
}

fn insert_row(conn: &rusqlite::Connection, sql: &str, row: &NewRow) -> rusqlite::Result<usize> {
    let msg = &row.msg;
    conn.execute(
        sql,
        params![
            msg.id,
            msg.conversation_id,
            msg.sender_type.to_string(),
            msg.sender_id,
            msg.content_type.to_string(),
            msg.content,
            row.metadata,
            row.attachments,
            msg.status.to_string(),
            msg.external_id,
            msg.error,
            ts(&msg.created_at),
            msg.sent_at.as_ref().map(ts),
            msg.delivered_at.as_ref().map(ts),
            msg.read_at.as_ref().map(ts),
        ],
    )
}

pub async fn insert_message(db: &Database, msg: &Message) -> Result<(), ParleyError> {
    let row = NewRow::new(msg)?;
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            insert_row(conn, INSERT, &row)?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Stores an inbound message unless its upstream event is already recorded
/// on the same channel. Returns the stored row and whether `msg` was inserted.
pub async fn insert_inbound(db: &Database, msg: &Message) -> Result<(Message, bool), ParleyError> {
    let row = NewRow::new(msg)?;
    db.connection()
        .call(move |conn| -> Result<(Message, bool), rusqlite::Error> {
            let tx = conn.transaction()?;
            let inserted = insert_row(&tx, &format!("{INSERT} ON CONFLICT DO NOTHING"), &row)? == 1;
            let msg = row.msg;
            let stored = if inserted {
                msg
            } else {
                tx.query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM messages m
                         WHERE m.channel_id = (SELECT channel_id FROM conversations WHERE id = ?1)
                           AND m.external_id = ?2 AND m.sender_type = 'contact'"
                    ),
                    params![msg.conversation_id, msg.external_id],
                    row_to_message,
                )?
            };
            tx.commit()?;
            Ok((stored, inserted))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_message(db: &Database, id: &str) -> Result<Option<Message>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Message>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Inbound message recorded for an upstream event on a channel.
pub async fn find_by_external_id(
    db: &Database,
    channel_id: &str,
    external_id: &str,
) -> Result<Option<Message>, ParleyError> {
    let (channel_id, external_id) = (channel_id.to_string(), external_id.to_string());
    db.connection()
        .call(move |conn| -> Result<Option<Message>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM messages m
                     WHERE m.channel_id = ?1 AND m.external_id = ?2 AND m.sender_type = 'contact'"
                ),
                params![channel_id, external_id],
                row_to_message,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Last `limit` messages of a conversation, oldest first.
pub async fn list_messages(
    db: &Database,
    conversation_id: &str,
    limit: usize,
) -> Result<Vec<Message>, ParleyError> {
    let conversation_id = conversation_id.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages m
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
            let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Applies a status callback inside one transaction.
///
/// The current status is re-read under the transaction so two callbacks
/// racing for the same message cannot both apply.
pub async fn update_status(db: &Database, update: &StatusUpdate) -> Result<StatusChange, ParleyError> {
    let update = update.clone();
    let at = ts(&update.timestamp);
    db.connection()
        .call(move |conn| -> Result<StatusChange, rusqlite::Error> {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM messages WHERE id = ?1",
                    params![update.message_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(StatusChange::Unknown);
            };
            let current: MessageStatus = current.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

            if !current.can_transition_to(update.status) {
                return Ok(StatusChange::Ignored { current });
            }

            let timestamp_column = match update.status {
                MessageStatus::Sent => Some("sent_at"),
                MessageStatus::Delivered => Some("delivered_at"),
                MessageStatus::Read => Some("read_at"),
                _ => None,
            };
            tx.execute(
                "UPDATE messages SET status = ?1,
                 external_id = COALESCE(?2, external_id),
                 error = COALESCE(?3, error)
                 WHERE id = ?4",
                params![
                    update.status.to_string(),
                    update.external_id,
                    update.error,
                    update.message_id
                ],
            )?;
            if let Some(column) = timestamp_column {
                tx.execute(
                    &format!("UPDATE messages SET {column} = COALESCE({column}, ?1) WHERE id = ?2"),
                    params![at, update.message_id],
                )?;
            }
            tx.commit()?;
            Ok(StatusChange::Applied {
                from: current,
                to: update.status,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::conversations::create_conversation;
    use crate::queries::test_support::{conversation, setup_db};
    use chrono::{Duration, Utc};
    use parley_core::types::{ContentType, SenderType};
    use std::collections::BTreeMap;

    fn message(id: &str, offset_ms: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_type: SenderType::Contact,
            sender_id: Some("contact-1".to_string()),
            content_type: ContentType::Text,
            content: format!("message {id}"),
            metadata: BTreeMap::new(),
            attachments: vec![],
            status: MessageStatus::Pending,
            external_id: Some(format!("ext-{id}")),
            error: None,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
            sent_at: None,
            delivered_at: None,
            read_at: None,
        }
    }

    fn status(id: &str, status: MessageStatus) -> StatusUpdate {
        StatusUpdate {
            message_id: id.to_string(),
            status,
            external_id: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_returns_tail_in_order() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        for i in 0..5 {
            insert_message(&db, &message(&format!("m{i}"), i * 10)).await.unwrap();
        }

        let tail = list_messages(&db, "c1", 3).await.unwrap();
        let ids: Vec<_> = tail.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn external_id_lookup_is_scoped_to_channel() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        insert_message(&db, &message("m1", 0)).await.unwrap();

        let found = find_by_external_id(&db, "channel-1", "ext-m1").await.unwrap();
        assert_eq!(found.unwrap().id, "m1");
        let other = find_by_external_id(&db, "channel-2", "ext-m1").await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn inbound_insert_keeps_first_copy() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        let (stored, inserted) = insert_inbound(&db, &message("m1", 0)).await.unwrap();
        assert!(inserted);
        assert_eq!(stored.id, "m1");

        // Same upstream event under a fresh id.
        let mut retry = message("m2", 5);
        retry.external_id = Some("ext-m1".into());
        let (stored, inserted) = insert_inbound(&db, &retry).await.unwrap();
        assert!(!inserted);
        assert_eq!(stored.id, "m1");
        assert_eq!(list_messages(&db, "c1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_inbound_inserts_store_one_row() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        let mut twin = message("m2", 0);
        twin.external_id = Some("ext-m1".into());
        let first = message("m1", 0);
        let (a, b) = tokio::join!(
            insert_inbound(&db, &first),
            insert_inbound(&db, &twin)
        );
        let (a, a_inserted) = a.unwrap();
        let (b, b_inserted) = b.unwrap();
        assert_eq!(a.id, b.id);
        assert!(a_inserted ^ b_inserted);
        assert_eq!(list_messages(&db, "c1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        let mut outbound = message("out", 0);
        outbound.sender_type = SenderType::Bot;
        insert_message(&db, &outbound).await.unwrap();

        let mut sent = status("out", MessageStatus::Sent);
        sent.external_id = Some("wamid.1".into());
        assert_eq!(
            update_status(&db, &sent).await.unwrap(),
            StatusChange::Applied {
                from: MessageStatus::Pending,
                to: MessageStatus::Sent
            }
        );
        update_status(&db, &status("out", MessageStatus::Delivered))
            .await
            .unwrap();

        // A late `sent` callback must not move the message backwards.
        let late = update_status(&db, &status("out", MessageStatus::Sent))
            .await
            .unwrap();
        assert_eq!(
            late,
            StatusChange::Ignored {
                current: MessageStatus::Delivered
            }
        );

        let stored = get_message(&db, "out").await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(stored.external_id.as_deref(), Some("wamid.1"));
        assert!(stored.sent_at.is_some());
        assert!(stored.delivered_at.is_some());
        assert!(stored.read_at.is_none());
    }

    #[tokio::test]
    async fn unknown_message_status_is_reported() {
        let (db, _dir) = setup_db().await;
        let change = update_status(&db, &status("ghost", MessageStatus::Read))
            .await
            .unwrap();
        assert_eq!(change, StatusChange::Unknown);
    }

    #[tokio::test]
    async fn failed_records_error_and_is_terminal() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        insert_message(&db, &message("m1", 0)).await.unwrap();

        let mut failed = status("m1", MessageStatus::Failed);
        failed.error = Some("rejected upstream".into());
        update_status(&db, &failed).await.unwrap();
        let change = update_status(&db, &status("m1", MessageStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(
            change,
            StatusChange::Ignored {
                current: MessageStatus::Failed
            }
        );
        let stored = get_message(&db, "m1").await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("rejected upstream"));
    }
}
