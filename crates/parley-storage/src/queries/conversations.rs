// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation rows: creation, lookup and the status changes owned by the router.

use chrono::Utc;
use parley_core::types::Conversation;
use parley_core::ParleyError;
use rusqlite::{params, OptionalExtension, Row};

use super::{json_col, opt_ts_col, parse_col, to_json, ts, ts_col};
use crate::database::Database;

const COLUMNS: &str = "id, tenant_id, channel_id, contact_id, status, priority, \
                       assigned_user_id, tags, escalated_at, created_at, updated_at";

pub(crate) fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        channel_id: row.get(2)?,
        contact_id: row.get(3)?,
        status: parse_col(row, 4)?,
        priority: parse_col(row, 5)?,
        assigned_user_id: row.get(6)?,
        tags: json_col(row, 7)?,
        escalated_at: opt_ts_col(row, 8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

const INSERT: &str = "INSERT INTO conversations (id, tenant_id, channel_id, contact_id, status,
                      priority, assigned_user_id, tags, escalated_at, created_at, updated_at)
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

fn insert_row(
    conn: &rusqlite::Connection,
    sql: &str,
    conv: &Conversation,
    tags: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        sql,
        params![
            conv.id,
            conv.tenant_id,
            conv.channel_id,
            conv.contact_id,
            conv.status.to_string(),
            conv.priority.to_string(),
            conv.assigned_user_id,
            tags,
            conv.escalated_at.as_ref().map(ts),
            ts(&conv.created_at),
            ts(&conv.updated_at),
        ],
    )
}

pub async fn create_conversation(db: &Database, conv: &Conversation) -> Result<(), ParleyError> {
    let conv = conv.clone();
    let tags = to_json(&conv.tags)?;
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            insert_row(conn, INSERT, &conv, &tags)?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Inserts `conv` unless the contact already has an active conversation on
/// the channel, in which case that one is returned. The flag is true when
/// `conv` itself was stored.
pub async fn open_conversation(
    db: &Database,
    conv: &Conversation,
) -> Result<(Conversation, bool), ParleyError> {
    let conv = conv.clone();
    let tags = to_json(&conv.tags)?;
    db.connection()
        .call(move |conn| -> Result<(Conversation, bool), rusqlite::Error> {
            let tx = conn.transaction()?;
            let inserted =
                insert_row(&tx, &format!("{INSERT} ON CONFLICT DO NOTHING"), &conv, &tags)? == 1;
            let stored = if inserted {
                conv
            } else {
                tx.query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM conversations
                         WHERE tenant_id = ?1 AND channel_id = ?2 AND contact_id = ?3
                           AND status IN ('open', 'pending', 'escalated')"
                    ),
                    params![conv.tenant_id, conv.channel_id, conv.contact_id],
                    row_to_conversation,
                )?
            };
            tx.commit()?;
            Ok((stored, inserted))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_conversation(db: &Database, id: &str) -> Result<Option<Conversation>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                row_to_conversation,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recent conversation for the contact that still accepts messages.
pub async fn find_open_conversation(
    db: &Database,
    tenant_id: &str,
    channel_id: &str,
    contact_id: &str,
) -> Result<Option<Conversation>, ParleyError> {
    let (tenant_id, channel_id, contact_id) =
        (tenant_id.to_string(), channel_id.to_string(), contact_id.to_string());
    db.connection()
        .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM conversations
                     WHERE tenant_id = ?1 AND channel_id = ?2 AND contact_id = ?3
                       AND status IN ('open', 'pending', 'escalated')
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![tenant_id, channel_id, contact_id],
                row_to_conversation,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Adds a tag unless already present.
pub async fn add_tag(db: &Database, id: &str, tag: &str) -> Result<(), ParleyError> {
    let (id, tag) = (id.to_string(), tag.to_string());
    let now = ts(&Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            let raw: Option<String> = tx
                .query_row(
                    "SELECT tags FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = raw else {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            };
            let mut tags: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            if !tags.iter().any(|t| t == &tag) {
                tags.push(tag);
                let encoded = serde_json::to_string(&tags)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                tx.execute(
                    "UPDATE conversations SET tags = ?1, updated_at = ?2 WHERE id = ?3",
                    params![encoded, now, id],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn assign(db: &Database, id: &str, user_id: &str) -> Result<(), ParleyError> {
    let (id, user_id) = (id.to_string(), user_id.to_string());
    let now = ts(&Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let updated = conn.execute(
                "UPDATE conversations SET assigned_user_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![user_id, now, id],
            )?;
            if updated == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::{conversation, setup_db};
    use parley_core::types::ConversationStatus;

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let (db, _dir) = setup_db().await;
        let conv = conversation("c1");
        create_conversation(&db, &conv).await.unwrap();

        let loaded = get_conversation(&db, "c1").await.unwrap().unwrap();
        assert_eq!(loaded.tenant_id, "tenant-1");
        assert_eq!(loaded.status, ConversationStatus::Open);
        assert!(loaded.tags.is_empty());
        assert!(get_conversation(&db, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_open_skips_resolved() {
        let (db, _dir) = setup_db().await;
        let mut resolved = conversation("old");
        resolved.status = ConversationStatus::Resolved;
        create_conversation(&db, &resolved).await.unwrap();

        let found = find_open_conversation(&db, "tenant-1", "channel-1", "contact-1")
            .await
            .unwrap();
        assert!(found.is_none());

        create_conversation(&db, &conversation("new")).await.unwrap();
        let found = find_open_conversation(&db, "tenant-1", "channel-1", "contact-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "new");
    }

    #[tokio::test]
    async fn open_conversation_returns_the_active_one() {
        let (db, _dir) = setup_db().await;
        let (first, created) = open_conversation(&db, &conversation("c1")).await.unwrap();
        assert!(created);
        assert_eq!(first.id, "c1");

        let (second, created) = open_conversation(&db, &conversation("c2")).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, "c1");
        assert!(get_conversation(&db, "c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_opens_share_one_conversation() {
        let (db, _dir) = setup_db().await;
        let conv_c1 = conversation("c1");
        let conv_c2 = conversation("c2");
        let (a, b) = tokio::join!(
            open_conversation(&db, &conv_c1),
            open_conversation(&db, &conv_c2)
        );
        let (a, a_created) = a.unwrap();
        let (b, b_created) = b.unwrap();
        assert_eq!(a.id, b.id);
        assert!(a_created ^ b_created);
    }

    #[tokio::test]
    async fn resolved_conversation_allows_a_new_one() {
        let (db, _dir) = setup_db().await;
        let mut resolved = conversation("old");
        resolved.status = ConversationStatus::Resolved;
        create_conversation(&db, &resolved).await.unwrap();

        let (opened, created) = open_conversation(&db, &conversation("new")).await.unwrap();
        assert!(created);
        assert_eq!(opened.id, "new");
    }

    #[tokio::test]
    async fn tags_are_deduplicated() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        add_tag(&db, "c1", "sales").await.unwrap();
        add_tag(&db, "c1", "sales").await.unwrap();
        add_tag(&db, "c1", "vip").await.unwrap();

        let loaded = get_conversation(&db, "c1").await.unwrap().unwrap();
        assert_eq!(loaded.tags, vec!["sales", "vip"]);
    }

    #[tokio::test]
    async fn assign_unknown_conversation_fails() {
        let (db, _dir) = setup_db().await;
        assert!(assign(&db, "ghost", "agent-1").await.is_err());

        create_conversation(&db, &conversation("c1")).await.unwrap();
        assign(&db, "c1", "agent-1").await.unwrap();
        let loaded = get_conversation(&db, "c1").await.unwrap().unwrap();
        assert_eq!(loaded.assigned_user_id.as_deref(), Some("agent-1"));
        assert!(!loaded.is_automated());
    }
}
