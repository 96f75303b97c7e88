// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialized conversation contexts.

use chrono::{DateTime, Utc};
use parley_core::traits::StoredContext;
use parley_core::ParleyError;
use rusqlite::{params, OptionalExtension};

use super::{ts, ts_col};
use crate::database::Database;

pub async fn load_context(
    db: &Database,
    conversation_id: &str,
) -> Result<Option<StoredContext>, ParleyError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<StoredContext>, rusqlite::Error> {
            conn.query_row(
                "SELECT conversation_id, data, updated_at FROM conversation_contexts
                 WHERE conversation_id = ?1",
                params![conversation_id],
                |row| {
                    Ok(StoredContext {
                        conversation_id: row.get(0)?,
                        data: row.get(1)?,
                        updated_at: ts_col(row, 2)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn save_context(db: &Database, conversation_id: &str, data: &str) -> Result<(), ParleyError> {
    let (conversation_id, data) = (conversation_id.to_string(), data.to_string());
    let now = ts(&Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO conversation_contexts (conversation_id, data, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                    data = excluded.data, updated_at = excluded.updated_at",
                params![conversation_id, data, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn delete_context(db: &Database, conversation_id: &str) -> Result<(), ParleyError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "DELETE FROM conversation_contexts WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn list_idle(db: &Database, before: DateTime<Utc>) -> Result<Vec<String>, ParleyError> {
    let before = ts(&before);
    db.connection()
        .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversation_contexts WHERE updated_at < ?1",
            )?;
            let rows = stmt.query_map(params![before], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::setup_db;
    use chrono::Duration;

    #[tokio::test]
    async fn save_load_delete() {
        let (db, _dir) = setup_db().await;
        assert!(load_context(&db, "c1").await.unwrap().is_none());

        save_context(&db, "c1", r#"{"v":1}"#).await.unwrap();
        save_context(&db, "c1", r#"{"v":2}"#).await.unwrap();
        let stored = load_context(&db, "c1").await.unwrap().unwrap();
        assert_eq!(stored.data, r#"{"v":2}"#);

        delete_context(&db, "c1").await.unwrap();
        assert!(load_context(&db, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_listing_uses_cutoff() {
        let (db, _dir) = setup_db().await;
        save_context(&db, "c1", "{}").await.unwrap();

        let past = list_idle(&db, Utc::now() - Duration::hours(1)).await.unwrap();
        assert!(past.is_empty());
        let future = list_idle(&db, Utc::now() + Duration::hours(1)).await.unwrap();
        assert_eq!(future, vec!["c1".to_string()]);
    }
}
