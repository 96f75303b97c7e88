// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Escalation records, written atomically with the conversation status.

use parley_core::escalation::EscalationRecord;
use parley_core::ParleyError;
use rusqlite::{params, OptionalExtension};

use super::{json_col, to_json, ts};
use crate::database::Database;

/// Marks the conversation escalated and stores the record in one transaction.
///
/// Returns false if a record for the same triggering message already exists.
pub async fn escalate(db: &Database, record: &EscalationRecord) -> Result<bool, ParleyError> {
    let encoded = to_json(record)?;
    let record = record.clone();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO escalations (id, conversation_id, message_id, reason,
                 priority, record, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.conversation_id,
                    record.message_id,
                    record.reason.to_string(),
                    record.priority.to_string(),
                    encoded,
                    ts(&record.created_at),
                ],
            )?;
            if inserted == 0 {
                tx.commit()?;
                return Ok(false);
            }
            let at = ts(&record.created_at);
            let updated = tx.execute(
                "UPDATE conversations SET status = 'escalated', escalated_at = ?1,
                 priority = ?2, updated_at = ?1
                 WHERE id = ?3",
                params![at, record.priority.to_string(), record.conversation_id],
            )?;
            if updated == 0 {
                // Rolled back on drop.
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn latest_for_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<Option<EscalationRecord>, ParleyError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<EscalationRecord>, rusqlite::Error> {
            conn.query_row(
                "SELECT record FROM escalations WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![conversation_id],
                |row| json_col(row, 0),
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::conversations::{create_conversation, get_conversation};
    use crate::queries::test_support::{conversation, setup_db};
    use chrono::Utc;
    use parley_core::escalation::EscalationReason;
    use parley_core::types::{ConversationStatus, Priority};

    fn record(id: &str, conversation_id: &str) -> EscalationRecord {
        EscalationRecord {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            message_id: "m1".to_string(),
            reason: EscalationReason::Sentiment,
            detail: Some("negative".into()),
            priority: EscalationReason::Sentiment.priority(),
            recent_messages: vec![],
            flow: None,
            ai_confidence: Some(0.9),
            detected_intent: None,
            detected_sentiment: Some("negative".into()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn escalation_updates_status_and_stores_record() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();

        assert!(escalate(&db, &record("e1", "c1")).await.unwrap());
        let conv = get_conversation(&db, "c1").await.unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Escalated);
        assert_eq!(conv.priority, Priority::High);
        assert!(conv.escalated_at.is_some());

        let stored = latest_for_conversation(&db, "c1").await.unwrap().unwrap();
        assert_eq!(stored.reason, EscalationReason::Sentiment);
        assert_eq!(stored.ai_confidence, Some(0.9));
    }

    #[tokio::test]
    async fn repeated_escalation_for_same_message_is_ignored() {
        let (db, _dir) = setup_db().await;
        create_conversation(&db, &conversation("c1")).await.unwrap();
        assert!(escalate(&db, &record("e1", "c1")).await.unwrap());
        assert!(!escalate(&db, &record("e2", "c1")).await.unwrap());
    }

    #[tokio::test]
    async fn escalation_of_missing_conversation_leaves_no_record() {
        let (db, _dir) = setup_db().await;
        // The foreign key rejects the insert before the status update runs.
        assert!(escalate(&db, &record("e1", "ghost")).await.is_err());
        assert!(latest_for_conversation(&db, "ghost").await.unwrap().is_none());
    }
}
