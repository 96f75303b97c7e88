// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Idempotency markers: a processed-event set with TTL.
//!
//! A marker is keyed by `(scope, key)`, typically a pipeline stage and a
//! message id. Its value holds whatever the stage needs to replay its result.

use chrono::{DateTime, Utc};
use parley_core::ParleyError;
use rusqlite::{params, OptionalExtension};

use super::ts;
use crate::database::Database;

/// Returns the marker value if present and not expired.
pub async fn get_marker(db: &Database, scope: &str, key: &str) -> Result<Option<String>, ParleyError> {
    let (scope, key) = (scope.to_string(), key.to_string());
    let now = Utc::now().timestamp_millis();
    db.connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                "SELECT value FROM idempotency_markers
                 WHERE scope = ?1 AND key = ?2 AND expires_at > ?3",
                params![scope, key, now],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Inserts a marker unless a live one exists. Returns true if inserted.
pub async fn put_marker(
    db: &Database,
    scope: &str,
    key: &str,
    value: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, ParleyError> {
    let (scope, key, value) = (scope.to_string(), key.to_string(), value.to_string());
    let now = Utc::now();
    let created_at = ts(&now);
    let now_ms = now.timestamp_millis();
    let expires_ms = expires_at.timestamp_millis();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            // An expired marker no longer blocks the key.
            tx.execute(
                "DELETE FROM idempotency_markers WHERE scope = ?1 AND key = ?2 AND expires_at <= ?3",
                params![scope, key, now_ms],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO idempotency_markers (scope, key, value, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![scope, key, value, created_at, expires_ms],
            )?;
            tx.commit()?;
            Ok(inserted == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn purge_expired(db: &Database, now: DateTime<Utc>) -> Result<u64, ParleyError> {
    let now_ms = now.timestamp_millis();
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let removed = conn.execute(
                "DELETE FROM idempotency_markers WHERE expires_at <= ?1",
                params![now_ms],
            )?;
            Ok(removed as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
