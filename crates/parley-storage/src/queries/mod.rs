// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the persisted entities, plus row decoding helpers.

pub mod contexts;
pub mod conversations;
pub mod definitions;
pub mod escalations;
pub mod markers;
pub mod messages;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;

pub(crate) use parley_core::types::format_timestamp as ts;

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

/// Decodes a TEXT column through `FromStr` (strum enums).
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

/// Decodes a JSON TEXT column.
pub(crate) fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parley_core::types::parse_timestamp(&raw)
        .ok_or_else(|| conversion_error(idx, format!("invalid timestamp `{raw}`")))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parley_core::types::parse_timestamp(&raw)
            .ok_or_else(|| conversion_error(idx, format!("invalid timestamp `{raw}`")))
    })
    .transpose()
}

/// Serializes a value for a JSON column, mapping failures into the storage error.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, parley_core::ParleyError> {
    serde_json::to_string(value).map_err(parley_core::ParleyError::storage)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use parley_core::types::{Conversation, ConversationStatus, Priority};
    use tempfile::TempDir;

    use crate::database::Database;

    pub async fn setup_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    pub fn conversation(id: &str) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            channel_id: "channel-1".to_string(),
            contact_id: "contact-1".to_string(),
            status: ConversationStatus::Open,
            priority: Priority::Normal,
            assigned_user_id: None,
            tags: vec![],
            escalated_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
