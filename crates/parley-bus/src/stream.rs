// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stream provisioning, publishing and retention.

use std::time::Duration;

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use parley_core::ParleyError;
use parley_storage::Database;

use crate::{map_bus_err, now_ms};

/// Durable log configuration. A stream stores every message published on
/// a subject matched by one of its `subjects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub max_msg_size: usize,
    /// Window during which a repeated message id is not stored again.
    pub duplicate_window: Duration,
}

impl StreamConfig {
    pub(crate) fn covers_subject(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|pattern| crate::subject::matches(pattern, subject))
    }
}

/// Options attached to one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Deduplication id. A repeat within the duplicate window is discarded.
    pub msg_id: Option<String>,
    /// Deliveries sharing a key are handled one at a time, in order.
    pub partition_key: Option<String>,
}

impl PublishOptions {
    pub fn msg_id(mut self, id: impl Into<String>) -> Self {
        self.msg_id = Some(id.into());
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }
}

/// Acknowledgement of a stored (or deduplicated) publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub seq: u64,
    /// The message id was already stored; `seq` is the original sequence.
    pub duplicate: bool,
}

/// Point-in-time stream statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub messages: u64,
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
}

pub(crate) async fn upsert_stream(db: &Database, config: &StreamConfig) -> Result<(), ParleyError> {
    let subjects = serde_json::to_string(&config.subjects).map_err(|e| ParleyError::Bus {
        message: "failed to encode stream subjects".into(),
        source: Some(Box::new(e)),
    })?;
    let name = config.name.clone();
    let max_age_ms = config.max_age.as_millis() as i64;
    let max_msg_size = config.max_msg_size as i64;
    let dup_ms = config.duplicate_window.as_millis() as i64;
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO bus_streams (name, subjects, max_age_ms, max_msg_size, duplicate_window_ms, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    subjects = excluded.subjects,
                    max_age_ms = excluded.max_age_ms,
                    max_msg_size = excluded.max_msg_size,
                    duplicate_window_ms = excluded.duplicate_window_ms,
                    updated_at = excluded.updated_at",
                params![name, subjects, max_age_ms, max_msg_size, dup_ms, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_bus_err)
}

pub(crate) async fn load_streams(db: &Database) -> Result<Vec<StreamConfig>, ParleyError> {
    let rows = db
        .connection()
        .call(|conn| -> Result<Vec<(String, String, i64, i64, i64)>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT name, subjects, max_age_ms, max_msg_size, duplicate_window_ms
                 FROM bus_streams ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;
            rows.collect()
        })
        .await
        .map_err(map_bus_err)?;

    rows.into_iter()
        .map(|(name, subjects, max_age_ms, max_msg_size, dup_ms)| {
            let subjects: Vec<String> =
                serde_json::from_str(&subjects).map_err(|e| ParleyError::Bus {
                    message: format!("corrupt subjects for stream {name}"),
                    source: Some(Box::new(e)),
                })?;
            Ok(StreamConfig {
                name,
                subjects,
                max_age: Duration::from_millis(max_age_ms.max(0) as u64),
                max_msg_size: max_msg_size.max(0) as usize,
                duplicate_window: Duration::from_millis(dup_ms.max(0) as u64),
            })
        })
        .collect()
}

pub(crate) async fn append(
    db: &Database,
    stream: &StreamConfig,
    subject: &str,
    payload: Vec<u8>,
    options: PublishOptions,
) -> Result<PublishAck, ParleyError> {
    let stream_name = stream.name.clone();
    let subject = subject.to_string();
    let window_ms = stream.duplicate_window.as_millis() as i64;

    let (seq, duplicate) = db
        .connection()
        .call(move |conn| -> Result<(i64, bool), rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = now_ms();

            if let Some(msg_id) = options.msg_id.as_deref() {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT seq FROM bus_messages
                         WHERE stream = ?1 AND msg_id = ?2 AND created_at >= ?3
                         ORDER BY seq DESC LIMIT 1",
                        params![stream_name, msg_id, now - window_ms],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(seq) = existing {
                    return Ok((seq, true));
                }
            }

            tx.execute(
                "INSERT INTO bus_messages (stream, subject, payload, msg_id, partition_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    stream_name,
                    subject,
                    payload,
                    options.msg_id,
                    options.partition_key,
                    now
                ],
            )?;
            let seq = tx.last_insert_rowid();
            tx.commit()?;
            Ok((seq, false))
        })
        .await
        .map_err(map_bus_err)?;

    Ok(PublishAck {
        stream: stream.name.clone(),
        seq: seq as u64,
        duplicate,
    })
}

/// Deletes messages older than their stream's max age, plus any delivery
/// rows left pointing at them. Returns the number of messages removed.
pub(crate) async fn purge_expired(db: &Database, now: i64) -> Result<u64, ParleyError> {
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM bus_messages
                 WHERE created_at < ?1 - (SELECT s.max_age_ms FROM bus_streams s
                                          WHERE s.name = bus_messages.stream)",
                params![now],
            )?;
            tx.execute(
                "DELETE FROM bus_deliveries
                 WHERE NOT EXISTS (SELECT 1 FROM bus_messages m WHERE m.seq = bus_deliveries.seq)",
                [],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })
        .await
        .map_err(map_bus_err)
}

pub(crate) async fn info(db: &Database, name: &str) -> Result<StreamInfo, ParleyError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| -> Result<StreamInfo, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*), MIN(seq), MAX(seq) FROM bus_messages WHERE stream = ?1",
                params![name],
                |row| {
                    let count: i64 = row.get(0)?;
                    let first: Option<i64> = row.get(1)?;
                    let last: Option<i64> = row.get(2)?;
                    Ok(StreamInfo {
                        name: name.clone(),
                        messages: count as u64,
                        first_seq: first.map(|s| s as u64),
                        last_seq: last.map(|s| s as u64),
                    })
                },
            )
        })
        .await
        .map_err(map_bus_err)
}
