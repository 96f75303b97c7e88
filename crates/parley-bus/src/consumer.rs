// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable consumer state: registration, fetch, ack and nak.
//!
//! A consumer tracks the last stream sequence it has seen. Each fetch turns
//! newly matching messages into `pending` delivery rows, then claims ready
//! rows by marking them `inflight` with an ack deadline. Acked rows are
//! deleted; rows that exhaust `max_deliver` move to `dead`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::warn;

use parley_config::model::BusConfig;
use parley_core::ParleyError;
use parley_storage::Database;

use crate::{map_bus_err, now_ms};

/// Upper bound on stream messages scanned per fetch.
const SCAN_LIMIT: i64 = 1000;

/// Durable consumer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Durable name; state survives restarts under this name.
    pub durable: String,
    /// Subject filter, may carry wildcards.
    pub filter: String,
    pub max_deliver: u32,
    /// An unacked delivery becomes eligible again after this long.
    pub ack_wait: Duration,
    pub workers: usize,
    pub fetch_batch: usize,
    /// Idle wait between empty fetches.
    pub fetch_wait: Duration,
    /// Redelivery delay after a handler error, multiplied by the attempt number.
    pub nak_delay: Duration,
}

impl ConsumerConfig {
    /// Consumer with the fetch and worker tuning taken from `[bus]`.
    pub fn new(
        durable: impl Into<String>,
        filter: impl Into<String>,
        max_deliver: u32,
        ack_wait: Duration,
        bus: &BusConfig,
    ) -> Self {
        Self {
            durable: durable.into(),
            filter: filter.into(),
            max_deliver,
            ack_wait,
            workers: bus.workers,
            fetch_batch: bus.fetch_batch,
            fetch_wait: Duration::from_millis(bus.fetch_wait_ms),
            nak_delay: Duration::from_millis(bus.nak_delay_ms),
        }
    }
}

/// One claimed message handed to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub seq: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery.
    pub attempt: u32,
    pub max_deliver: u32,
    pub msg_id: Option<String>,
    pub partition_key: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl Delivery {
    /// No further redelivery follows a failure on this attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_deliver
    }

    /// Decodes the JSON payload.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ParleyError> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            ParleyError::InvalidPayload(format!("seq {} on {}: {e}", self.seq, self.subject))
        })
    }
}

/// Result of a negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakOutcome {
    /// Scheduled for redelivery after the given delay.
    Redeliver(Duration),
    /// Attempts exhausted; moved to the dead-letter state.
    Dead,
    /// The delivery no longer exists (acked or purged).
    Gone,
}

/// A dead-lettered delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub seq: u64,
    pub subject: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub(crate) async fn register(
    db: &Database,
    stream: &str,
    config: &ConsumerConfig,
) -> Result<(), ParleyError> {
    let name = config.durable.clone();
    let stream = stream.to_string();
    let filter = config.filter.clone();
    let max_deliver = i64::from(config.max_deliver);
    let ack_wait_ms = config.ack_wait.as_millis() as i64;
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO bus_consumers (name, stream, filter, last_seq, max_deliver, ack_wait_ms, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    stream = excluded.stream,
                    filter = excluded.filter,
                    max_deliver = excluded.max_deliver,
                    ack_wait_ms = excluded.ack_wait_ms",
                params![name, stream, filter, max_deliver, ack_wait_ms, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_bus_err)
}

/// Claims up to `limit` ready deliveries for `consumer`.
///
/// A delivery is skipped while an earlier delivery with the same partition
/// key is still pending or in flight.
pub(crate) async fn fetch(
    db: &Database,
    consumer: &str,
    limit: usize,
) -> Result<Vec<Delivery>, ParleyError> {
    let consumer = consumer.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| -> Result<Vec<Delivery>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = now_ms();

            let Some((stream, filter, last_seq, max_deliver, ack_wait_ms)) = tx
                .query_row(
                    "SELECT stream, filter, last_seq, max_deliver, ack_wait_ms
                     FROM bus_consumers WHERE name = ?1",
                    params![consumer],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()?
            else {
                return Ok(Vec::new());
            };

            // Materialize deliveries for messages published since the last fetch.
            let fresh: Vec<(i64, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT seq, subject FROM bus_messages
                     WHERE stream = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![stream, last_seq, SCAN_LIMIT], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };
            if let Some((max_seq, _)) = fresh.last() {
                for (seq, subject) in &fresh {
                    if crate::subject::matches(&filter, subject) {
                        tx.execute(
                            "INSERT OR IGNORE INTO bus_deliveries (consumer, seq, attempts, state, available_at)
                             VALUES (?1, ?2, 0, 'pending', ?3)",
                            params![consumer, seq, now],
                        )?;
                    }
                }
                tx.execute(
                    "UPDATE bus_consumers SET last_seq = ?2 WHERE name = ?1",
                    params![consumer, max_seq],
                )?;
            }

            let ready: Vec<(Delivery, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT d.seq, d.attempts, m.subject, m.payload, m.msg_id, m.partition_key, m.created_at
                     FROM bus_deliveries d
                     JOIN bus_messages m ON m.seq = d.seq
                     WHERE d.consumer = ?1
                       AND ((d.state = 'pending' AND d.available_at <= ?2)
                            OR (d.state = 'inflight' AND d.deadline <= ?2))
                       AND NOT EXISTS (
                            SELECT 1 FROM bus_deliveries p
                            JOIN bus_messages pm ON pm.seq = p.seq
                            WHERE p.consumer = d.consumer
                              AND p.seq < d.seq
                              AND p.state IN ('pending', 'inflight')
                              AND m.partition_key IS NOT NULL
                              AND pm.partition_key = m.partition_key)
                     ORDER BY d.seq
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![consumer, now, limit], |row| {
                    let attempts: i64 = row.get(1)?;
                    let created_at: i64 = row.get(6)?;
                    Ok((
                        Delivery {
                            seq: row.get::<_, i64>(0)? as u64,
                            subject: row.get(2)?,
                            payload: row.get(3)?,
                            attempt: 0,
                            max_deliver: max_deliver as u32,
                            msg_id: row.get(4)?,
                            partition_key: row.get(5)?,
                            published_at: DateTime::from_timestamp_millis(created_at)
                                .unwrap_or_default(),
                        },
                        attempts,
                    ))
                })?;
                rows.collect::<Result<_, _>>()?
            };

            let mut claimed = Vec::with_capacity(ready.len());
            for (mut delivery, attempts) in ready {
                let seq = delivery.seq as i64;
                if attempts >= max_deliver {
                    // Last attempt timed out without an ack.
                    tx.execute(
                        "UPDATE bus_deliveries
                         SET state = 'dead', deadline = NULL,
                             last_error = COALESCE(last_error, 'ack wait exceeded')
                         WHERE consumer = ?1 AND seq = ?2",
                        params![consumer, seq],
                    )?;
                    warn!(
                        consumer = consumer.as_str(),
                        seq,
                        subject = delivery.subject.as_str(),
                        attempts,
                        "delivery dead-lettered after ack wait"
                    );
                    continue;
                }
                tx.execute(
                    "UPDATE bus_deliveries
                     SET state = 'inflight', attempts = attempts + 1, deadline = ?3
                     WHERE consumer = ?1 AND seq = ?2",
                    params![consumer, seq, now + ack_wait_ms],
                )?;
                delivery.attempt = (attempts + 1) as u32;
                claimed.push(delivery);
            }

            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_bus_err)
}

/// Deletes an in-flight delivery. Returns false if it was no longer in flight.
pub(crate) async fn ack(db: &Database, consumer: &str, seq: u64) -> Result<bool, ParleyError> {
    let consumer = consumer.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let n = conn.execute(
                "DELETE FROM bus_deliveries
                 WHERE consumer = ?1 AND seq = ?2 AND state = 'inflight'",
                params![consumer, seq as i64],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(map_bus_err)
}

pub(crate) async fn nak(
    db: &Database,
    consumer: &str,
    seq: u64,
    error: &str,
    delay: Duration,
) -> Result<NakOutcome, ParleyError> {
    let consumer = consumer.to_string();
    let error = error.to_string();
    db.connection()
        .call(move |conn| -> Result<NakOutcome, rusqlite::Error> {
            let tx = conn.transaction()?;
            let row: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT d.attempts, c.max_deliver
                     FROM bus_deliveries d JOIN bus_consumers c ON c.name = d.consumer
                     WHERE d.consumer = ?1 AND d.seq = ?2 AND d.state = 'inflight'",
                    params![consumer, seq as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((attempts, max_deliver)) = row else {
                return Ok(NakOutcome::Gone);
            };

            let outcome = if attempts >= max_deliver {
                tx.execute(
                    "UPDATE bus_deliveries SET state = 'dead', deadline = NULL, last_error = ?3
                     WHERE consumer = ?1 AND seq = ?2",
                    params![consumer, seq as i64, error],
                )?;
                NakOutcome::Dead
            } else {
                let backoff = delay.saturating_mul(attempts.max(1) as u32);
                tx.execute(
                    "UPDATE bus_deliveries
                     SET state = 'pending', deadline = NULL, available_at = ?3, last_error = ?4
                     WHERE consumer = ?1 AND seq = ?2",
                    params![
                        consumer,
                        seq as i64,
                        now_ms() + backoff.as_millis() as i64,
                        error
                    ],
                )?;
                NakOutcome::Redeliver(backoff)
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_bus_err)
}

/// Returns a claimed delivery to `pending` without counting the attempt.
pub(crate) async fn release(db: &Database, consumer: &str, seq: u64) -> Result<(), ParleyError> {
    let consumer = consumer.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE bus_deliveries
                 SET state = 'pending', deadline = NULL,
                     attempts = MAX(attempts - 1, 0), available_at = ?3
                 WHERE consumer = ?1 AND seq = ?2 AND state = 'inflight'",
                params![consumer, seq as i64, now_ms()],
            )?;
            Ok(())
        })
        .await
        .map_err(map_bus_err)
}

pub(crate) async fn dead_letters(
    db: &Database,
    consumer: &str,
) -> Result<Vec<DeadLetter>, ParleyError> {
    let consumer = consumer.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<DeadLetter>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT d.seq, m.subject, d.attempts, d.last_error
                 FROM bus_deliveries d JOIN bus_messages m ON m.seq = d.seq
                 WHERE d.consumer = ?1 AND d.state = 'dead'
                 ORDER BY d.seq",
            )?;
            let rows = stmt.query_map(params![consumer], |row| {
                Ok(DeadLetter {
                    seq: row.get::<_, i64>(0)? as u64,
                    subject: row.get(1)?,
                    attempts: row.get::<_, i64>(2)? as u32,
                    last_error: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_bus_err)
}

/// Deliveries not yet acked or dead-lettered, including messages the
/// consumer has not fetched yet.
pub(crate) async fn outstanding(db: &Database, consumer: &str) -> Result<u64, ParleyError> {
    let consumer = consumer.to_string();
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let Some((stream, filter, last_seq)) = conn
                .query_row(
                    "SELECT stream, filter, last_seq FROM bus_consumers WHERE name = ?1",
                    params![consumer],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?
            else {
                return Ok(0);
            };
            let open: i64 = conn.query_row(
                "SELECT COUNT(*) FROM bus_deliveries
                 WHERE consumer = ?1 AND state IN ('pending', 'inflight')",
                params![consumer],
                |row| row.get(0),
            )?;
            let mut stmt =
                conn.prepare("SELECT subject FROM bus_messages WHERE stream = ?1 AND seq > ?2")?;
            let unseen = stmt
                .query_map(params![stream, last_seq], |row| row.get::<_, String>(0))?
                .filter_map(Result::ok)
                .filter(|subject| crate::subject::matches(&filter, subject))
                .count();
            Ok(open as u64 + unseen as u64)
        })
        .await
        .map_err(map_bus_err)
}
