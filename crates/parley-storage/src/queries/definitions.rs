// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow, bot and channel definitions.
//!
//! Definitions are stored as JSON documents next to the columns the router
//! filters on. They are upserted by the management layer (or tests) and only
//! read by the routing core.

use chrono::Utc;
use parley_core::bot::Bot;
use parley_core::flow::Flow;
use parley_core::types::ChannelConfig;
use parley_core::ParleyError;
use rusqlite::{params, OptionalExtension};

use super::{json_col, parse_col, to_json, ts};
use crate::database::Database;

pub async fn upsert_flow(db: &Database, flow: &Flow) -> Result<(), ParleyError> {
    let definition = to_json(flow)?;
    let flow = flow.clone();
    let now = ts(&Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO flows (id, tenant_id, bot_id, name, trigger_type, priority,
                 is_active, definition, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    bot_id = excluded.bot_id,
                    name = excluded.name,
                    trigger_type = excluded.trigger_type,
                    priority = excluded.priority,
                    is_active = excluded.is_active,
                    definition = excluded.definition,
                    updated_at = excluded.updated_at",
                params![
                    flow.id,
                    flow.tenant_id,
                    flow.bot_id,
                    flow.name,
                    flow.trigger.to_string(),
                    flow.priority,
                    flow.is_active,
                    definition,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_flow(db: &Database, id: &str) -> Result<Option<Flow>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Flow>, rusqlite::Error> {
            conn.query_row(
                "SELECT definition FROM flows WHERE id = ?1",
                params![id],
                |row| json_col(row, 0),
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Active flows of a tenant, highest priority first, then insertion order.
pub async fn list_active_flows(db: &Database, tenant_id: &str) -> Result<Vec<Flow>, ParleyError> {
    let tenant_id = tenant_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<Flow>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT definition FROM flows
                 WHERE tenant_id = ?1 AND is_active = 1
                 ORDER BY priority DESC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![tenant_id], |row| json_col(row, 0))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn upsert_bot(db: &Database, bot: &Bot) -> Result<(), ParleyError> {
    let config = to_json(&bot.config)?;
    let bot = bot.clone();
    let now = ts(&Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO bots (id, tenant_id, name, status, config, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    name = excluded.name,
                    status = excluded.status,
                    config = excluded.config,
                    updated_at = excluded.updated_at",
                params![bot.id, bot.tenant_id, bot.name, bot.status.to_string(), config, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

fn row_to_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    Ok(Bot {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        status: parse_col(row, 3)?,
        config: json_col(row, 4)?,
    })
}

pub async fn get_bot(db: &Database, id: &str) -> Result<Option<Bot>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Bot>, rusqlite::Error> {
            conn.query_row(
                "SELECT id, tenant_id, name, status, config FROM bots WHERE id = ?1",
                params![id],
                row_to_bot,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_bot_for_channel(
    db: &Database,
    channel_id: &str,
) -> Result<Option<Bot>, ParleyError> {
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Bot>, rusqlite::Error> {
            conn.query_row(
                "SELECT b.id, b.tenant_id, b.name, b.status, b.config
                 FROM bots b JOIN bot_channels bc ON bc.bot_id = b.id
                 WHERE bc.channel_id = ?1",
                params![channel_id],
                row_to_bot,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Binds a bot to a channel, replacing any previous binding.
pub async fn bind_bot_channel(
    db: &Database,
    bot_id: &str,
    channel_id: &str,
) -> Result<(), ParleyError> {
    let (bot_id, channel_id) = (bot_id.to_string(), channel_id.to_string());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO bot_channels (channel_id, bot_id) VALUES (?1, ?2)
                 ON CONFLICT(channel_id) DO UPDATE SET bot_id = excluded.bot_id",
                params![channel_id, bot_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn upsert_channel(db: &Database, channel: &ChannelConfig) -> Result<(), ParleyError> {
    let channel = channel.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO channels (id, tenant_id, channel_type, name, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    channel_type = excluded.channel_type,
                    name = excluded.name,
                    enabled = excluded.enabled",
                params![
                    channel.id,
                    channel.tenant_id,
                    channel.channel_type,
                    channel.name,
                    channel.enabled
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_channel(db: &Database, id: &str) -> Result<Option<ChannelConfig>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ChannelConfig>, rusqlite::Error> {
            conn.query_row(
                "SELECT id, tenant_id, channel_type, name, enabled FROM channels WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ChannelConfig {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        channel_type: row.get(2)?,
                        name: row.get(3)?,
                        enabled: row.get(4)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
