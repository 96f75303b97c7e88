// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use parley_config::model::StorageConfig;
use parley_core::bot::Bot;
use parley_core::envelope::StatusUpdate;
use parley_core::escalation::EscalationRecord;
use parley_core::flow::Flow;
use parley_core::traits::{StatusChange, StoredContext};
use parley_core::types::{ChannelConfig, Conversation, Message};
use parley_core::{AdapterType, HealthStatus, ParleyError, PluginAdapter, StorageAdapter};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// The database is opened by [`StorageAdapter::initialize`]; every other
/// call fails until then.
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage. The database is not opened yet.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Wraps an already opened database.
    pub fn with_database(config: StorageConfig, db: Database) -> Self {
        Self {
            config,
            db: OnceCell::new_with(Some(db)),
        }
    }

    /// Shared handle to the database, for components that keep their own
    /// tables in it (the bus).
    pub fn database(&self) -> Result<Database, ParleyError> {
        self.db().cloned()
    }

    fn db(&self) -> Result<&Database, ParleyError> {
        self.db.get().ok_or_else(|| ParleyError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        self.db()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), ParleyError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| ParleyError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), ParleyError> {
        self.db()?.checkpoint().await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    // --- Conversations ---

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), ParleyError> {
        queries::conversations::create_conversation(self.db()?, conversation).await
    }

    async fn open_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(Conversation, bool), ParleyError> {
        queries::conversations::open_conversation(self.db()?, conversation).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, ParleyError> {
        queries::conversations::get_conversation(self.db()?, id).await
    }

    async fn find_open_conversation(
        &self,
        tenant_id: &str,
        channel_id: &str,
        contact_id: &str,
    ) -> Result<Option<Conversation>, ParleyError> {
        queries::conversations::find_open_conversation(self.db()?, tenant_id, channel_id, contact_id)
            .await
    }

    async fn add_conversation_tag(&self, id: &str, tag: &str) -> Result<(), ParleyError> {
        queries::conversations::add_tag(self.db()?, id, tag).await
    }

    async fn assign_conversation(&self, id: &str, user_id: &str) -> Result<(), ParleyError> {
        queries::conversations::assign(self.db()?, id, user_id).await
    }

    async fn escalate_conversation(&self, record: &EscalationRecord) -> Result<bool, ParleyError> {
        queries::escalations::escalate(self.db()?, record).await
    }

    async fn get_escalation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<EscalationRecord>, ParleyError> {
        queries::escalations::latest_for_conversation(self.db()?, conversation_id).await
    }

    // --- Messages ---

    async fn insert_message(&self, message: &Message) -> Result<(), ParleyError> {
        queries::messages::insert_message(self.db()?, message).await
    }

    async fn insert_inbound_message(&self, message: &Message) -> Result<(Message, bool), ParleyError> {
        queries::messages::insert_inbound(self.db()?, message).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, ParleyError> {
        queries::messages::get_message(self.db()?, id).await
    }

    async fn find_message_by_external_id(
        &self,
        channel_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, ParleyError> {
        queries::messages::find_by_external_id(self.db()?, channel_id, external_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ParleyError> {
        queries::messages::list_messages(self.db()?, conversation_id, limit).await
    }

    async fn update_message_status(
        &self,
        update: &StatusUpdate,
    ) -> Result<StatusChange, ParleyError> {
        queries::messages::update_status(self.db()?, update).await
    }

    // --- Definitions ---

    async fn upsert_flow(&self, flow: &Flow) -> Result<(), ParleyError> {
        queries::definitions::upsert_flow(self.db()?, flow).await
    }

    async fn get_flow(&self, id: &str) -> Result<Option<Flow>, ParleyError> {
        queries::definitions::get_flow(self.db()?, id).await
    }

    async fn list_active_flows(&self, tenant_id: &str) -> Result<Vec<Flow>, ParleyError> {
        queries::definitions::list_active_flows(self.db()?, tenant_id).await
    }

    async fn upsert_bot(&self, bot: &Bot) -> Result<(), ParleyError> {
        queries::definitions::upsert_bot(self.db()?, bot).await
    }

    async fn get_bot(&self, id: &str) -> Result<Option<Bot>, ParleyError> {
        queries::definitions::get_bot(self.db()?, id).await
    }

    async fn get_bot_for_channel(&self, channel_id: &str) -> Result<Option<Bot>, ParleyError> {
        queries::definitions::get_bot_for_channel(self.db()?, channel_id).await
    }

    async fn bind_bot_channel(&self, bot_id: &str, channel_id: &str) -> Result<(), ParleyError> {
        queries::definitions::bind_bot_channel(self.db()?, bot_id, channel_id).await
    }

    async fn upsert_channel(&self, channel: &ChannelConfig) -> Result<(), ParleyError> {
        queries::definitions::upsert_channel(self.db()?, channel).await
    }

    async fn get_channel(&self, id: &str) -> Result<Option<ChannelConfig>, ParleyError> {
        queries::definitions::get_channel(self.db()?, id).await
    }

    // --- Contexts ---

    async fn load_context(
        &self,
        conversation_id: &str,
    ) -> Result<Option<StoredContext>, ParleyError> {
        queries::contexts::load_context(self.db()?, conversation_id).await
    }

    async fn save_context(&self, conversation_id: &str, data: &str) -> Result<(), ParleyError> {
        queries::contexts::save_context(self.db()?, conversation_id, data).await
    }

    async fn delete_context(&self, conversation_id: &str) -> Result<(), ParleyError> {
        queries::contexts::delete_context(self.db()?, conversation_id).await
    }

    async fn list_idle_contexts(&self, before: DateTime<Utc>) -> Result<Vec<String>, ParleyError> {
        queries::contexts::list_idle(self.db()?, before).await
    }

    // --- Markers ---

    async fn get_marker(&self, scope: &str, key: &str) -> Result<Option<String>, ParleyError> {
        queries::markers::get_marker(self.db()?, scope, key).await
    }

    async fn put_marker(
        &self,
        scope: &str,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ParleyError> {
        queries::markers::put_marker(self.db()?, scope, key, value, expires_at).await
    }

    async fn purge_markers(&self, now: DateTime<Utc>) -> Result<u64, ParleyError> {
        queries::markers::purge_expired(self.db()?, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_identity() {
        let storage = SqliteStorage::new(make_config("unused.db"));
        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn operations_fail_before_initialize() {
        let storage = SqliteStorage::new(make_config("never-opened.db"));
        assert!(storage.health_check().await.is_err());
        assert!(storage.get_conversation("c1").await.is_err());
        assert!(storage.database().is_err());
    }

    #[tokio::test]
    async fn health_and_shutdown_after_initialize() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();

        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        storage.close().await.unwrap();
        storage.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shared_database_sees_same_rows() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("shared.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let storage =
            SqliteStorage::with_database(make_config(db_path.to_str().unwrap()), db.clone());

        storage
            .put_marker("inbound", "m1", "done", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        let value = queries::markers::get_marker(&db, "inbound", "m1").await.unwrap();
        assert_eq!(value.as_deref(), Some("done"));
    }
}
