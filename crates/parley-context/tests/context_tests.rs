// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context store behavior over real SQLite storage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_config::model::{ContextConfig, StorageConfig};
use parley_context::ContextStore;
use parley_core::flow::FlowExecutionState;
use parley_core::types::{ContentType, Message, MessageStatus, SenderType};
use parley_core::StorageAdapter;
use parley_storage::SqliteStorage;
use tempfile::TempDir;

async fn storage() -> (TempDir, Arc<SqliteStorage>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ctx.db");
    let storage = SqliteStorage::new(StorageConfig {
        database_path: path.to_str().unwrap().to_string(),
        wal_mode: true,
    });
    storage.initialize().await.unwrap();
    (dir, Arc::new(storage))
}

fn config(window: usize) -> ContextConfig {
    ContextConfig {
        history_window: window,
        idle_ttl_secs: 3600,
        gc_interval_secs: 60,
    }
}

fn message(id: &str) -> Message {
    Message {
        id: id.into(),
        conversation_id: "conv-1".into(),
        sender_type: SenderType::Contact,
        sender_id: Some("contact-1".into()),
        content_type: ContentType::Text,
        content: format!("body of {id}"),
        metadata: BTreeMap::new(),
        attachments: vec![],
        status: MessageStatus::Received,
        external_id: None,
        error: None,
        created_at: Utc::now(),
        sent_at: None,
        delivered_at: None,
        read_at: None,
    }
}

#[tokio::test]
async fn get_creates_empty_context() {
    let (_dir, storage) = storage().await;
    let store = ContextStore::new(storage, &config(10));
    let ctx = store.get("conv-new").await.unwrap();
    assert_eq!(ctx.conversation_id, "conv-new");
    assert!(ctx.history.is_empty());
    assert!(ctx.flow.is_none());
}

#[tokio::test]
async fn context_survives_a_new_store() {
    let (_dir, storage) = storage().await;
    {
        let store = ContextStore::new(storage.clone(), &config(10));
        store.append_message("conv-1", message("m1")).await.unwrap();
        store
            .set_flow_state("conv-1", FlowExecutionState::new("f1", "node_2"))
            .await
            .unwrap();
        store
            .set_variable("conv-1", "order_id", serde_json::json!("A-17"))
            .await
            .unwrap();
    }

    let store = ContextStore::new(storage, &config(10));
    let ctx = store.get("conv-1").await.unwrap();
    assert_eq!(ctx.history.len(), 1);
    assert_eq!(ctx.flow.unwrap().current_node_id, "node_2");
    assert_eq!(
        store.get_variable("conv-1", "order_id").await.unwrap(),
        Some(serde_json::json!("A-17"))
    );
}

#[tokio::test]
async fn unsaved_guard_changes_are_discarded() {
    let (_dir, storage) = storage().await;
    let store = ContextStore::new(storage, &config(10));
    {
        let mut guard = store.lock("conv-1").await.unwrap();
        guard.append_message(message("m1"));
        guard.set_flow_state(FlowExecutionState::new("f1", "n1"));
    }
    let ctx = store.get("conv-1").await.unwrap();
    assert!(ctx.history.is_empty());
    assert!(ctx.flow.is_none());
}

#[tokio::test]
async fn concurrent_writers_never_lose_updates() {
    let (_dir, storage) = storage().await;
    let store = Arc::new(ContextStore::new(storage, &config(100)));

    let mut tasks = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut guard = store.lock("conv-1").await.unwrap();
            // Yield while holding the lock so writers would interleave without it.
            tokio::time::sleep(Duration::from_millis(1)).await;
            guard.append_message(message(&format!("m{i}")));
            let count = guard
                .variable("count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            guard.set_variable("count", serde_json::json!(count + 1));
            guard.save().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ctx = store.get("conv-1").await.unwrap();
    assert_eq!(ctx.history.len(), 20);
    assert_eq!(ctx.variables["count"], serde_json::json!(20));
}

#[tokio::test]
async fn history_window_is_enforced() {
    let (_dir, storage) = storage().await;
    let store = ContextStore::new(storage, &config(3));
    for i in 0..6 {
        store
            .append_message("conv-1", message(&format!("m{i}")))
            .await
            .unwrap();
    }
    assert!(!store.append_message("conv-1", message("m5")).await.unwrap());
    let ids: Vec<String> = store
        .get("conv-1")
        .await
        .unwrap()
        .history
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["m3", "m4", "m5"]);
}

#[tokio::test]
async fn gc_evicts_idle_contexts_but_not_locked_ones() {
    let (_dir, storage) = storage().await;
    let store = ContextStore::new(storage.clone(), &config(10));
    store.append_message("idle", message("m1")).await.unwrap();
    store.append_message("busy", message("m2")).await.unwrap();

    let guard = store.lock("busy").await.unwrap();
    let later = Utc::now() + chrono::Duration::hours(2);
    let evicted = store.collect_garbage(later).await.unwrap();
    assert_eq!(evicted, 1);
    assert!(storage.load_context("idle").await.unwrap().is_none());
    assert!(storage.load_context("busy").await.unwrap().is_some());
    drop(guard);

    assert_eq!(store.collect_garbage(later).await.unwrap(), 1);
    assert_eq!(store.cached(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gc_never_deletes_a_context_saved_after_its_cutoff() {
    let (_dir, storage) = storage().await;
    let config = ContextConfig {
        idle_ttl_secs: 0,
        ..config(100)
    };
    let store = Arc::new(ContextStore::new(storage.clone(), &config));

    for i in 0..20 {
        store
            .append_message("conv-1", message(&format!("seed{i}")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let now = Utc::now() - chrono::Duration::milliseconds(5);

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_message("conv-1", message(&format!("w{i}")))
                    .await
                    .unwrap()
            })
        };
        store.collect_garbage(now).await.unwrap();
        assert!(writer.await.unwrap());

        let stored = storage.load_context("conv-1").await.unwrap().unwrap();
        assert!(stored.data.contains(&format!("\"w{i}\"")));
    }
}
