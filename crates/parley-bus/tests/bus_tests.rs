// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery semantics of the durable bus: ack, nak, redelivery, dead
//! letters, per-key ordering and draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parley_bus::{Bus, ConsumerConfig, NakOutcome, PublishOptions, StreamConfig, handler_fn};
use parley_config::model::BusConfig;
use parley_core::ParleyError;
use parley_storage::Database;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const SUBJECT: &str = "parley.messages.inbound.sms";

async fn setup() -> (TempDir, Bus) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bus.db");
    let db = Database::open(path.to_str().unwrap()).await.unwrap();
    let bus = Bus::open(db).await.unwrap();
    bus.ensure_default_streams(&BusConfig::default()).await.unwrap();
    (dir, bus)
}

fn consumer(name: &str, max_deliver: u32, ack_wait: Duration) -> ConsumerConfig {
    ConsumerConfig {
        durable: name.into(),
        filter: "parley.messages.inbound.>".into(),
        max_deliver,
        ack_wait,
        workers: 4,
        fetch_batch: 10,
        fetch_wait: Duration::from_millis(20),
        nak_delay: Duration::from_millis(10),
    }
}

async fn publish(bus: &Bus, body: &str, key: Option<&str>) -> u64 {
    let mut opts = PublishOptions::default();
    if let Some(k) = key {
        opts = opts.partition_key(k);
    }
    bus.publish(SUBJECT, body.as_bytes().to_vec(), opts)
        .await
        .unwrap()
        .seq
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn fetch_then_ack_removes_delivery() {
    let (_dir, bus) = setup().await;
    let cfg = consumer("c-ack", 3, Duration::from_secs(30));
    bus.add_consumer(&cfg).await.unwrap();
    let seq = publish(&bus, "hello", None).await;

    let batch = bus.fetch("c-ack", 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].seq, seq);
    assert_eq!(batch[0].attempt, 1);
    assert_eq!(batch[0].payload, b"hello");

    // In flight: not handed out again before the ack wait.
    assert!(bus.fetch("c-ack", 10).await.unwrap().is_empty());

    assert!(bus.ack("c-ack", seq).await.unwrap());
    assert!(!bus.ack("c-ack", seq).await.unwrap());
    assert_eq!(bus.outstanding("c-ack").await.unwrap(), 0);
}

#[tokio::test]
async fn consumer_ignores_subjects_outside_filter() {
    let (_dir, bus) = setup().await;
    bus.add_consumer(&consumer("c-filter", 3, Duration::from_secs(30)))
        .await
        .unwrap();
    bus.publish(
        "parley.messages.outbound.sms",
        b"out".to_vec(),
        PublishOptions::default(),
    )
    .await
    .unwrap();
    publish(&bus, "in", None).await;

    let batch = bus.fetch("c-filter", 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].subject, SUBJECT);
}

#[tokio::test]
async fn nak_redelivers_after_delay() {
    let (_dir, bus) = setup().await;
    bus.add_consumer(&consumer("c-nak", 3, Duration::from_secs(30)))
        .await
        .unwrap();
    let seq = publish(&bus, "retry me", None).await;

    let first = bus.fetch("c-nak", 10).await.unwrap();
    assert_eq!(first.len(), 1);
    let outcome = bus
        .nak("c-nak", seq, "boom", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(outcome, NakOutcome::Redeliver(Duration::from_millis(50)));

    assert!(bus.fetch("c-nak", 10).await.unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(80)).await;

    let second = bus.fetch("c-nak", 10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].attempt, 2);
}

#[tokio::test]
async fn exhausted_attempts_are_dead_lettered() {
    let (_dir, bus) = setup().await;
    bus.add_consumer(&consumer("c-dead", 2, Duration::from_secs(30)))
        .await
        .unwrap();
    let seq = publish(&bus, "poison", None).await;

    bus.fetch("c-dead", 10).await.unwrap();
    bus.nak("c-dead", seq, "first", Duration::ZERO).await.unwrap();
    let again = bus.fetch("c-dead", 10).await.unwrap();
    assert!(again[0].is_last_attempt());
    let outcome = bus.nak("c-dead", seq, "second", Duration::ZERO).await.unwrap();
    assert_eq!(outcome, NakOutcome::Dead);

    assert!(bus.fetch("c-dead", 10).await.unwrap().is_empty());
    let dead = bus.dead_letters("c-dead").await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(dead[0].last_error.as_deref(), Some("second"));
}

#[tokio::test]
async fn unacked_delivery_returns_after_ack_wait() {
    let (_dir, bus) = setup().await;
    bus.add_consumer(&consumer("c-wait", 3, Duration::from_millis(40)))
        .await
        .unwrap();
    publish(&bus, "crashy", None).await;

    assert_eq!(bus.fetch("c-wait", 10).await.unwrap().len(), 1);
    tokio::time::sleep(Duration::from_millis(70)).await;

    let redelivered = bus.fetch("c-wait", 10).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].attempt, 2);
}

#[tokio::test]
async fn same_partition_key_is_head_of_line() {
    let (_dir, bus) = setup().await;
    bus.add_consumer(&consumer("c-order", 3, Duration::from_secs(30)))
        .await
        .unwrap();
    let a1 = publish(&bus, "a1", Some("conv-a")).await;
    let a2 = publish(&bus, "a2", Some("conv-a")).await;
    let b1 = publish(&bus, "b1", Some("conv-b")).await;

    let batch = bus.fetch("c-order", 10).await.unwrap();
    let seqs: Vec<u64> = batch.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, vec![a1, b1]);

    bus.ack("c-order", a1).await.unwrap();
    let next = bus.fetch("c-order", 10).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].seq, a2);
}

#[tokio::test]
async fn subscription_processes_keyed_messages_in_order() {
    let (_dir, bus) = setup().await;
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = handler_fn(move |delivery| {
        let sink = sink.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            sink.lock()
                .await
                .push(String::from_utf8_lossy(&delivery.payload).into_owned());
            Ok(())
        }
    });

    let shutdown = CancellationToken::new();
    let sub = bus
        .subscribe(consumer("c-sub", 3, Duration::from_secs(30)), handler, &shutdown)
        .await
        .unwrap();

    for i in 0..10 {
        publish(&bus, &format!("m{i}"), Some("conv-1")).await;
    }

    wait_until(|| {
        let seen = seen.clone();
        async move { seen.lock().await.len() == 10 }
    })
    .await;

    let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    assert_eq!(*seen.lock().await, expected);
    sub.drain(Duration::from_secs(1)).await;
    assert_eq!(bus.outstanding("c-sub").await.unwrap(), 0);
}

#[tokio::test]
async fn failing_handler_is_retried_until_success() {
    let (_dir, bus) = setup().await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler = handler_fn(move |delivery| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if delivery.attempt < 3 {
                Err(ParleyError::bus("transient"))
            } else {
                Ok(())
            }
        }
    });

    let shutdown = CancellationToken::new();
    let sub = bus
        .subscribe(consumer("c-retry", 5, Duration::from_secs(30)), handler, &shutdown)
        .await
        .unwrap();
    publish(&bus, "flaky", None).await;

    wait_until(|| {
        let bus = bus.clone();
        async move { bus.outstanding("c-retry").await.unwrap() == 0 }
    })
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(bus.dead_letters("c-retry").await.unwrap().is_empty());

    shutdown.cancel();
    sub.drain(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn drain_aborts_slow_handlers_and_leaves_delivery() {
    let (_dir, bus) = setup().await;
    let started_flag = Arc::new(AtomicU32::new(0));
    let flag = started_flag.clone();
    let handler = handler_fn(move |_delivery| {
        let flag = flag.clone();
        async move {
            flag.store(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    });
    let shutdown = CancellationToken::new();
    let sub = bus
        .subscribe(consumer("c-slow", 3, Duration::from_secs(30)), handler, &shutdown)
        .await
        .unwrap();
    publish(&bus, "slow", None).await;

    wait_until(|| {
        let flag = started_flag.clone();
        async move { flag.load(Ordering::SeqCst) == 1 }
    })
    .await;

    let started = std::time::Instant::now();
    sub.drain(Duration::from_millis(50)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(bus.outstanding("c-slow").await.unwrap(), 1);
}

#[tokio::test]
async fn purge_removes_expired_messages() {
    let (_dir, bus) = setup().await;
    bus.ensure_stream(StreamConfig {
        name: "SCRATCH".into(),
        subjects: vec!["scratch.>".into()],
        max_age: Duration::from_millis(1),
        max_msg_size: 1024,
        duplicate_window: Duration::from_secs(1),
    })
    .await
    .unwrap();
    bus.publish("scratch.a", b"x".to_vec(), PublishOptions::default())
        .await
        .unwrap();
    publish(&bus, "kept", None).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(bus.purge_expired().await.unwrap(), 1);
    assert_eq!(bus.stream_info("SCRATCH").await.unwrap().messages, 0);
    assert_eq!(
        bus.stream_info("PARLEY_MESSAGES").await.unwrap().messages,
        1
    );
}
