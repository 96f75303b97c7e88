// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Any order of delivery receipts leaves a message at the furthest status
//! reachable without moving backward.

use chrono::Utc;
use parley_core::envelope::StatusUpdate;
use parley_core::types::{MessageStatus, SenderType};
use parley_core::StorageAdapter;
use parley_pipeline::SendRequest;
use parley_test_utils::TestHarness;
use proptest::prelude::*;

fn receipt() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
        Just(MessageStatus::Failed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn receipts_apply_monotonically(receipts in prop::collection::vec(receipt(), 1..8)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (stored, expected) = runtime.block_on(async {
            let harness = TestHarness::new().await.unwrap();
            let inbound = harness.send_text("wa-1", "+5511", "hello").await.unwrap();
            let message = harness
                .pipeline
                .dispatcher()
                .send(SendRequest::text(&inbound.conversation_id, "hi", SenderType::User))
                .await
                .unwrap();

            let mut expected = MessageStatus::Pending;
            for status in &receipts {
                harness
                    .pipeline
                    .status()
                    .apply(&StatusUpdate {
                        message_id: message.id.clone(),
                        status: *status,
                        external_id: None,
                        error: None,
                        timestamp: Utc::now(),
                    })
                    .await
                    .unwrap();
                if expected.can_transition_to(*status) {
                    expected = *status;
                }
            }
            let stored = harness.storage.get_message(&message.id).await.unwrap().unwrap();
            (stored.status, expected)
        });
        prop_assert_eq!(stored, expected);
    }
}
