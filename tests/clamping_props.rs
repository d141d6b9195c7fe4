//! Property tests for the `[0, 1]` bounds on strengths and weights and the
//! backoff schedule

use chrono::Utc;
use hippocampus::scheduler::backoff_delay;
use hippocampus::types::clamp_unit;
use hippocampus::{
    Connection, ConnectionType, Feedback, MemoryConfig, MemoryEngine, MemoryId, MemoryKind,
    NewMemory,
};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn clamp_unit_stays_in_range(value in proptest::num::f64::ANY) {
        let clamped = clamp_unit(value);
        prop_assert!((0.0..=1.0).contains(&clamped));
    }

    #[test]
    fn connection_weight_stays_in_range(initial in -10.0f64..10.0, updates in proptest::collection::vec(-10.0f64..10.0, 0..16)) {
        let mut connection = Connection::new(MemoryId::new(), ConnectionType::Associative, initial, Utc::now());
        prop_assert!((0.0..=1.0).contains(&connection.weight));
        for update in updates {
            connection.set_weight(connection.weight + update);
            prop_assert!((0.0..=1.0).contains(&connection.weight));
        }
    }

    #[test]
    fn feedback_and_retrieval_keep_strength_in_range(
        initial in -1.0f64..2.0,
        signals in proptest::collection::vec(0u8..3, 1..40),
    ) {
        let rt = runtime();
        let strengths = rt.block_on(async {
            let engine = MemoryEngine::new(MemoryConfig {
                feedback_rate: 0.35,
                ..Default::default()
            });
            let id = engine
                .store(NewMemory::new(MemoryKind::Working, json!("scratch")).with_strength(initial))
                .await;

            let mut strengths = Vec::new();
            for signal in signals {
                match signal {
                    0 => { engine.apply_feedback(id, Feedback::Positive).await; }
                    1 => { engine.apply_feedback(id, Feedback::Negative).await; }
                    _ => { engine.retrieve(id).await; }
                }
                strengths.push(engine.peek(id).await.map_or(-1.0, |r| r.strength));
            }
            strengths
        });

        for strength in strengths {
            prop_assert!((0.0..=1.0).contains(&strength));
        }
    }

    #[test]
    fn backoff_is_monotonic_and_capped(interval_ms in 1u64..10_000, cap in 1u32..64, failures in 0u32..80) {
        let interval = Duration::from_millis(interval_ms);
        let delay = backoff_delay(interval, failures, cap);
        let next = backoff_delay(interval, failures + 1, cap);

        prop_assert!(delay >= interval);
        prop_assert!(next >= delay);
        prop_assert!(delay <= interval * cap);
    }
}
