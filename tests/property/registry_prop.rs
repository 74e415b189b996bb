use alarm_registry::{AlarmRecord, AlarmRegistry, ChannelSink};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn arb_record() -> impl Strategy<Value = AlarmRecord> {
    (
        "[a-e]{1,2}",
        any::<bool>(),
        "/[a-z]{1,8}",
        ".{0,16}",
        any::<u8>(),
    )
        .prop_map(|(name, raised, node, description, severity)| {
            if raised {
                AlarmRecord::raise(name, node, description, format!("{{\"s\":{}}}", severity), severity)
            } else {
                AlarmRecord::clear(name, node)
            }
        })
}

proptest! {
    #[test]
    fn test_last_write_wins(updates in prop::collection::vec(arb_record(), 1..64)) {
        let registry = AlarmRegistry::new();
        let mut expected: HashMap<String, AlarmRecord> = HashMap::new();

        for record in updates {
            expected.insert(record.alarm_name.clone(), record.clone());
            registry.update(record).unwrap();
        }

        prop_assert_eq!(registry.query_all(), expected.clone());
        for (name, record) in expected {
            prop_assert_eq!(registry.query(&name), Some(record));
        }
    }

    #[test]
    fn test_subscriber_sees_every_update_in_order(
        severities in prop::collection::vec(any::<u8>(), 1..40)
    ) {
        let rt = Runtime::new().unwrap();
        let received = rt.block_on(async {
            let registry = AlarmRegistry::new();
            let (sink, mut rx) = ChannelSink::new();
            registry.subscribe("pressure", Arc::new(sink)).unwrap();

            for &severity in &severities {
                registry
                    .update(AlarmRecord::raise("pressure", "/prop", "", "", severity))
                    .unwrap();
            }

            let mut received = Vec::new();
            while received.len() < severities.len() {
                match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                    Ok(Some(record)) => received.push(record.severity),
                    _ => break,
                }
            }
            received
        });

        prop_assert_eq!(received, severities);
    }
}
