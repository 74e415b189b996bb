use alarm_registry::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn local() -> (AlarmRegistry, Arc<dyn Transport>) {
    let registry = AlarmRegistry::new();
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(registry.clone()));
    (registry, transport)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_actuator_fault_scenario() {
    let (_registry, transport) = local();
    let listener = Listener::new(transport.clone());
    let fault = Broadcaster::new(transport, "actuator-fault").with_node_name("/drive_1");

    let seen = Arc::new(Mutex::new(Vec::<AlarmRecord>::new()));
    let log = seen.clone();
    listener
        .watch("actuator-fault", move |r: &AlarmRecord| log.lock().unwrap().push(r.clone()))
        .await
        .unwrap();

    fault
        .raise("overcurrent on drive 1", r#"{"amps": 14.2}"#, 3)
        .await
        .unwrap();

    let current = listener.get("actuator-fault").await.unwrap().unwrap();
    assert!(current.raised);
    assert_eq!(current.severity, 3);
    assert_eq!(current.node_name, "/drive_1");
    assert_eq!(current.json_parameters, r#"{"amps": 14.2}"#);

    fault.clear().await.unwrap();
    let current = listener.get("actuator-fault").await.unwrap().unwrap();
    assert!(!current.raised);
    assert_eq!(current.severity, 0);
    assert_eq!(current.problem_description, "");

    wait_for(|| seen.lock().unwrap().len() == 2).await;
    let seen = seen.lock().unwrap();
    assert!(seen[0].raised);
    assert_eq!(seen[0].severity, 3);
    assert!(!seen[1].raised);
}

#[tokio::test]
async fn test_clear_never_raised_alarm() {
    let (registry, transport) = local();
    Broadcaster::new(transport.clone(), "kill").clear().await.unwrap();

    let record = Listener::new(transport).get("kill").await.unwrap().unwrap();
    assert!(!record.raised);
    assert!(registry.active_alarms().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_updates_are_atomic() {
    let (registry, transport) = local();

    let mut tasks = Vec::new();
    for writer in 0u8..8 {
        let broadcaster = Broadcaster::new(transport.clone(), "depth")
            .with_node_name(format!("/writer_{}", writer));
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                broadcaster
                    .raise(format!("writer {}", writer), writer.to_string(), writer)
                    .await
                    .unwrap();
            }
        }));
    }

    let reader = registry.clone();
    let observer = tokio::spawn(async move {
        for _ in 0..500 {
            if let Some(record) = reader.query("depth") {
                // Every field comes from the same writer
                let writer = record.severity;
                assert_eq!(record.node_name, format!("/writer_{}", writer));
                assert_eq!(record.problem_description, format!("writer {}", writer));
                assert_eq!(record.json_parameters, writer.to_string());
            }
            tokio::task::yield_now().await;
        }
    });

    for task in tasks {
        task.await.unwrap();
    }
    observer.await.unwrap();
    assert_eq!(registry.query_entry("depth").unwrap().sequence, 400);
}

#[tokio::test]
async fn test_subscribers_agree_on_order() {
    let (registry, transport) = local();
    let listener = Listener::new(transport.clone());

    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));
    for log in [first.clone(), second.clone()] {
        listener
            .watch("battery", move |r: &AlarmRecord| log.lock().unwrap().push(r.severity))
            .await
            .unwrap();
    }

    let writer = registry.clone();
    let handles: Vec<_> = (0u8..20)
        .map(|severity| {
            let writer = writer.clone();
            tokio::spawn(async move {
                writer
                    .update(AlarmRecord::raise("battery", "/power", "", "", severity))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    wait_for(|| first.lock().unwrap().len() == 20 && second.lock().unwrap().len() == 20).await;
    assert_eq!(*first.lock().unwrap(), *second.lock().unwrap());
}

#[tokio::test]
async fn test_no_callbacks_after_unwatch() {
    let (_registry, transport) = local();
    let listener = Listener::new(transport.clone());
    let leak = Broadcaster::new(transport, "leak");

    let count = Arc::new(Mutex::new(0usize));
    let counter = count.clone();
    let handle = listener
        .watch("leak", move |_: &AlarmRecord| *counter.lock().unwrap() += 1)
        .await
        .unwrap();

    leak.raise("water", "", 5).await.unwrap();
    wait_for(|| *count.lock().unwrap() == 1).await;

    listener.unwatch(&handle).await.unwrap();
    // Grace window for anything already in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = *count.lock().unwrap();

    for _ in 0..5 {
        leak.raise("water", "", 5).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*count.lock().unwrap(), settled);
}

#[tokio::test]
async fn test_panicking_watcher_is_reported_and_isolated() {
    let registry = AlarmRegistry::with_router(NotificationRouter::new(RouterConfig {
        max_retries: 3,
        retry_base_delay_ms: 1,
        ..RouterConfig::default()
    }));
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(registry.clone()));
    let listener = Listener::new(transport.clone());
    let mut failures = registry.router().delivery_failures();

    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    listener
        .watch("sonar", move |_: &AlarmRecord| {
            *counter.lock().unwrap() += 1;
            panic!("watcher bug");
        })
        .await
        .unwrap();
    let (sink, mut healthy) = ChannelSink::new();
    listener
        .watch_sink(Topic::alarm("sonar"), Arc::new(sink))
        .await
        .unwrap();

    Broadcaster::new(transport, "sonar").raise("no echo", "", 2).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), healthy.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.alarm_name, "sonar");

    let report = tokio::time::timeout(Duration::from_secs(2), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.kind, FailureKind::NotRetryable);
    assert!(report.reason.contains("panicked"));
    assert!(registry.query("sonar").unwrap().raised);

    // The panicking callback saw the update once and is not called again
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(registry.router().stats().retried, 0);
}

#[tokio::test]
async fn test_meta_alarm_from_config() {
    let config = RegistryConfig::from_yaml(
        r#"
meta_alarms:
  - name: "propulsion"
    members: ["thruster-1", "thruster-2"]
"#,
    )
    .unwrap();
    let registry = AlarmRegistry::from_config(&config).unwrap();
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(registry.clone()));
    let listener = Listener::new(transport.clone());

    let (sink, mut meta_updates) = ChannelSink::new();
    listener
        .watch_sink(Topic::alarm("propulsion"), Arc::new(sink))
        .await
        .unwrap();

    Broadcaster::new(transport, "thruster-2")
        .with_node_name("/thrusters")
        .raise("stalled", "", 4)
        .await
        .unwrap();

    let meta = tokio::time::timeout(Duration::from_secs(2), meta_updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(meta.raised);
    assert_eq!(meta.severity, 4);
    assert_eq!(meta.node_name, "/thrusters");
    assert_eq!(listener.get_all().await.unwrap().len(), 2);
}
