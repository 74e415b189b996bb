// src/router.rs - Fan-out of accepted alarm updates to subscribers
//
// Every subscription owns a bounded FIFO queue drained by its own delivery
// task. The registry pushes a record into the queues while it still holds the
// lock of that alarm name, so all subscribers of one name observe updates in
// acceptance order. A slow or failing sink only ever affects its own queue.

use crate::config::RouterConfig;
use crate::error::{AlarmError, Result};
use crate::record::AlarmRecord;
use crate::sink::AlarmSink;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

// ==========================================
// SECTION 1: SUBSCRIPTION IDENTITY
// ==========================================

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Updates of one alarm name
    Alarm(String),

    /// Updates of every alarm
    All,
}

impl Topic {
    pub fn alarm(name: impl Into<String>) -> Self {
        Topic::Alarm(name.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Alarm(name) => write!(f, "alarm '{}'", name),
            Topic::All => write!(f, "all alarms"),
        }
    }
}

/// Returned by `subscribe`, required to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, topic: Topic) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

// ==========================================
// SECTION 2: FAILURE REPORTING
// ==========================================

/// Why a record did not reach a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every delivery attempt failed or timed out
    RetriesExhausted,

    /// The subscription queue was full when the record was accepted
    QueueFull,

    /// The sink failed in a way a further attempt cannot fix
    NotRetryable,
}

/// One record that could not be delivered to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscription: SubscriptionHandle,
    pub alarm_name: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl DeliveryReport {
    pub fn into_error(self) -> AlarmError {
        AlarmError::DeliveryFailure {
            subscription: self.subscription.id(),
            topic: self.subscription.topic().to_string(),
            reason: self.reason,
        }
    }
}

/// Delivery counters since the router was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Records handed to a sink successfully
    pub delivered: u64,
    /// Delivery attempts repeated after a failure
    pub retried: u64,
    /// Records given up on after all retries
    pub failed: u64,
    /// Records dropped because a subscription queue was full
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RouterStats {
        RouterStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn report_failure(
    reports: &broadcast::Sender<DeliveryReport>,
    subscription: &SubscriptionHandle,
    record: &AlarmRecord,
    kind: FailureKind,
    reason: String,
) {
    let report = DeliveryReport {
        subscription: subscription.clone(),
        alarm_name: record.alarm_name.clone(),
        kind,
        reason,
    };
    warn!(
        subscription = subscription.id(),
        alarm = %record.alarm_name,
        "{}",
        report.clone().into_error()
    );
    // Nobody listening for reports is fine
    let _ = reports.send(report);
}

// ==========================================
// SECTION 3: ROUTER
// ==========================================

#[derive(Debug)]
struct Subscriber {
    handle: SubscriptionHandle,
    queue: mpsc::Sender<AlarmRecord>,
    active: Arc<AtomicBool>,
}

#[derive(Debug)]
struct RouterInner {
    config: RouterConfig,
    by_name: DashMap<String, Vec<Subscriber>>,
    wildcard: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
    reports: broadcast::Sender<DeliveryReport>,
}

/// Delivers every accepted update to the subscribers of its alarm name.
///
/// Cloning yields another handle to the same subscription table.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    inner: Arc<RouterInner>,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl NotificationRouter {
    pub fn new(config: RouterConfig) -> Self {
        let (reports, _) = broadcast::channel(config.report_capacity.max(1));
        Self {
            inner: Arc::new(RouterInner {
                config,
                by_name: DashMap::new(),
                wildcard: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                counters: Arc::new(Counters::default()),
                reports,
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Register `sink` for every future update on `topic`.
    ///
    /// No history is replayed. Must be called from within a tokio runtime,
    /// which runs the delivery task of the subscription.
    pub fn subscribe(&self, topic: Topic, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AlarmError::Config("subscriptions require a running tokio runtime".to_string())
        })?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle::new(id, topic.clone());
        let (queue, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let active = Arc::new(AtomicBool::new(true));

        let task = DeliveryTask {
            handle: handle.clone(),
            active: active.clone(),
            config: self.inner.config.clone(),
            counters: self.inner.counters.clone(),
            reports: self.inner.reports.clone(),
        };
        runtime.spawn(task.run(rx, sink));

        let subscriber = Subscriber {
            handle: handle.clone(),
            queue,
            active,
        };
        match topic {
            Topic::Alarm(name) => self.inner.by_name.entry(name).or_default().push(subscriber),
            Topic::All => self.inner.wildcard.write().push(subscriber),
        }

        debug!(subscription = id, "Subscribed to {}", handle.topic());
        Ok(handle)
    }

    /// Convenience for `subscribe(Topic::Alarm(name), sink)`
    pub fn subscribe_alarm(
        &self,
        alarm_name: impl Into<String>,
        sink: Arc<dyn AlarmSink>,
    ) -> Result<SubscriptionHandle> {
        self.subscribe(Topic::alarm(alarm_name), sink)
    }

    /// Convenience for `subscribe(Topic::All, sink)`
    pub fn subscribe_all(&self, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle> {
        self.subscribe(Topic::All, sink)
    }

    /// Stop deliveries to a subscription.
    ///
    /// Idempotent and non-blocking; a record already handed to the sink may
    /// still land after this returns.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed = match handle.topic() {
            Topic::Alarm(name) => {
                let removed = self.inner.by_name.get_mut(name).and_then(|mut subs| {
                    let pos = subs.iter().position(|s| s.handle.id() == handle.id())?;
                    Some(subs.remove(pos))
                });
                self.inner.by_name.remove_if(name, |_, subs| subs.is_empty());
                removed
            }
            Topic::All => {
                let mut wildcard = self.inner.wildcard.write();
                wildcard
                    .iter()
                    .position(|s| s.handle.id() == handle.id())
                    .map(|pos| wildcard.remove(pos))
            }
        };

        if let Some(subscriber) = removed {
            subscriber.active.store(false, Ordering::Release);
            debug!(subscription = handle.id(), "Unsubscribed from {}", handle.topic());
        }
    }

    /// True while `handle` is registered with this router
    pub fn is_subscribed(&self, handle: &SubscriptionHandle) -> bool {
        match handle.topic() {
            Topic::Alarm(name) => self
                .inner
                .by_name
                .get(name)
                .map_or(false, |subs| subs.iter().any(|s| s.handle.id() == handle.id())),
            Topic::All => self
                .inner
                .wildcard
                .read()
                .iter()
                .any(|s| s.handle.id() == handle.id()),
        }
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        match topic {
            Topic::Alarm(name) => self.inner.by_name.get(name).map_or(0, |subs| subs.len()),
            Topic::All => self.inner.wildcard.read().len(),
        }
    }

    pub fn stats(&self) -> RouterStats {
        self.inner.counters.snapshot()
    }

    /// Stream of delivery failures from now on
    pub fn delivery_failures(&self) -> broadcast::Receiver<DeliveryReport> {
        self.inner.reports.subscribe()
    }

    /// Queue `record` for every subscriber of its name and every wildcard
    /// subscriber. Never waits: a full queue drops the record for that
    /// subscriber only.
    pub(crate) fn dispatch(&self, record: &AlarmRecord) {
        if let Some(subs) = self.inner.by_name.get(&record.alarm_name) {
            for subscriber in subs.iter() {
                self.enqueue(subscriber, record);
            }
        }
        for subscriber in self.inner.wildcard.read().iter() {
            self.enqueue(subscriber, record);
        }
    }

    fn enqueue(&self, subscriber: &Subscriber, record: &AlarmRecord) {
        if !subscriber.active.load(Ordering::Acquire) {
            return;
        }
        match subscriber.queue.try_send(record.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                report_failure(
                    &self.inner.reports,
                    &subscriber.handle,
                    record,
                    FailureKind::QueueFull,
                    format!(
                        "queue of {} records is full",
                        self.inner.config.queue_capacity
                    ),
                );
            }
            // Delivery task already gone, the subscription is being torn down
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

// ==========================================
// SECTION 4: DELIVERY TASK
// ==========================================

struct DeliveryTask {
    handle: SubscriptionHandle,
    active: Arc<AtomicBool>,
    config: RouterConfig,
    counters: Arc<Counters>,
    reports: broadcast::Sender<DeliveryReport>,
}

impl DeliveryTask {
    async fn run(self, mut rx: mpsc::Receiver<AlarmRecord>, sink: Arc<dyn AlarmSink>) {
        while let Some(record) = rx.recv().await {
            if !self.active.load(Ordering::Acquire) {
                break;
            }
            self.deliver(sink.as_ref(), &record).await;
        }
        debug!(subscription = self.handle.id(), "Delivery task finished");
    }

    async fn deliver(&self, sink: &dyn AlarmSink, record: &AlarmRecord) {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                if !self.active.load(Ordering::Acquire) {
                    return;
                }
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                sleep(self.config.backoff(attempt - 1)).await;
            }

            match timeout(self.config.delivery_timeout(), sink.deliver(record)).await {
                Ok(Ok(())) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    report_failure(
                        &self.reports,
                        &self.handle,
                        record,
                        FailureKind::NotRetryable,
                        e.to_string(),
                    );
                    return;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "delivery timed out after {} ms",
                        self.config.delivery_timeout_ms
                    )
                }
            }
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        report_failure(
            &self.reports,
            &self.handle,
            record,
            FailureKind::RetriesExhausted,
            format!(
                "gave up after {} attempts: {}",
                self.config.max_retries + 1,
                last_error
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingSink;

    #[async_trait]
    impl AlarmSink for FailingSink {
        async fn deliver(&self, _record: &AlarmRecord) -> Result<()> {
            Err(AlarmError::Transport("sink unreachable".to_string()))
        }
    }

    struct StalledSink;

    #[async_trait]
    impl AlarmSink for StalledSink {
        async fn deliver(&self, _record: &AlarmRecord) -> Result<()> {
            sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct PanickyCallback {
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl AlarmSink for PanickyCallback {
        async fn deliver(&self, record: &AlarmRecord) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AlarmError::Callback(format!(
                "callback for alarm '{}' panicked",
                record.alarm_name
            )))
        }
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            max_retries: 1,
            retry_base_delay_ms: 1,
            delivery_timeout_ms: 200,
            ..RouterConfig::default()
        }
    }

    fn record(name: &str, severity: u8) -> AlarmRecord {
        AlarmRecord::raise(name, "/test", "", "", severity)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<AlarmRecord>) -> AlarmRecord {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn subscribers_see_same_order() {
        let router = NotificationRouter::new(fast_config());
        let (first, mut first_rx) = ChannelSink::new();
        let (second, mut second_rx) = ChannelSink::new();
        router.subscribe_alarm("depth", Arc::new(first)).unwrap();
        router.subscribe_alarm("depth", Arc::new(second)).unwrap();

        for severity in 0..10 {
            router.dispatch(&record("depth", severity));
        }

        for severity in 0..10 {
            assert_eq!(recv(&mut first_rx).await.severity, severity);
            assert_eq!(recv(&mut second_rx).await.severity, severity);
        }
    }

    #[tokio::test]
    async fn other_names_are_not_delivered() {
        let router = NotificationRouter::new(fast_config());
        let (sink, mut rx) = ChannelSink::new();
        router.subscribe_alarm("depth", Arc::new(sink)).unwrap();

        router.dispatch(&record("heading", 1));
        router.dispatch(&record("depth", 2));

        assert_eq!(recv(&mut rx).await.alarm_name, "depth");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wildcard_receives_every_name() {
        let router = NotificationRouter::new(fast_config());
        let (sink, mut rx) = ChannelSink::new();
        let handle = router.subscribe_all(Arc::new(sink)).unwrap();
        assert_eq!(router.subscriber_count(&Topic::All), 1);

        router.dispatch(&record("a", 1));
        router.dispatch(&record("b", 1));

        assert_eq!(recv(&mut rx).await.alarm_name, "a");
        assert_eq!(recv(&mut rx).await.alarm_name, "b");

        router.unsubscribe(&handle);
        assert_eq!(router.subscriber_count(&Topic::All), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let router = NotificationRouter::new(fast_config());
        let (sink, mut rx) = ChannelSink::new();
        let handle = router.subscribe_alarm("depth", Arc::new(sink)).unwrap();

        router.dispatch(&record("depth", 1));
        assert_eq!(recv(&mut rx).await.severity, 1);

        router.unsubscribe(&handle);
        router.unsubscribe(&handle);
        assert_eq!(router.subscriber_count(&Topic::alarm("depth")), 0);

        router.dispatch(&record("depth", 2));
        // The delivery task exits once its queue sender is dropped
        let next = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn failing_sink_is_isolated_and_reported() {
        let router = NotificationRouter::new(fast_config());
        let mut failures = router.delivery_failures();
        let (healthy, mut rx) = ChannelSink::new();
        let bad = router.subscribe_alarm("depth", Arc::new(FailingSink)).unwrap();
        router.subscribe_alarm("depth", Arc::new(healthy)).unwrap();

        router.dispatch(&record("depth", 4));
        assert_eq!(recv(&mut rx).await.severity, 4);

        let report = timeout(Duration::from_secs(2), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.subscription, bad);
        assert_eq!(report.kind, FailureKind::RetriesExhausted);
        assert!(report.reason.contains("sink unreachable"));

        let stats = router.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 1);
        assert!(matches!(
            report.into_error(),
            AlarmError::DeliveryFailure { .. }
        ));
    }

    #[tokio::test]
    async fn non_retryable_failure_is_attempted_once() {
        let router = NotificationRouter::new(RouterConfig {
            max_retries: 3,
            retry_base_delay_ms: 1,
            ..RouterConfig::default()
        });
        let mut failures = router.delivery_failures();
        let calls = Arc::new(AtomicU64::new(0));
        router
            .subscribe_alarm("depth", Arc::new(PanickyCallback { calls: calls.clone() }))
            .unwrap();

        router.dispatch(&record("depth", 1));

        let report = timeout(Duration::from_secs(2), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.kind, FailureKind::NotRetryable);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = router.stats();
        assert_eq!(stats.retried, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn is_subscribed_follows_unsubscribe() {
        let router = NotificationRouter::new(fast_config());
        let (sink, _rx) = ChannelSink::new();
        let by_name = router.subscribe_alarm("depth", Arc::new(sink.clone())).unwrap();
        let all = router.subscribe_all(Arc::new(sink)).unwrap();
        assert!(router.is_subscribed(&by_name));
        assert!(router.is_subscribed(&all));

        router.unsubscribe(&by_name);
        assert!(!router.is_subscribed(&by_name));
        assert!(router.is_subscribed(&all));
    }

    #[tokio::test]
    async fn full_queue_drops_for_slow_subscriber_only() {
        let router = NotificationRouter::new(RouterConfig {
            queue_capacity: 1,
            max_retries: 0,
            delivery_timeout_ms: 60_000,
            ..RouterConfig::default()
        });
        router.subscribe_alarm("depth", Arc::new(StalledSink)).unwrap();
        let (watcher, mut watcher_rx) = ChannelSink::new();
        router.subscribe_all(Arc::new(watcher)).unwrap();

        // No await in between: delivery tasks cannot drain the queues yet
        router.dispatch(&record("depth", 1));
        router.dispatch(&record("depth", 2));
        router.dispatch(&record("depth", 3));

        // Both capacity-1 queues overflowed twice
        assert_eq!(router.stats().dropped, 4);
        assert_eq!(recv(&mut watcher_rx).await.severity, 1);
    }

    #[test]
    fn subscribe_requires_runtime() {
        let router = NotificationRouter::default();
        let (sink, _rx) = ChannelSink::new();
        let result = router.subscribe_alarm("depth", Arc::new(sink));
        assert!(matches!(result, Err(AlarmError::Config(_))));
    }
}
