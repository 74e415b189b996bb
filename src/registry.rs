// src/registry.rs - Authoritative alarm state store
//
// The registry maps alarm name to the current record. Updates for one name
// are serialized by the shard lock of the underlying map; the router hand-off
// happens under that same lock, so subscribers see per-name acceptance order.
// Different names proceed fully concurrently.

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::meta::{self, MetaAlarms};
use crate::record::AlarmRecord;
use crate::router::{NotificationRouter, SubscriptionHandle, Topic};
use crate::sink::AlarmSink;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A current record together with registry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEntry {
    /// The record exactly as submitted
    pub record: AlarmRecord,

    /// Acceptance order, strictly increasing per registry
    pub sequence: u64,

    /// When the registry accepted the record
    pub updated_at: DateTime<Utc>,
}

/// Single source of truth for the current state of every alarm.
///
/// The registry is an explicitly constructed object; cloning yields another
/// handle to the same state, so it can be shared with servers and transports.
///
/// # Examples
///
/// ```rust
/// use alarm_registry::{AlarmRecord, AlarmRegistry};
///
/// let registry = AlarmRegistry::new();
/// assert!(registry.query("actuator-fault").is_none());
///
/// registry.update(AlarmRecord::raise("actuator-fault", "/drive", "overcurrent", "", 3))?;
/// let current = registry.query("actuator-fault").unwrap();
/// assert!(current.raised);
/// assert_eq!(current.severity, 3);
/// # Ok::<(), alarm_registry::AlarmError>(())
/// ```
#[derive(Debug, Clone)]
pub struct AlarmRegistry {
    alarms: Arc<DashMap<String, AlarmEntry>>,
    router: NotificationRouter,
    sequence: Arc<AtomicU64>,
    meta: Arc<MetaAlarms>,
}

impl Default for AlarmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmRegistry {
    /// Create an empty registry with a default router
    pub fn new() -> Self {
        Self::with_router(NotificationRouter::default())
    }

    /// Create an empty registry delivering through `router`
    pub fn with_router(router: NotificationRouter) -> Self {
        Self {
            alarms: Arc::new(DashMap::new()),
            router,
            sequence: Arc::new(AtomicU64::new(0)),
            meta: Arc::new(MetaAlarms::default()),
        }
    }

    /// Create an empty registry from configuration
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::with_router(NotificationRouter::new(config.router.clone()));
        registry.meta = Arc::new(MetaAlarms::from_config(&config.meta_alarms));
        Ok(registry)
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    /// Make `record` the current record of its alarm.
    ///
    /// Last write wins: any existing record for the name is replaced, and
    /// subscribers are notified exactly once. Fails with `InvalidRecord` when
    /// the alarm name is empty, in which case nothing is stored.
    pub fn update(&self, record: AlarmRecord) -> Result<()> {
        if let Err(e) = record.validate() {
            warn!("Rejected update from '{}': {}", record.node_name, e);
            return Err(e);
        }

        let name = record.alarm_name.clone();
        let stored = self.store(name, move |_| record);

        if stored.record.raised && !self.meta.is_empty() {
            self.raise_meta_alarms(&stored.record);
        }
        Ok(())
    }

    /// Current record of `alarm_name`, `None` if it was never raised or cleared
    pub fn query(&self, alarm_name: &str) -> Option<AlarmRecord> {
        self.alarms.get(alarm_name).map(|entry| entry.record.clone())
    }

    /// Current record of `alarm_name` with its sequence number and timestamp
    pub fn query_entry(&self, alarm_name: &str) -> Option<AlarmEntry> {
        self.alarms.get(alarm_name).map(|entry| entry.value().clone())
    }

    /// Snapshot of every known alarm.
    ///
    /// Each entry is a fully applied update; the snapshot is not atomic
    /// across different names.
    pub fn query_all(&self) -> HashMap<String, AlarmRecord> {
        self.alarms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().record.clone()))
            .collect()
    }

    /// Currently raised alarms ordered by name
    pub fn active_alarms(&self) -> Vec<AlarmRecord> {
        let mut active: Vec<AlarmRecord> = self
            .alarms
            .iter()
            .filter(|entry| entry.record.raised)
            .map(|entry| entry.record.clone())
            .collect();
        active.sort_by(|a, b| a.alarm_name.cmp(&b.alarm_name));
        active
    }

    /// Number of alarms with a current record
    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// Subscribe `sink` to future updates of `alarm_name`
    pub fn subscribe(
        &self,
        alarm_name: impl Into<String>,
        sink: Arc<dyn AlarmSink>,
    ) -> Result<SubscriptionHandle> {
        self.router.subscribe(Topic::alarm(alarm_name), sink)
    }

    /// Subscribe `sink` to future updates of every alarm
    pub fn subscribe_all(&self, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle> {
        self.router.subscribe(Topic::All, sink)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.router.unsubscribe(handle)
    }

    /// Replace the entry of `name` with the record built from its current
    /// one, and queue notifications while the name's lock is held.
    fn store<F>(&self, name: String, build: F) -> AlarmEntry
    where
        F: FnOnce(Option<&AlarmRecord>) -> AlarmRecord,
    {
        let slot = self.alarms.entry(name);
        let (record, replaced) = match &slot {
            Entry::Occupied(current) => (build(Some(&current.get().record)), true),
            Entry::Vacant(_) => (build(None), false),
        };

        if replaced {
            info!("Updating alarm: {}, raised={}", record.alarm_name, record.raised);
        } else {
            info!("Adding alarm: {}, raised={}", record.alarm_name, record.raised);
        }

        let entry = AlarmEntry {
            record,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            updated_at: Utc::now(),
        };
        let stored = slot.insert(entry);
        self.router.dispatch(&stored.record);
        stored.value().clone()
    }

    /// Meta propagation is one level deep: raising a meta alarm here never
    /// raises the meta alarms it may itself be a member of.
    fn raise_meta_alarms(&self, member: &AlarmRecord) {
        for meta_name in self.meta.metas_for(&member.alarm_name) {
            let entry = self.store(meta_name.clone(), |current| {
                meta::escalate(meta_name, current, member)
            });
            debug!(
                "Meta alarm {} raised by {} at severity {}",
                meta_name, member.alarm_name, entry.record.severity
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaAlarmConfig;
    use crate::error::AlarmError;
    use crate::sink::ChannelSink;
    use std::time::Duration;

    fn raise(name: &str, severity: u8, description: &str) -> AlarmRecord {
        AlarmRecord::raise(name, "/test", description, "", severity)
    }

    #[test]
    fn read_your_write() {
        let registry = AlarmRegistry::new();
        let record = AlarmRecord::raise("odom-loss", "/nav", "no fix", r#"{"age_s": 4}"#, 2);
        registry.update(record.clone()).unwrap();
        assert_eq!(registry.query("odom-loss"), Some(record));
    }

    #[test]
    fn never_set_alarm_is_absent() {
        let registry = AlarmRegistry::new();
        registry.update(raise("a", 1, "")).unwrap();
        assert!(registry.query("b").is_none());
        assert!(registry.query_entry("b").is_none());
    }

    #[test]
    fn clearing_unknown_alarm_records_cleared_state() {
        let registry = AlarmRegistry::new();
        registry.update(AlarmRecord::clear("kill", "/op")).unwrap();

        let current = registry.query("kill").unwrap();
        assert!(!current.raised);
        assert_eq!(registry.len(), 1);
        assert!(registry.active_alarms().is_empty());
    }

    #[test]
    fn raising_twice_escalates_severity() {
        let registry = AlarmRegistry::new();
        registry.update(raise("battery", 1, "low")).unwrap();
        registry.update(raise("battery", 4, "critical")).unwrap();

        let current = registry.query("battery").unwrap();
        assert_eq!(current.severity, 4);
        assert_eq!(current.problem_description, "critical");
    }

    #[test]
    fn empty_name_is_rejected_without_storing() {
        let registry = AlarmRegistry::new();
        let err = registry.update(raise("", 1, "")).unwrap_err();
        assert!(matches!(err, AlarmError::InvalidRecord(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn sequence_tracks_acceptance_order() {
        let registry = AlarmRegistry::new();
        registry.update(raise("a", 1, "")).unwrap();
        registry.update(raise("b", 1, "")).unwrap();
        registry.update(raise("a", 2, "")).unwrap();

        let a = registry.query_entry("a").unwrap();
        let b = registry.query_entry("b").unwrap();
        assert_eq!(b.sequence, 2);
        assert_eq!(a.sequence, 3);
        assert!(a.updated_at >= b.updated_at);
    }

    #[test]
    fn query_all_and_active_alarms() {
        let registry = AlarmRegistry::new();
        registry.update(raise("b", 1, "")).unwrap();
        registry.update(raise("a", 1, "")).unwrap();
        registry.update(AlarmRecord::clear("c", "/op")).unwrap();

        let all = registry.query_all();
        assert_eq!(all.len(), 3);
        assert!(!all["c"].raised);

        let active: Vec<String> = registry
            .active_alarms()
            .into_iter()
            .map(|r| r.alarm_name)
            .collect();
        assert_eq!(active, vec!["a", "b"]);
    }

    #[test]
    fn independent_registries_do_not_share_state() {
        let first = AlarmRegistry::new();
        let second = AlarmRegistry::new();
        first.update(raise("a", 1, "")).unwrap();
        assert!(second.query("a").is_none());

        let shared = first.clone();
        assert!(shared.query("a").is_some());
    }

    fn meta_registry() -> AlarmRegistry {
        let config = RegistryConfig {
            meta_alarms: vec![MetaAlarmConfig {
                name: "propulsion".to_string(),
                members: vec!["thruster-1".to_string(), "thruster-2".to_string()],
            }],
            ..RegistryConfig::default()
        };
        AlarmRegistry::from_config(&config).unwrap()
    }

    #[test]
    fn member_raise_raises_meta_alarm() {
        let registry = meta_registry();
        assert!(registry.query("propulsion").is_none());

        registry.update(raise("thruster-1", 2, "stalled")).unwrap();
        let meta = registry.query("propulsion").unwrap();
        assert!(meta.raised);
        assert_eq!(meta.severity, 2);
        assert_eq!(meta.node_name, "/test");

        registry.update(raise("thruster-2", 1, "hot")).unwrap();
        assert_eq!(registry.query("propulsion").unwrap().severity, 2);

        registry.update(raise("thruster-2", 5, "seized")).unwrap();
        assert_eq!(registry.query("propulsion").unwrap().severity, 5);
    }

    #[test]
    fn member_clear_leaves_meta_alarm_raised() {
        let registry = meta_registry();
        registry.update(raise("thruster-1", 2, "stalled")).unwrap();
        registry.update(AlarmRecord::clear("thruster-1", "/test")).unwrap();

        assert!(!registry.query("thruster-1").unwrap().raised);
        assert!(registry.query("propulsion").unwrap().raised);
    }

    #[tokio::test]
    async fn update_notifies_subscribers_once() {
        let registry = AlarmRegistry::new();
        let (sink, mut rx) = ChannelSink::new();
        registry.subscribe("depth", Arc::new(sink)).unwrap();

        registry.update(raise("depth", 3, "too deep")).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.severity, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_update_is_not_notified() {
        let registry = AlarmRegistry::new();
        let (sink, mut rx) = ChannelSink::new();
        registry.subscribe_all(Arc::new(sink)).unwrap();

        assert!(registry.update(raise("", 3, "")).is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
