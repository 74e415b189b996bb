// src/client.rs - Participant-side handles: Broadcaster and Listener

use crate::error::Result;
use crate::identity;
use crate::record::{AlarmRecord, Severity};
use crate::router::{SubscriptionHandle, Topic};
use crate::sink::{AlarmSink, CallbackSink, FilteredSink, WatchFilter};
use crate::transport::{Query, QueryReply, Transport};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// ==========================================
// SECTION 1: BROADCASTER
// ==========================================

/// Raises and clears one named alarm.
///
/// Holds no alarm state: every call produces a fresh record and sends it
/// through the transport. Failures are returned to the caller and never
/// retried here.
///
/// # Examples
///
/// ```rust
/// use alarm_registry::{AlarmRegistry, Broadcaster, LocalTransport};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let registry = AlarmRegistry::new();
/// let transport = Arc::new(LocalTransport::new(registry.clone()));
///
/// let fault = Broadcaster::new(transport, "actuator-fault").with_node_name("/drive_1");
/// fault.raise("overcurrent", "", 3).await?;
/// assert!(registry.query("actuator-fault").unwrap().raised);
///
/// fault.clear().await?;
/// assert!(!registry.query("actuator-fault").unwrap().raised);
/// # Ok::<(), alarm_registry::AlarmError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    alarm_name: String,
    node_name: String,
}

impl Broadcaster {
    /// Broadcaster attributing its records to the calling process
    pub fn new(transport: Arc<dyn Transport>, alarm_name: impl Into<String>) -> Self {
        Self {
            transport,
            alarm_name: alarm_name.into(),
            node_name: identity::default_node_name(),
        }
    }

    /// Attribute records to `node_name` instead of the process identity
    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn alarm_name(&self) -> &str {
        &self.alarm_name
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub async fn raise(
        &self,
        problem_description: impl Into<String>,
        json_parameters: impl Into<String>,
        severity: Severity,
    ) -> Result<()> {
        let record = AlarmRecord::raise(
            self.alarm_name.clone(),
            self.node_name.clone(),
            problem_description,
            json_parameters,
            severity,
        );
        debug!("Raising {} at severity {}", self.alarm_name, severity);
        self.transport.send(record).await
    }

    /// Raise with a payload serialized to JSON
    pub async fn raise_with_parameters<T: Serialize + ?Sized>(
        &self,
        problem_description: impl Into<String>,
        parameters: &T,
        severity: Severity,
    ) -> Result<()> {
        let json = serde_json::to_string(parameters)?;
        self.raise(problem_description, json, severity).await
    }

    /// Mark the alarm inactive. Every call produces an update, even when
    /// the alarm is already clear.
    pub async fn clear(&self) -> Result<()> {
        debug!("Clearing {}", self.alarm_name);
        self.transport
            .send(AlarmRecord::clear(self.alarm_name.clone(), self.node_name.clone()))
            .await
    }
}

// ==========================================
// SECTION 2: LISTENER
// ==========================================

/// Reads current alarm state and watches future transitions
#[derive(Clone)]
pub struct Listener {
    transport: Arc<dyn Transport>,
}

impl Listener {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Current record of `alarm_name`, `None` if it was never raised or cleared
    pub async fn get(&self, alarm_name: &str) -> Result<Option<AlarmRecord>> {
        match self.transport.request(Query::Alarm(alarm_name.to_string())).await? {
            QueryReply::Alarm(record) => Ok(record),
            QueryReply::All(mut all) => Ok(all.remove(alarm_name)),
        }
    }

    /// Current record of every known alarm
    pub async fn get_all(&self) -> Result<HashMap<String, AlarmRecord>> {
        match self.transport.request(Query::All).await? {
            QueryReply::All(all) => Ok(all),
            QueryReply::Alarm(record) => Ok(record
                .into_iter()
                .map(|r| (r.alarm_name.clone(), r))
                .collect()),
        }
    }

    /// Invoke `callback` once per future update of `alarm_name`, in
    /// acceptance order
    pub async fn watch<F>(&self, alarm_name: impl Into<String>, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&AlarmRecord) + Send + Sync + 'static,
    {
        self.watch_sink(Topic::alarm(alarm_name), Arc::new(CallbackSink::new(callback)))
            .await
    }

    /// Invoke `callback` once per future update of any alarm
    pub async fn watch_all<F>(&self, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&AlarmRecord) + Send + Sync + 'static,
    {
        self.watch_sink(Topic::All, Arc::new(CallbackSink::new(callback)))
            .await
    }

    /// Like [`watch`](Self::watch), restricted to transitions accepted by `filter`
    pub async fn watch_filtered<F>(
        &self,
        alarm_name: impl Into<String>,
        filter: WatchFilter,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&AlarmRecord) + Send + Sync + 'static,
    {
        let sink = FilteredSink::new(filter, CallbackSink::new(callback));
        self.watch_sink(Topic::alarm(alarm_name), Arc::new(sink))
            .await
    }

    /// Deliver updates on `topic` to a caller-provided sink
    pub async fn watch_sink(&self, topic: Topic, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle> {
        self.transport.subscribe(topic, sink).await
    }

    /// True while updates for `handle` are still being delivered. Turns
    /// false after `unwatch` or when the registry ends the watch.
    pub fn is_watching(&self, handle: &SubscriptionHandle) -> bool {
        self.transport.is_subscribed(handle)
    }

    /// Stop a watch. Idempotent; a callback already running may still complete.
    pub async fn unwatch(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.transport.unsubscribe(handle).await
    }
}
