//! Delivery targets for routed alarm updates.

use crate::error::{AlarmError, Result};
use crate::record::{AlarmRecord, Severity};
use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives alarm records pushed by the notification router.
///
/// A sink returning a retryable error is retried by the router a bounded
/// number of times before the record is dropped for that sink only.
#[async_trait]
pub trait AlarmSink: Send + Sync {
    async fn deliver(&self, record: &AlarmRecord) -> Result<()>;

    /// Called once when the feed stops without the subscriber asking for it,
    /// e.g. when a remote registry closes the subscription.
    async fn closed(&self, _reason: &AlarmError) {}
}

#[async_trait]
impl<S: AlarmSink + ?Sized> AlarmSink for Arc<S> {
    async fn deliver(&self, record: &AlarmRecord) -> Result<()> {
        (**self).deliver(record).await
    }

    async fn closed(&self, reason: &AlarmError) {
        (**self).closed(reason).await
    }
}

/// Invokes a synchronous callback per delivered record.
///
/// A panicking callback is contained and reported as a failed delivery. The
/// record is never handed to the callback a second time.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&AlarmRecord) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> AlarmSink for CallbackSink<F>
where
    F: Fn(&AlarmRecord) + Send + Sync,
{
    async fn deliver(&self, record: &AlarmRecord) -> Result<()> {
        catch_unwind(AssertUnwindSafe(|| (self.callback)(record))).map_err(|_| {
            AlarmError::Callback(format!(
                "callback for alarm '{}' panicked",
                record.alarm_name
            ))
        })
    }
}

/// Forwards delivered records into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AlarmRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlarmRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlarmSink for ChannelSink {
    async fn deliver(&self, record: &AlarmRecord) -> Result<()> {
        self.tx
            .send(record.clone())
            .map_err(|_| AlarmError::Transport("subscriber channel closed".to_string()))
    }
}

/// Forwards delivered records into a bounded channel.
///
/// `deliver` waits while the channel is full, so a consumer that stops
/// draining it shows up as a slow sink to the router.
#[derive(Debug, Clone)]
pub struct QueueSink {
    tx: mpsc::Sender<AlarmRecord>,
}

impl QueueSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AlarmRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlarmSink for QueueSink {
    async fn deliver(&self, record: &AlarmRecord) -> Result<()> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| AlarmError::Transport("subscriber queue closed".to_string()))
    }
}

/// Selects which transitions a filtered watch is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchFilter {
    /// Deliver records with `raised = true`
    pub on_raise: bool,

    /// Deliver records with `raised = false`
    pub on_clear: bool,

    /// Only deliver raises of exactly this severity. Clears are never
    /// filtered by severity.
    pub severity: Option<Severity>,
}

impl Default for WatchFilter {
    fn default() -> Self {
        Self {
            on_raise: true,
            on_clear: true,
            severity: None,
        }
    }
}

impl WatchFilter {
    pub fn raises() -> Self {
        Self {
            on_clear: false,
            ..Self::default()
        }
    }

    pub fn clears() -> Self {
        Self {
            on_raise: false,
            ..Self::default()
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn matches(&self, record: &AlarmRecord) -> bool {
        if record.raised {
            self.on_raise && self.severity.map_or(true, |s| s == record.severity)
        } else {
            self.on_clear
        }
    }
}

/// Wraps a sink and skips records rejected by a [`WatchFilter`]
pub struct FilteredSink<S> {
    filter: WatchFilter,
    inner: S,
}

impl<S: AlarmSink> FilteredSink<S> {
    pub fn new(filter: WatchFilter, inner: S) -> Self {
        Self { filter, inner }
    }
}

#[async_trait]
impl<S: AlarmSink> AlarmSink for FilteredSink<S> {
    async fn deliver(&self, record: &AlarmRecord) -> Result<()> {
        if self.filter.matches(record) {
            self.inner.deliver(record).await
        } else {
            Ok(())
        }
    }

    async fn closed(&self, reason: &AlarmError) {
        self.inner.closed(reason).await
    }
}
