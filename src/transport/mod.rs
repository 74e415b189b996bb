//! Transport capability used by broadcasters and listeners to reach a registry.
//!
//! - [`LocalTransport`] calls an in-process [`AlarmRegistry`](crate::AlarmRegistry)
//!   directly.
//! - [`TcpTransport`] talks to a remote registry server over newline-delimited
//!   JSON frames (feature `tcp-transport`).

use crate::error::Result;
use crate::record::AlarmRecord;
use crate::router::{SubscriptionHandle, Topic};
use crate::sink::AlarmSink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod local;
pub mod protocol;

#[cfg(feature = "tcp-transport")]
pub mod tcp;

pub use local::LocalTransport;

#[cfg(feature = "tcp-transport")]
pub use tcp::TcpTransport;

/// What a listener asks the registry for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Current record of one alarm
    Alarm(String),

    /// Current record of every alarm
    All,
}

/// Registry answer to a [`Query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryReply {
    Alarm(Option<AlarmRecord>),
    All(HashMap<String, AlarmRecord>),
}

/// Narrow interface to the registry, independent of how it is reached.
///
/// No implementation retries on its own; a failed call surfaces as
/// `AlarmError::Transport` and the caller decides what to do.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit one record as an update, returning once the registry accepted it
    async fn send(&self, record: AlarmRecord) -> Result<()>;

    /// Ask for current state
    async fn request(&self, query: Query) -> Result<QueryReply>;

    /// Establish a standing channel pushing future updates on `topic` to `sink`
    async fn subscribe(&self, topic: Topic, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle>;

    /// Tear down a channel established by `subscribe`; idempotent
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()>;

    /// False once the channel behind `handle` is gone, whether the caller
    /// unsubscribed or the registry side ended it
    fn is_subscribed(&self, handle: &SubscriptionHandle) -> bool;
}
