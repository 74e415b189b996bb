//! Alarm Registry - distributed alarm state with raise/clear/query/subscribe
//!
//! Participants raise and clear named alarms through a [`Broadcaster`] and
//! observe them through a [`Listener`]. A single [`AlarmRegistry`] holds the
//! current record of every alarm (last write wins) and its
//! [`NotificationRouter`] pushes every accepted update to the subscribers of
//! that alarm name, in acceptance order.
//!
//! # Feature Flags
//!
//! - **tcp-transport** (default): [`TcpTransport`] and the [`AlarmServer`]
//!   speaking newline-delimited JSON
//! - **cli** (default): the `alarm-registry`, `alarm-clear` and `alarm-raise`
//!   binaries
//!
//! # Examples
//!
//! ```rust
//! use alarm_registry::{AlarmRecord, AlarmRegistry, Broadcaster, Listener, LocalTransport};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = AlarmRegistry::new();
//! let transport = Arc::new(LocalTransport::new(registry.clone()));
//!
//! let fault = Broadcaster::new(transport.clone(), "actuator-fault");
//! let listener = Listener::new(transport);
//!
//! fault.raise("overcurrent on drive 1", r#"{"amps": 14.2}"#, 3).await?;
//! let current = listener.get("actuator-fault").await?.unwrap();
//! assert!(current.raised);
//! assert_eq!(current.severity, 3);
//! # Ok::<(), alarm_registry::AlarmError>(())
//! # }).unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES (always available)
// ============================================================================

/// Error taxonomy shared by every component
pub mod error;

/// YAML configuration for server, router, client and meta alarms
pub mod config;

/// Default participant identity
pub mod identity;

/// The alarm record exchanged by all participants
pub mod record;

/// Delivery targets for routed updates
pub mod sink;

/// Subscription table and per-subscriber delivery
pub mod router;

/// Aggregate alarms raised by their members
pub mod meta;

/// Authoritative alarm state store
pub mod registry;

/// How participants reach a registry
pub mod transport;

/// Broadcaster and Listener handles
pub mod client;

// ============================================================================
// NETWORK MODULES (feature-gated)
// ============================================================================

#[cfg(feature = "tcp-transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp-transport")))]
/// TCP front end of a registry process
pub mod server;

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

pub use client::{Broadcaster, Listener};
pub use config::{ClientConfig, MetaAlarmConfig, RegistryConfig, RouterConfig, ServerConfig};
pub use error::{AlarmError, Result};
pub use record::{AlarmRecord, Severity};
pub use registry::{AlarmEntry, AlarmRegistry};
pub use router::{
    DeliveryReport, FailureKind, NotificationRouter, RouterStats, SubscriptionHandle, Topic,
};
pub use sink::{AlarmSink, CallbackSink, ChannelSink, FilteredSink, QueueSink, WatchFilter};
pub use transport::{LocalTransport, Query, QueryReply, Transport};

#[cfg(feature = "tcp-transport")]
pub use server::AlarmServer;

#[cfg(feature = "tcp-transport")]
pub use transport::TcpTransport;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate authors
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Build information
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("ALARM_REGISTRY_GIT_HASH");

    /// Build timestamp
    pub const BUILD_TIMESTAMP: &str = env!("ALARM_REGISTRY_BUILD_TIMESTAMP");

    /// Rust version used for compilation
    pub const RUSTC_VERSION: &str = env!("ALARM_REGISTRY_RUST_VERSION");

    /// Target triple
    pub const TARGET: &str = env!("ALARM_REGISTRY_TARGET");

    /// Build profile (debug/release)
    pub const PROFILE: &str = env!("ALARM_REGISTRY_PROFILE");

    /// One-line summary for startup logs and `--version` style output
    pub fn summary() -> String {
        format!(
            "{} ({}, {} {}, built {})",
            super::VERSION,
            GIT_HASH.unwrap_or("unknown commit"),
            TARGET,
            PROFILE,
            BUILD_TIMESTAMP
        )
    }
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG` when set and defaults to `alarm_registry=info`
/// otherwise. Calling it again, or after another subscriber was installed,
/// is harmless.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("alarm_registry=info"));

    // Already initialized elsewhere, keep that subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
