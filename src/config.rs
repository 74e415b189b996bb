// src/config.rs - Registry, router, client and meta alarm configuration

use crate::error::{AlarmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the registry address used by clients
pub const REGISTRY_ADDR_ENV: &str = "ALARM_REGISTRY_ADDR";

/// Address the registry server listens on when nothing else is configured
pub const DEFAULT_REGISTRY_ADDR: &str = "127.0.0.1:7410";

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main alarm registry configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Notification delivery configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Client side configuration used by broadcasters and listeners
    #[serde(default)]
    pub client: ClientConfig,

    /// Aggregate alarms raised whenever one of their members is raised
    #[serde(default)]
    pub meta_alarms: Vec<MetaAlarmConfig>,
}

impl RegistryConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RegistryConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.router.validate()?;
        self.client.validate()?;

        let mut seen = HashSet::new();
        for meta in &self.meta_alarms {
            meta.validate()?;
            if !seen.insert(meta.name.as_str()) {
                return Err(AlarmError::Config(format!(
                    "meta alarm '{}' is defined more than once",
                    meta.name
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SERVER CONFIGURATION
// ============================================================================

/// TCP front end of the registry process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Longest accepted wire frame in bytes
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,

    /// Time a peer gets to accept one outgoing frame before it is disconnected
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Updates buffered per subscribed connection ahead of the socket
    #[serde(default = "default_push_buffer")]
    pub push_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_frame_length: default_max_frame_length(),
            write_timeout_ms: default_write_timeout_ms(),
            push_buffer: default_push_buffer(),
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(AlarmError::Config("server.bind must not be empty".to_string()));
        }
        if self.max_frame_length == 0 {
            return Err(AlarmError::Config(
                "server.max_frame_length must be positive".to_string(),
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(AlarmError::Config(
                "server.write_timeout_ms must be positive".to_string(),
            ));
        }
        if self.push_buffer == 0 {
            return Err(AlarmError::Config(
                "server.push_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ROUTER CONFIGURATION
// ============================================================================

/// Per-subscription delivery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Records buffered per subscription before further records are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retries after a failed delivery attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry, doubled on every further retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Time a single delivery attempt may take
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Buffered delivery failure reports
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            report_capacity: default_report_capacity(),
        }
    }
}

impl RouterConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay()
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(AlarmError::Config(
                "router.queue_capacity must be positive".to_string(),
            ));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(AlarmError::Config(
                "router.delivery_timeout_ms must be positive".to_string(),
            ));
        }
        if self.report_capacity == 0 {
            return Err(AlarmError::Config(
                "router.report_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CLIENT CONFIGURATION
// ============================================================================

/// How broadcasters and listeners reach a remote registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Registry server address
    #[serde(default = "default_bind")]
    pub registry_addr: String,

    /// Time allowed for connecting and for one request/reply exchange
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Longest accepted wire frame in bytes
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry_addr: default_bind(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl ClientConfig {
    /// Defaults with the registry address taken from `ALARM_REGISTRY_ADDR` when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(REGISTRY_ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.registry_addr = addr.trim().to_string();
            }
        }
        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.registry_addr.trim().is_empty() {
            return Err(AlarmError::Config(
                "client.registry_addr must not be empty".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(AlarmError::Config(
                "client.request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// META ALARMS
// ============================================================================

/// Aggregate alarm raised by any of its members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaAlarmConfig {
    /// Name of the aggregate alarm
    pub name: String,

    /// Alarms whose raise also raises the aggregate
    pub members: Vec<String>,
}

impl MetaAlarmConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AlarmError::Config("meta alarm name must not be empty".to_string()));
        }
        if self.members.iter().any(|m| m.is_empty()) {
            return Err(AlarmError::Config(format!(
                "meta alarm '{}' has an empty member name",
                self.name
            )));
        }
        if self.members.iter().any(|m| m == &self.name) {
            return Err(AlarmError::Config(format!(
                "meta alarm '{}' lists itself as a member",
                self.name
            )));
        }
        Ok(())
    }
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_bind() -> String { DEFAULT_REGISTRY_ADDR.to_string() }
fn default_max_frame_length() -> usize { 64 * 1024 }
fn default_write_timeout_ms() -> u64 { 5_000 }
fn default_push_buffer() -> usize { 16 }
fn default_queue_capacity() -> usize { 256 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 50 }
fn default_delivery_timeout_ms() -> u64 { 1_000 }
fn default_report_capacity() -> usize { 128 }
fn default_request_timeout_ms() -> u64 { 2_000 }
