// src/record.rs - Alarm state snapshot exchanged between producers, registry and consumers

use crate::error::{AlarmError, Result};
use crate::identity;
use serde::{Deserialize, Serialize};

/// Severity of a raised alarm. The scale (0 = info .. N = critical) is a
/// convention shared by producers and consumers; the registry never interprets it.
pub type Severity = u8;

/// One point-in-time state of one named alarm.
///
/// Records are immutable once handed to the registry: every raise or clear
/// produces a new record that replaces the previous one for the same name.
///
/// # Examples
///
/// ```rust
/// use alarm_registry::AlarmRecord;
///
/// let record = AlarmRecord::raise("actuator-fault", "/drive_1", "overcurrent", "", 3);
/// assert!(record.raised);
/// assert_eq!(record.severity, 3);
///
/// let cleared = AlarmRecord::clear("actuator-fault", "/drive_1");
/// assert!(!cleared.raised);
/// assert_eq!(cleared.severity, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmRecord {
    /// Identifying name, primary key of the registry
    pub alarm_name: String,

    /// `true` while the condition is active
    pub raised: bool,

    /// Identity of the participant that produced this record
    pub node_name: String,

    /// Human-readable explanation, may be empty
    pub problem_description: String,

    /// Caller-defined payload, typically JSON text
    pub json_parameters: String,

    /// Convention-defined severity
    pub severity: Severity,
}

impl AlarmRecord {
    /// Create a record with an explicit producer identity
    pub fn new(
        alarm_name: impl Into<String>,
        raised: bool,
        node_name: impl Into<String>,
        problem_description: impl Into<String>,
        json_parameters: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            alarm_name: alarm_name.into(),
            raised,
            node_name: node_name.into(),
            problem_description: problem_description.into(),
            json_parameters: json_parameters.into(),
            severity,
        }
    }

    /// Create a record attributed to the calling process
    pub fn from_caller(
        alarm_name: impl Into<String>,
        raised: bool,
        problem_description: impl Into<String>,
        json_parameters: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self::new(
            alarm_name,
            raised,
            identity::default_node_name(),
            problem_description,
            json_parameters,
            severity,
        )
    }

    /// Record for an active condition
    pub fn raise(
        alarm_name: impl Into<String>,
        node_name: impl Into<String>,
        problem_description: impl Into<String>,
        json_parameters: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self::new(alarm_name, true, node_name, problem_description, json_parameters, severity)
    }

    /// Record for a cleared condition: empty description and parameters, severity 0
    pub fn clear(alarm_name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self::new(alarm_name, false, node_name, "", "", 0)
    }

    /// Check the record can become current in a registry
    pub fn validate(&self) -> Result<()> {
        if self.alarm_name.is_empty() {
            return Err(AlarmError::InvalidRecord(
                "alarm_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse `json_parameters` as JSON.
    ///
    /// Returns `Ok(None)` for an empty payload. Only consumers call this; the
    /// registry carries the payload as opaque text.
    pub fn parameters_value(&self) -> Result<Option<serde_json::Value>> {
        if self.json_parameters.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.json_parameters)?))
    }
}
