// src/transport/protocol.rs - Wire frames exchanged with a remote registry
//
// One JSON document per line. Requests are tagged by "op", responses by
// "reply". A connection carries any number of request/response exchanges
// until it subscribes, after which it only carries pushed updates.

use crate::error::{AlarmError, Result};
use crate::record::{AlarmRecord, Severity};
use serde::{Deserialize, Serialize};

/// Alarm as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmMessage {
    pub alarm_name: String,
    pub raised: bool,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub problem_description: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub severity: Severity,
}

impl From<AlarmRecord> for AlarmMessage {
    fn from(record: AlarmRecord) -> Self {
        Self {
            alarm_name: record.alarm_name,
            raised: record.raised,
            node_name: record.node_name,
            problem_description: record.problem_description,
            parameters: record.json_parameters,
            severity: record.severity,
        }
    }
}

impl From<AlarmMessage> for AlarmRecord {
    fn from(msg: AlarmMessage) -> Self {
        AlarmRecord::new(
            msg.alarm_name,
            msg.raised,
            msg.node_name,
            msg.problem_description,
            msg.parameters,
            msg.severity,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Make `alarm` the current record of its name
    Update { alarm: AlarmMessage },

    /// Current record of one alarm, or of all alarms when the name is absent
    Get {
        #[serde(default)]
        alarm_name: Option<String>,
    },

    /// Turn the connection into a push stream for one alarm, or for all
    Subscribe {
        #[serde(default)]
        alarm_name: Option<String>,
    },
}

/// Category of a rejected request, preserved across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    InvalidRecord,
    BadRequest,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Response {
    /// Update accepted
    Ack,

    /// Request refused
    Rejected { kind: RejectKind, reason: String },

    /// Answer to a single-alarm get
    Alarm { alarm: Option<AlarmMessage> },

    /// Answer to a get without a name
    Alarms { alarms: Vec<AlarmMessage> },

    /// Subscription established, pushes follow
    Subscribed { subscription: u64 },

    /// Pushed on a subscribed connection
    Update { alarm: AlarmMessage },
}

impl Response {
    pub fn rejected(err: &AlarmError) -> Self {
        let kind = match err {
            AlarmError::InvalidRecord(_) => RejectKind::InvalidRecord,
            AlarmError::Json(_) => RejectKind::BadRequest,
            _ => RejectKind::Internal,
        };
        let reason = match err {
            // Keep the bare reason so the client can rebuild the same error
            AlarmError::InvalidRecord(reason) => reason.clone(),
            other => other.to_string(),
        };
        Response::Rejected { kind, reason }
    }

    /// Error a client should surface for a rejection
    pub fn rejection_error(kind: RejectKind, reason: String) -> AlarmError {
        match kind {
            RejectKind::InvalidRecord => AlarmError::InvalidRecord(reason),
            RejectKind::BadRequest | RejectKind::Internal => {
                AlarmError::Transport(format!("registry rejected request: {}", reason))
            }
        }
    }
}

/// Serialize one frame without its line terminator
pub fn encode<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse one frame
pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    Ok(serde_json::from_str(line)?)
}
