//! Meta alarms: aggregates raised whenever one of their member alarms is raised.

use crate::config::MetaAlarmConfig;
use crate::record::AlarmRecord;
use std::collections::HashMap;

/// Lookup from member alarm name to the meta alarms it feeds
#[derive(Debug, Clone, Default)]
pub struct MetaAlarms {
    by_member: HashMap<String, Vec<String>>,
}

impl MetaAlarms {
    pub fn from_config(configs: &[MetaAlarmConfig]) -> Self {
        let mut by_member: HashMap<String, Vec<String>> = HashMap::new();
        for meta in configs {
            for member in &meta.members {
                let metas = by_member.entry(member.clone()).or_default();
                if !metas.contains(&meta.name) {
                    metas.push(meta.name.clone());
                }
            }
        }
        Self { by_member }
    }

    /// Meta alarms fed by `member`
    pub fn metas_for(&self, member: &str) -> &[String] {
        self.by_member.get(member).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }
}

/// Build the next record of meta alarm `meta_name` after `member` was raised.
///
/// The meta alarm takes the member's node and the higher of the member's
/// severity and its own current severity while it is still raised. Its
/// description and parameters are kept from its current record.
pub fn escalate(meta_name: &str, current: Option<&AlarmRecord>, member: &AlarmRecord) -> AlarmRecord {
    let severity = match current {
        Some(current) if current.raised => current.severity.max(member.severity),
        _ => member.severity,
    };

    let (problem_description, json_parameters) = match current {
        Some(current) if !current.problem_description.is_empty() => (
            current.problem_description.clone(),
            current.json_parameters.clone(),
        ),
        Some(current) => (
            format!("raised by member alarm '{}'", member.alarm_name),
            current.json_parameters.clone(),
        ),
        None => (
            format!("raised by member alarm '{}'", member.alarm_name),
            String::new(),
        ),
    };

    AlarmRecord::raise(
        meta_name,
        member.node_name.clone(),
        problem_description,
        json_parameters,
        severity,
    )
}
