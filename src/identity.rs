//! Participant identity used as the default `node_name` of produced records.

use std::path::Path;

/// Identity recorded when a record is produced without an explicit node name
pub const UNKNOWN_NODE: &str = "unknown";

/// Derive this process' node name as `/<executable>_<pid>`.
///
/// Falls back to [`UNKNOWN_NODE`] for the executable part when the current
/// executable cannot be determined.
pub fn default_node_name() -> String {
    let exe = std::env::current_exe()
        .ok()
        .and_then(|path| executable_stem(&path))
        .unwrap_or_else(|| UNKNOWN_NODE.to_string());

    format!("/{}_{}", exe, std::process::id())
}

fn executable_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| stem.to_string())
}
