//! Timestamp and id helpers shared by the journal and JSON output.

use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// JSON result shape for `--format json` command output.
pub fn result_envelope(cmd: &str, set: &str, status: &str, body: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "ts": now_epoch_z(),
        "cmd": cmd,
        "set": set,
        "status": status,
    });
    if let (Some(base_obj), Some(body_obj)) = (base.as_object_mut(), body.as_object()) {
        for (k, v) in body_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
