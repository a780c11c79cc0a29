//! Push-channel frames.

use serde::Deserialize;
use serde_json::{Value, json};

use scriptsync_core::ScriptId;

/// Notification method that reports component status changes.
pub const NOTIFY_STATUS: &str = "NotifyStatus";

/// Key prefix of script components in notification params.
const SCRIPT_KEY_PREFIX: &str = "script:";

/// A `{"method", "params"}` frame pushed by the device.
///
/// Responses to our own requests carry no `method` and fail to parse as one.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Ids of the scripts this notification reports on, in key order.
    pub fn script_ids(&self) -> Vec<ScriptId> {
        if self.method != NOTIFY_STATUS {
            return Vec::new();
        }
        let Some(params) = self.params.as_object() else {
            return Vec::new();
        };
        params
            .keys()
            .filter_map(|key| key.strip_prefix(SCRIPT_KEY_PREFIX))
            .filter_map(|id| id.parse().ok())
            .collect()
    }
}

/// Script ids referenced by a raw text frame. Anything unparsable is ignored.
pub fn script_ids_in_frame(text: &str) -> Vec<ScriptId> {
    serde_json::from_str::<Notification>(text)
        .map(|n| n.script_ids())
        .unwrap_or_default()
}

/// First frame sent after connecting. The device only pushes notifications
/// to peers that have identified themselves with a request.
pub fn identify_frame(client_id: &str) -> String {
    json!({
        "id": 1,
        "src": client_id,
        "method": "Shelly.GetStatus",
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_notification_for_scripts() {
        let frame = r#"{
            "src": "shellyplus1-a8032ab",
            "dst": "scriptsync",
            "method": "NotifyStatus",
            "params": {
                "ts": 1700000000.5,
                "script:1": {"id": 1, "running": false},
                "script:3": {"running": true}
            }
        }"#;
        assert_eq!(script_ids_in_frame(frame), vec![1, 3]);
    }

    #[test]
    fn non_script_components_are_ignored() {
        let frame = r#"{"method": "NotifyStatus", "params": {"switch:0": {"output": true}}}"#;
        assert!(script_ids_in_frame(frame).is_empty());
    }

    #[test]
    fn other_methods_are_ignored() {
        let frame = r#"{"method": "NotifyEvent", "params": {"script:1": {}}}"#;
        assert!(script_ids_in_frame(frame).is_empty());
    }

    #[test]
    fn responses_and_garbage_are_ignored() {
        assert!(script_ids_in_frame(r#"{"id": 1, "result": {"script:1": {}}}"#).is_empty());
        assert!(script_ids_in_frame("not json").is_empty());
        assert!(script_ids_in_frame(r#"{"method": "NotifyStatus", "params": []}"#).is_empty());
    }

    #[test]
    fn bad_script_key_is_skipped() {
        let frame = r#"{"method": "NotifyStatus", "params": {"script:x": {}, "script:2": {}}}"#;
        assert_eq!(script_ids_in_frame(frame), vec![2]);
    }

    #[test]
    fn identify_frame_shape() {
        let v: Value = serde_json::from_str(&identify_frame("scriptsync-abc")).unwrap_or_default();
        assert_eq!(v["id"], 1);
        assert_eq!(v["src"], "scriptsync-abc");
        assert_eq!(v["method"], "Shelly.GetStatus");
    }
}
