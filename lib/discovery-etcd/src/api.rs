//! etcd v2 keys API wire types

use discovery_core::{CoreError, StoreAction, StoreEvent};
use serde::Deserialize;

pub const KEY_NOT_FOUND: u64 = 100;
pub const TEST_FAILED: u64 = 101;
pub const NOT_FILE: u64 = 102;
pub const NOT_DIR: u64 = 104;
pub const NODE_EXIST: u64 = 105;
pub const EVENT_INDEX_CLEARED: u64 = 401;

/// Response header carrying the cluster's current index, present on errors too
pub const ETCD_INDEX_HEADER: &str = "X-Etcd-Index";

/// Successful response body
#[derive(Clone, Debug, Deserialize)]
pub struct EtcdResponse {
    pub action: String,
    pub node: EtcdNode,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdNode {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub modified_index: u64,
}

/// Error response body
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdError {
    pub error_code: u64,
    pub message: String,
    /// Cluster index at the time of the error
    #[serde(default)]
    pub index: u64,
}

impl EtcdError {
    /// Map an etcd error onto the core taxonomy
    pub fn into_core(self, path: &str) -> CoreError {
        match self.error_code {
            TEST_FAILED | NODE_EXIST | KEY_NOT_FOUND => CoreError::Conflict(path.to_string()),
            // 300-class codes are raft / cluster failures
            300..=399 => CoreError::StoreUnavailable(format!(
                "etcd error {} on {}: {}",
                self.error_code, path, self.message
            )),
            code => CoreError::Internal(format!("etcd error {} on {}: {}", code, path, self.message)),
        }
    }
}

pub fn store_action(action: &str) -> Option<StoreAction> {
    match action {
        "set" | "update" | "create" | "compareAndSwap" => Some(StoreAction::Set),
        "delete" | "compareAndDelete" => Some(StoreAction::Delete),
        "expire" => Some(StoreAction::Expire),
        _ => None,
    }
}

pub fn parse_etcd_index(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

/// Position of a long-poll watch in the cluster's event history
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchCursor {
    wait_index: Option<u64>,
}

impl WatchCursor {
    /// Cursor that delivers every change made after cluster index `index`.
    /// Without an index the first poll only sees changes made after it is sent.
    pub fn after(index: Option<u64>) -> Self {
        Self {
            wait_index: index.map(|i| i + 1),
        }
    }

    pub fn wait_index(&self) -> Option<u64> {
        self.wait_index
    }

    /// Query parameters for the next long poll
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("wait", "true".to_string())];
        if let Some(index) = self.wait_index {
            params.push(("waitIndex", index.to_string()));
        }
        params
    }

    /// Move past an event seen at `modified_index`
    pub fn advance(&mut self, modified_index: u64) {
        self.wait_index = Some(modified_index + 1);
    }
}

impl EtcdResponse {
    /// Convert a watch response into a store event; `None` for actions we ignore
    pub fn into_event(self) -> Option<StoreEvent> {
        let action = store_action(&self.action)?;
        let value = match action {
            StoreAction::Set => self.node.value,
            _ => None,
        };
        Some(StoreEvent {
            path: self.node.key,
            action,
            value,
            version: self.node.modified_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_response() {
        let body = r#"{"action":"get","node":{"key":"/services/svc","value":"{\"uri\":[\"a:1\"]}","modifiedIndex":7,"createdIndex":5}}"#;
        let resp: EtcdResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.node.key, "/services/svc");
        assert_eq!(resp.node.value.as_deref(), Some(r#"{"uri":["a:1"]}"#));
        assert_eq!(resp.node.modified_index, 7);
        assert!(!resp.node.dir);
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{"errorCode":101,"message":"Compare failed","cause":"[3 != 4]","index":9}"#;
        let err: EtcdError = serde_json::from_str(body).unwrap();
        assert_eq!(err.error_code, TEST_FAILED);
        assert_eq!(err.index, 9);
        assert!(matches!(err.into_core("/services/svc"), CoreError::Conflict(_)));
    }

    #[test]
    fn test_error_classification() {
        let err = |code| EtcdError {
            error_code: code,
            message: "x".to_string(),
            index: 0,
        };
        assert!(err(300).into_core("/a").is_unavailable());
        assert!(matches!(err(NODE_EXIST).into_core("/a"), CoreError::Conflict(_)));
        assert!(matches!(err(NOT_FILE).into_core("/a"), CoreError::Internal(_)));
    }

    #[test]
    fn test_watch_events() {
        let set: EtcdResponse = serde_json::from_str(
            r#"{"action":"compareAndSwap","node":{"key":"/s/a","value":"v","modifiedIndex":12}}"#,
        )
        .unwrap();
        let event = set.into_event().unwrap();
        assert_eq!(event.action, StoreAction::Set);
        assert_eq!(event.value.as_deref(), Some("v"));
        assert_eq!(event.version, 12);

        let delete: EtcdResponse = serde_json::from_str(
            r#"{"action":"compareAndDelete","node":{"key":"/s/a","modifiedIndex":13}}"#,
        )
        .unwrap();
        let event = delete.into_event().unwrap();
        assert_eq!(event.action, StoreAction::Delete);
        assert_eq!(event.value, None);

        let get: EtcdResponse =
            serde_json::from_str(r#"{"action":"get","node":{"key":"/s/a","value":"v"}}"#).unwrap();
        assert!(get.into_event().is_none());
    }

    #[test]
    fn test_parse_etcd_index() {
        assert_eq!(parse_etcd_index("42"), Some(42));
        assert_eq!(parse_etcd_index(" 7 "), Some(7));
        assert_eq!(parse_etcd_index("n/a"), None);
    }

    #[test]
    fn test_cursor_starts_right_after_priming_read() {
        // primed at index 10; a write landing at 11 before the first poll must be seen
        let cursor = WatchCursor::after(Some(10));
        assert_eq!(cursor.wait_index(), Some(11));
        assert!(cursor.wait_index().unwrap() <= 11);
        assert_eq!(
            cursor.params(),
            vec![("wait", "true".to_string()), ("waitIndex", "11".to_string())]
        );
    }

    #[test]
    fn test_cursor_advances_past_each_event() {
        let mut cursor = WatchCursor::after(Some(10));
        cursor.advance(14);
        assert_eq!(cursor.wait_index(), Some(15));
        cursor.advance(15);
        assert_eq!(cursor.wait_index(), Some(16));
    }

    #[test]
    fn test_cursor_without_index_waits_for_next_change() {
        let cursor = WatchCursor::after(None);
        assert_eq!(cursor.wait_index(), None);
        assert_eq!(cursor.params(), vec![("wait", "true".to_string())]);
    }
}
