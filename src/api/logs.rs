use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, MergeStrategy, Tag};
use crate::error::Result;
use crate::logs::LogEntry;

pub const NAMESPACE: &str = "/log/";

/// Pages share one cache entry per series; the cursor is not part of the key.
fn without_cursor(args: &Value) -> Value {
    let mut args = args.clone();
    if let Some(map) = args.as_object_mut() {
        map.remove("cursor");
    }
    args
}

/// Newest-first rows; `cursor` is an exclusive upper timestamp bound.
pub const LIST_LOGS: Endpoint = Endpoint::query("log.list", "/log/")
    .namespace(NAMESPACE)
    .provides(&[Tag::Log])
    .merge(MergeStrategy::Append)
    .fingerprint(without_cursor)
    .list();

pub const GET_LOG: Endpoint = Endpoint::query("log.get", "/log/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Log]);

/// Every leg recorded for one request id, tagged by side and direction.
pub const LOG_CORRELATION: Endpoint = Endpoint::query("log.correlation", "/log/correlation/{request_id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Log])
    .list();

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<LogEntry>> {
    super::get(cache, &GET_LOG, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::fingerprint;
    use serde_json::json;

    #[test]
    fn test_cursor_not_in_fingerprint() {
        let a = fingerprint(&LIST_LOGS, &json!({"app": "A1", "limit": 50}), None);
        let b = fingerprint(
            &LIST_LOGS,
            &json!({"app": "A1", "limit": 50, "cursor": "2024-01-01T00:00:00Z"}),
            None,
        );
        assert_eq!(a, b);
    }
}
