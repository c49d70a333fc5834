use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One audit-log row. Fields the console does not model are kept in
/// `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl LogEntry {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Row ids arrive as strings from some backends and integers from others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_keeps_unknown_attributes() {
        let entry: LogEntry = serde_json::from_value(json!({
            "id": 42,
            "timestamp": "2024-01-31T23:59:00.250Z",
            "level": 2,
            "request_id": "req-1",
            "model": "gpt-4o",
            "latency_ms": 812
        }))
        .unwrap();

        assert_eq!(entry.id, "42");
        assert_eq!(entry.level, 2);
        assert_eq!(entry.request_id.as_deref(), Some("req-1"));
        assert_eq!(entry.attribute("model"), Some(&json!("gpt-4o")));
        assert!(entry.raw_request.is_none());
    }

    #[test]
    fn test_missing_timestamp_is_an_error() {
        let result: Result<LogEntry, _> = serde_json::from_value(json!({"id": "a"}));
        assert!(result.is_err());
    }
}
