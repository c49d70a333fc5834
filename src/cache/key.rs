use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::endpoint::Endpoint;

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Identity of one cache entry: endpoint name plus canonical arguments,
/// optionally scoped to a pagination series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical pagination series. Entries in different series never share data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(pub(crate) u64);

impl SeriesId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "series-{}", self.0)
    }
}

/// Compute the SHA-256 fingerprint for a query.
///
/// The endpoint's fingerprint projection runs first, so arguments it drops
/// (e.g. a pagination cursor) never split an entry.
pub fn fingerprint(endpoint: &Endpoint, args: &Value, series: Option<SeriesId>) -> Fingerprint {
    let projected;
    let keyed = match endpoint.fingerprint {
        Some(project) => {
            projected = project(args);
            &projected
        }
        None => args,
    };

    let mut hasher = Sha256::new();

    // Version prefix to allow for future hashing logic updates
    hasher.update(b"v1:");
    hasher.update(endpoint.name.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(keyed).as_bytes());
    hasher.update(b"|");
    if let Some(series) = series {
        hasher.update(series.0.to_string().as_bytes());
    }

    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Serialize with object keys sorted and `null` members dropped.
///
/// `{"a": 1, "b": null}` and `{"a": 1}` produce the same request, so they
/// must produce the same key.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
