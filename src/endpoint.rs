//! Endpoint descriptors: one immutable declaration per server operation.
//!
//! A descriptor says where the operation lives, which namespace gates it,
//! which cache tags its results carry (or which tags it invalidates), and
//! how successive results for the same cache entry are combined.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ConsoleError, Result};

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Logical resource label used to drive bulk invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Provider,
    Budget,
    Alert,
    Policy,
    Role,
    User,
    App,
    Log,
    Profile,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provider => "provider",
            Self::Budget => "budget",
            Self::Alert => "alert",
            Self::Policy => "policy",
            Self::Role => "role",
            Self::User => "user",
            Self::App => "app",
            Self::Log => "log",
            Self::Profile => "profile",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Whether remaining arguments travel in the query string.
    pub fn args_in_query(self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }

    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_reqwest(), f)
    }
}

// ---------------------------------------------------------------------------
// Merge strategy
// ---------------------------------------------------------------------------

pub type MergeFn = fn(&mut Value, Value);
pub type FingerprintFn = fn(&Value) -> Value;
pub type TransformFn = fn(Value) -> Value;

/// How a new result is combined with the data already cached for the
/// same fingerprint when the request arguments moved on (e.g. a cursor).
#[derive(Clone, Copy)]
pub enum MergeStrategy {
    Replace,
    /// Concatenate arrays: `existing.push(...incoming)`.
    Append,
    Custom(MergeFn),
}

impl MergeStrategy {
    pub fn merges(&self) -> bool {
        !matches!(self, Self::Replace)
    }

    pub fn apply(&self, existing: &mut Value, incoming: Value) {
        match self {
            Self::Replace => *existing = incoming,
            Self::Append => match (existing, incoming) {
                (Value::Array(rows), Value::Array(more)) => rows.extend(more),
                (slot, incoming) => *slot = incoming,
            },
            Self::Custom(merge) => merge(existing, incoming),
        }
    }
}

impl fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => f.write_str("Replace"),
            Self::Append => f.write_str("Append"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// What a gated or empty call resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    List,
    Item,
}

impl Shape {
    pub fn empty_value(self) -> Value {
        match self {
            Self::List => Value::Array(Vec::new()),
            Self::Item => Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Immutable declaration of one server operation.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    /// Stable identity used in fingerprints and logs.
    pub name: &'static str,
    pub method: Method,
    /// Path template; `{param}` segments are filled from the arguments.
    pub path: &'static str,
    pub namespace: Option<&'static str>,
    pub provides: &'static [Tag],
    pub invalidates: &'static [Tag],
    pub merge: MergeStrategy,
    /// Projection of the arguments used for the cache key.
    pub fingerprint: Option<FingerprintFn>,
    /// Applied to the decoded response before it reaches the cache.
    pub transform: Option<TransformFn>,
    pub shape: Shape,
}

impl Endpoint {
    /// A cacheable read.
    pub const fn query(name: &'static str, path: &'static str) -> Self {
        Self {
            name,
            method: Method::Get,
            path,
            namespace: None,
            provides: &[],
            invalidates: &[],
            merge: MergeStrategy::Replace,
            fingerprint: None,
            transform: None,
            shape: Shape::Item,
        }
    }

    /// A write whose success invalidates tags.
    pub const fn mutation(method: Method, name: &'static str, path: &'static str) -> Self {
        Self {
            method,
            ..Self::query(name, path)
        }
    }

    pub const fn namespace(mut self, namespace: &'static str) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub const fn provides(mut self, tags: &'static [Tag]) -> Self {
        self.provides = tags;
        self
    }

    pub const fn invalidates(mut self, tags: &'static [Tag]) -> Self {
        self.invalidates = tags;
        self
    }

    pub const fn merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    pub const fn fingerprint(mut self, f: FingerprintFn) -> Self {
        self.fingerprint = Some(f);
        self
    }

    pub const fn transform(mut self, f: TransformFn) -> Self {
        self.transform = Some(f);
        self
    }

    pub const fn list(mut self) -> Self {
        self.shape = Shape::List;
        self
    }

    pub fn empty_value(&self) -> Value {
        self.shape.empty_value()
    }

    /// Turn arguments into a concrete request.
    ///
    /// Path parameters are consumed first; what remains goes to the query
    /// string for GET/DELETE and to the JSON body otherwise. `null` fields
    /// are dropped.
    pub fn build_request(&self, args: &Value) -> Result<ApiRequest> {
        let mut remaining: Map<String, Value> = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ConsoleError::InvalidArgs(format!(
                    "{}: arguments must be an object, got {other}",
                    self.name
                )));
            }
        };
        remaining.retain(|_, v| !v.is_null());

        let mut segments = Vec::new();
        for raw in self.path.trim_start_matches('/').split('/') {
            match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(param) => {
                    let value = remaining.remove(param).ok_or_else(|| {
                        ConsoleError::InvalidArgs(format!(
                            "{}: missing path parameter '{param}'",
                            self.name
                        ))
                    })?;
                    segments.push(scalar_to_string(&value).ok_or_else(|| {
                        ConsoleError::InvalidArgs(format!(
                            "{}: path parameter '{param}' must be a scalar",
                            self.name
                        ))
                    })?);
                }
                None => segments.push(raw.to_string()),
            }
        }

        let (query, body) = if self.method.args_in_query() {
            let mut query = Vec::new();
            for (key, value) in &remaining {
                match value {
                    Value::Array(items) => {
                        query.extend(
                            items
                                .iter()
                                .filter_map(scalar_to_string)
                                .map(|v| (key.clone(), v)),
                        );
                    }
                    other => {
                        if let Some(v) = scalar_to_string(other) {
                            query.push((key.clone(), v));
                        }
                    }
                }
            }
            (query, None)
        } else if remaining.is_empty() && args.is_null() {
            (Vec::new(), None)
        } else {
            (Vec::new(), Some(Value::Object(remaining)))
        };

        Ok(ApiRequest {
            endpoint: self.name,
            method: self.method,
            segments,
            query,
            body,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A fully resolved request, ready for a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub endpoint: &'static str,
    pub method: Method,
    /// Path segments relative to the API base URL, unencoded.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
