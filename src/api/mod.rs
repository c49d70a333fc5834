//! Typed endpoint declarations and CRUD wrappers over the cache.
//!
//! Reads go through [`QueryCache::query`] and are deduplicated; writes go
//! through [`QueryCache::mutate`] and invalidate the tags they declare.
//! A call refused by the namespace gate resolves to an empty list or
//! `None`, never to an error.

pub mod alerts;
pub mod apps;
pub mod auth;
pub mod budgets;
pub mod logs;
pub mod policies;
pub mod providers;
pub mod roles;
pub mod users;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::cache::QueryCache;
use crate::endpoint::Endpoint;
use crate::error::{ConsoleError, Result};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Subscribe, wait for the result, and decode it.
pub async fn fetch<T: DeserializeOwned>(cache: &QueryCache, endpoint: &Endpoint, args: Value) -> Result<T> {
    let mut handle = cache.query(endpoint, args);
    handle.settled_as().await
}

pub(crate) async fn list<T: DeserializeOwned>(cache: &QueryCache, endpoint: &Endpoint, args: Value) -> Result<Vec<T>> {
    fetch(cache, endpoint, args).await
}

pub(crate) async fn get<T: DeserializeOwned>(cache: &QueryCache, endpoint: &Endpoint, id: &str) -> Result<Option<T>> {
    fetch(cache, endpoint, json!({ "id": id })).await
}

pub(crate) async fn create<T, I>(cache: &QueryCache, endpoint: &Endpoint, input: &I) -> Result<Option<T>>
where
    T: DeserializeOwned,
    I: Serialize,
{
    let args = serde_json::to_value(input)?;
    cache.mutate_as(endpoint, &args).await
}

pub(crate) async fn update<T, I>(cache: &QueryCache, endpoint: &Endpoint, id: &str, input: &I) -> Result<Option<T>>
where
    T: DeserializeOwned,
    I: Serialize,
{
    let args = with_id(id, input)?;
    cache.mutate_as(endpoint, &args).await
}

pub(crate) async fn delete(cache: &QueryCache, endpoint: &Endpoint, id: &str) -> Result<()> {
    cache.mutate(endpoint, &json!({ "id": id })).await?;
    Ok(())
}

/// Serialize `input` and add the path `id` to it.
fn with_id<I: Serialize>(id: &str, input: &I) -> Result<Value> {
    match serde_json::to_value(input)? {
        Value::Object(mut map) => {
            map.insert("id".to_string(), json!(id));
            Ok(Value::Object(map))
        }
        other => Err(ConsoleError::InvalidArgs(format!(
            "update body must be an object, got {other}"
        ))),
    }
}
