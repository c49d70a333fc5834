use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

/// Fires when a budget crosses `threshold` (a fraction of its limit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub budget_id: Option<String>,
    pub threshold: f64,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub last_triggered_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_id: Option<String>,
    pub threshold: f64,
    pub channels: Vec<String>,
    pub enabled: bool,
}

pub const NAMESPACE: &str = "/alert/";

pub const LIST_ALERTS: Endpoint = Endpoint::query("alert.list", "/alert/")
    .namespace(NAMESPACE)
    .provides(&[Tag::Alert])
    .list();

pub const GET_ALERT: Endpoint = Endpoint::query("alert.get", "/alert/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Alert]);

pub const CREATE_ALERT: Endpoint = Endpoint::mutation(Method::Post, "alert.create", "/alert/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Alert]);

pub const UPDATE_ALERT: Endpoint = Endpoint::mutation(Method::Put, "alert.update", "/alert/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Alert]);

pub const DELETE_ALERT: Endpoint = Endpoint::mutation(Method::Delete, "alert.delete", "/alert/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Alert]);

pub async fn list(cache: &QueryCache) -> Result<Vec<Alert>> {
    super::list(cache, &LIST_ALERTS, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<Alert>> {
    super::get(cache, &GET_ALERT, id).await
}

pub async fn create(cache: &QueryCache, input: &AlertInput) -> Result<Option<Alert>> {
    super::create(cache, &CREATE_ALERT, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &AlertInput) -> Result<Option<Alert>> {
    super::update(cache, &UPDATE_ALERT, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_ALERT, id).await
}
