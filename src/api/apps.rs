use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

/// A client application calling the gateway with its own API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    /// First characters of the key, for recognition only.
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

pub const NAMESPACE: &str = "/app/";

pub const LIST_APPS: Endpoint = Endpoint::query("app.list", "/app/")
    .namespace(NAMESPACE)
    .provides(&[Tag::App])
    .list();

pub const GET_APP: Endpoint = Endpoint::query("app.get", "/app/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::App]);

pub const CREATE_APP: Endpoint = Endpoint::mutation(Method::Post, "app.create", "/app/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::App]);

pub const UPDATE_APP: Endpoint = Endpoint::mutation(Method::Put, "app.update", "/app/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::App]);

pub const DELETE_APP: Endpoint = Endpoint::mutation(Method::Delete, "app.delete", "/app/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::App, Tag::Budget]);

pub async fn list(cache: &QueryCache) -> Result<Vec<App>> {
    super::list(cache, &LIST_APPS, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<App>> {
    super::get(cache, &GET_APP, id).await
}

pub async fn create(cache: &QueryCache, input: &AppInput) -> Result<Option<App>> {
    super::create(cache, &CREATE_APP, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &AppInput) -> Result<Option<App>> {
    super::update(cache, &UPDATE_APP, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_APP, id).await
}
