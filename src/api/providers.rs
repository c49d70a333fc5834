use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// Upstream flavour, e.g. `openai`, `claude`, `gemini`, `litellm`.
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderInput {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Write-only; never returned by the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

pub const NAMESPACE: &str = "/provider/";

pub const LIST_PROVIDERS: Endpoint = Endpoint::query("provider.list", "/provider/")
    .namespace(NAMESPACE)
    .provides(&[Tag::Provider])
    .list();

pub const GET_PROVIDER: Endpoint = Endpoint::query("provider.get", "/provider/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Provider]);

pub const CREATE_PROVIDER: Endpoint = Endpoint::mutation(Method::Post, "provider.create", "/provider/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Provider]);

pub const UPDATE_PROVIDER: Endpoint = Endpoint::mutation(Method::Put, "provider.update", "/provider/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Provider]);

/// Budgets and policies may reference the provider.
pub const DELETE_PROVIDER: Endpoint = Endpoint::mutation(Method::Delete, "provider.delete", "/provider/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Provider, Tag::Budget, Tag::Policy]);

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub async fn list(cache: &QueryCache) -> Result<Vec<Provider>> {
    super::list(cache, &LIST_PROVIDERS, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<Provider>> {
    super::get(cache, &GET_PROVIDER, id).await
}

pub async fn create(cache: &QueryCache, input: &ProviderInput) -> Result<Option<Provider>> {
    super::create(cache, &CREATE_PROVIDER, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &ProviderInput) -> Result<Option<Provider>> {
    super::update(cache, &UPDATE_PROVIDER, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_PROVIDER, id).await
}
