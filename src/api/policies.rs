use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// Which models a role or app may reach, and through which providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub effect: PolicyEffect,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyInput {
    pub name: String,
    pub effect: PolicyEffect,
    pub providers: Vec<String>,
    pub models: Vec<String>,
    pub priority: i32,
}

pub const NAMESPACE: &str = "/policy/";

pub const LIST_POLICIES: Endpoint = Endpoint::query("policy.list", "/policy/")
    .namespace(NAMESPACE)
    .provides(&[Tag::Policy])
    .list();

pub const GET_POLICY: Endpoint = Endpoint::query("policy.get", "/policy/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Policy]);

pub const CREATE_POLICY: Endpoint = Endpoint::mutation(Method::Post, "policy.create", "/policy/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Policy]);

pub const UPDATE_POLICY: Endpoint = Endpoint::mutation(Method::Put, "policy.update", "/policy/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Policy]);

/// Roles list the policies attached to them.
pub const DELETE_POLICY: Endpoint = Endpoint::mutation(Method::Delete, "policy.delete", "/policy/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Policy, Tag::Role]);

pub async fn list(cache: &QueryCache) -> Result<Vec<Policy>> {
    super::list(cache, &LIST_POLICIES, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<Policy>> {
    super::get(cache, &GET_POLICY, id).await
}

pub async fn create(cache: &QueryCache, input: &PolicyInput) -> Result<Option<Policy>> {
    super::create(cache, &CREATE_POLICY, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &PolicyInput) -> Result<Option<Policy>> {
    super::update(cache, &UPDATE_POLICY, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_POLICY, id).await
}
