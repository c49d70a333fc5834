use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

/// A named bundle of namespaces and policies assigned to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    /// Resource namespaces granted, e.g. `/budget/`.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub policy_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleInput {
    pub name: String,
    pub namespaces: Vec<String>,
    pub policy_ids: Vec<String>,
}

pub const NAMESPACE: &str = "/role/";

pub const LIST_ROLES: Endpoint = Endpoint::query("role.list", "/role/")
    .namespace(NAMESPACE)
    .provides(&[Tag::Role])
    .list();

pub const GET_ROLE: Endpoint = Endpoint::query("role.get", "/role/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Role]);

pub const CREATE_ROLE: Endpoint = Endpoint::mutation(Method::Post, "role.create", "/role/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Role]);

/// A role edit can change what the current caller may see.
pub const UPDATE_ROLE: Endpoint = Endpoint::mutation(Method::Put, "role.update", "/role/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Role, Tag::User, Tag::Profile]);

pub const DELETE_ROLE: Endpoint = Endpoint::mutation(Method::Delete, "role.delete", "/role/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Role, Tag::User, Tag::Profile]);

pub async fn list(cache: &QueryCache) -> Result<Vec<Role>> {
    super::list(cache, &LIST_ROLES, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<Role>> {
    super::get(cache, &GET_ROLE, id).await
}

pub async fn create(cache: &QueryCache, input: &RoleInput) -> Result<Option<Role>> {
    super::create(cache, &CREATE_ROLE, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &RoleInput) -> Result<Option<Role>> {
    super::update(cache, &UPDATE_ROLE, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_ROLE, id).await
}
