use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserInput {
    pub name: String,
    pub role: String,
    /// Only sent when setting or rotating a password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

pub const NAMESPACE: &str = "/user/";

pub const LIST_USERS: Endpoint = Endpoint::query("user.list", "/user/")
    .namespace(NAMESPACE)
    .provides(&[Tag::User])
    .list();

pub const GET_USER: Endpoint = Endpoint::query("user.get", "/user/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::User]);

pub const CREATE_USER: Endpoint = Endpoint::mutation(Method::Post, "user.create", "/user/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::User]);

pub const UPDATE_USER: Endpoint = Endpoint::mutation(Method::Put, "user.update", "/user/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::User]);

/// Budgets can be attached to the deleted user.
pub const DELETE_USER: Endpoint = Endpoint::mutation(Method::Delete, "user.delete", "/user/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::User, Tag::Budget]);

pub async fn list(cache: &QueryCache) -> Result<Vec<User>> {
    super::list(cache, &LIST_USERS, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<User>> {
    super::get(cache, &GET_USER, id).await
}

pub async fn create(cache: &QueryCache, input: &UserInput) -> Result<Option<User>> {
    super::create(cache, &CREATE_USER, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &UserInput) -> Result<Option<User>> {
    super::update(cache, &UPDATE_USER, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_USER, id).await
}
