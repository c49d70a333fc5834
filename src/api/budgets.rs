use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cache::QueryCache;
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Spend limits for one principal (user or app) with current usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    pub monthly_limit: Option<f64>,
    pub daily_limit: Option<f64>,
    #[serde(default)]
    pub monthly_used: f64,
    #[serde(default)]
    pub daily_used: f64,
    #[serde(default)]
    pub period_start: Option<String>,
}

impl Budget {
    /// Fraction of the monthly limit spent, if a limit is set.
    pub fn monthly_utilization(&self) -> Option<f64> {
        self.monthly_limit
            .filter(|limit| *limit > 0.0)
            .map(|limit| self.monthly_used / limit)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BudgetInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub monthly_limit: Option<f64>,
    pub daily_limit: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BudgetQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

pub const NAMESPACE: &str = "/budget/";

pub const LIST_BUDGETS: Endpoint = Endpoint::query("budget.list", "/budget/")
    .namespace(NAMESPACE)
    .provides(&[Tag::Budget])
    .list();

pub const GET_BUDGET: Endpoint = Endpoint::query("budget.get", "/budget/{id}")
    .namespace(NAMESPACE)
    .provides(&[Tag::Budget]);

pub const CREATE_BUDGET: Endpoint = Endpoint::mutation(Method::Post, "budget.create", "/budget/")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Budget]);

pub const UPDATE_BUDGET: Endpoint = Endpoint::mutation(Method::Put, "budget.update", "/budget/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Budget]);

pub const DELETE_BUDGET: Endpoint = Endpoint::mutation(Method::Delete, "budget.delete", "/budget/{id}")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Budget, Tag::Alert]);

/// Zero the usage counters of one budget.
pub const RESET_BUDGET: Endpoint = Endpoint::mutation(Method::Post, "budget.reset", "/budget/{id}/reset")
    .namespace(NAMESPACE)
    .invalidates(&[Tag::Budget]);

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub async fn list(cache: &QueryCache, query: &BudgetQuery) -> Result<Vec<Budget>> {
    super::list(cache, &LIST_BUDGETS, serde_json::to_value(query)?).await
}

pub async fn list_all(cache: &QueryCache) -> Result<Vec<Budget>> {
    super::list(cache, &LIST_BUDGETS, Value::Null).await
}

pub async fn get(cache: &QueryCache, id: &str) -> Result<Option<Budget>> {
    super::get(cache, &GET_BUDGET, id).await
}

pub async fn create(cache: &QueryCache, input: &BudgetInput) -> Result<Option<Budget>> {
    super::create(cache, &CREATE_BUDGET, input).await
}

pub async fn update(cache: &QueryCache, id: &str, input: &BudgetInput) -> Result<Option<Budget>> {
    super::update(cache, &UPDATE_BUDGET, id, input).await
}

pub async fn delete(cache: &QueryCache, id: &str) -> Result<()> {
    super::delete(cache, &DELETE_BUDGET, id).await
}

pub async fn reset(cache: &QueryCache, id: &str) -> Result<Option<Budget>> {
    cache.mutate_as(&RESET_BUDGET, &json!({ "id": id })).await
}
