use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::error::{ConsoleError, Result};

// ---------------------------------------------------------------------------
// Query state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// What subscribers of one cache entry observe.
///
/// `data` survives a failed refetch; `error` is only set while `Rejected`.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<ConsoleError>,
    /// The last result came from the namespace gate, not the backend.
    pub gated: bool,
    /// Invalidated and not yet refetched.
    pub stale: bool,
    pub fulfilled_at: Option<Instant>,
    /// Request sequence of the response that produced `data`; 0 before
    /// the first successful response.
    pub seq: u64,
    /// `data` was produced by folding that response into earlier data.
    pub merged: bool,
    /// Arguments of the request that produced `data`.
    pub args: Value,
}

impl QueryState {
    pub(crate) fn pending() -> Self {
        Self {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            gated: false,
            stale: false,
            fulfilled_at: None,
            seq: 0,
            merged: false,
            args: Value::Null,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// The settled outcome. A pending entry reports its last data, if any.
    pub fn result(&self) -> Result<Value> {
        match (&self.status, &self.error) {
            (QueryStatus::Rejected, Some(err)) => Err(err.clone()),
            _ => Ok(self.data.clone().unwrap_or(Value::Null)),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats (atomic counters, lock-free)
// ---------------------------------------------------------------------------

/// Runtime cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub dedups: AtomicU64,
    pub refetches: AtomicU64,
    pub invalidations: AtomicU64,
    pub discarded: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let dedups = self.dedups.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + dedups + misses;
        let hit_rate = if total > 0 {
            (hits + dedups) as f64 / total as f64
        } else {
            0.0
        };
        CacheStatsSnapshot {
            hits,
            misses,
            dedups,
            refetches: self.refetches.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

/// Serializable snapshot of cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Subscribers that attached to an in-flight request.
    pub dedups: u64,
    pub refetches: u64,
    pub invalidations: u64,
    /// Late responses dropped because a newer request superseded them.
    pub discarded: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}
