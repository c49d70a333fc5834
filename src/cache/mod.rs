//! Tagged Response Cache.
//!
//! Entries are keyed by [`Fingerprint`] and indexed by the tags their
//! endpoint provides. Concurrent subscribers to the same fingerprint share
//! one request; a successful mutation marks every entry under its declared
//! tags stale and refetches those that still have subscribers.
//!
//! Every entry carries a request sequence number. A response whose number
//! is no longer current is discarded, so a slow early request can never
//! overwrite a later one.

pub mod clock;
pub mod key;
pub mod types;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::endpoint::{Endpoint, Tag};
use crate::error::{ConsoleError, Result};
use crate::transport::{AuthorizedTransport, Dispatch};

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::key::{Fingerprint, SeriesId};
pub use self::types::{CacheStats, CacheStatsSnapshot, QueryState, QueryStatus};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Retention and freshness knobs.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// How long an entry without subscribers survives garbage collection.
    pub keep_unused: Duration,
    /// Age after which a new subscriber triggers a refetch.
    pub refetch_after: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            keep_unused: Duration::from_secs(60),
            refetch_after: None,
        }
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            keep_unused: config.keep_unused(),
            refetch_after: config.refetch_after(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

struct CacheEntry {
    /// Distinguishes this entry from a later one under the same fingerprint.
    id: u64,
    endpoint: Endpoint,
    state: watch::Sender<QueryState>,
    subscribers: usize,
    unused_since: Option<Instant>,
    /// Sequence number of the only request whose response may land.
    request_seq: u64,
    last_args: Value,
    /// Arguments that started the current series of merged results.
    head_args: Value,
}

impl CacheEntry {
    /// Whether the data held (or being fetched) already answers `args`.
    fn covers(&self, args: &Value) -> bool {
        self.last_args == *args || (self.endpoint.merge.merges() && self.head_args == *args)
    }
}

#[derive(Default)]
struct Store {
    entries: HashMap<Fingerprint, CacheEntry>,
    by_tag: HashMap<Tag, HashSet<Fingerprint>>,
}

impl Store {
    fn insert(&mut self, fingerprint: Fingerprint, entry: CacheEntry) {
        for tag in entry.endpoint.provides {
            self.by_tag
                .entry(*tag)
                .or_default()
                .insert(fingerprint.clone());
        }
        self.entries.insert(fingerprint, entry);
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(fingerprint)?;
        for tag in entry.endpoint.provides {
            if let Some(set) = self.by_tag.get_mut(tag) {
                set.remove(fingerprint);
                if set.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

struct CacheInner {
    transport: AuthorizedTransport,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    store: Mutex<Store>,
    stats: CacheStats,
    ids: AtomicU64,
}

impl CacheInner {
    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Land a response. Runs on the fetch task.
    fn complete(
        &self,
        fingerprint: &Fingerprint,
        seq: u64,
        merge: bool,
        args: Value,
        result: Result<Dispatch>,
    ) {
        let mut store = self.store();

        let Some(entry) = store.entries.get_mut(fingerprint) else {
            tracing::debug!(fingerprint = fingerprint.short(), "Entry gone; response dropped");
            return;
        };

        if entry.request_seq != seq {
            CacheStats::bump(&self.stats.discarded);
            tracing::debug!(
                endpoint = entry.endpoint.name,
                seq,
                current = entry.request_seq,
                "Superseded response discarded"
            );
            return;
        }

        if entry.subscribers == 0 {
            CacheStats::bump(&self.stats.discarded);
            tracing::debug!(endpoint = entry.endpoint.name, "No subscribers left; response dropped");
            if entry.state.borrow().data.is_some() {
                entry.state.send_modify(|s| {
                    s.status = QueryStatus::Fulfilled;
                    s.error = None;
                    s.stale = true;
                });
            } else {
                store.remove(fingerprint);
            }
            return;
        }

        let endpoint = entry.endpoint;
        let now = self.clock.now();
        match result {
            Ok(dispatch) => {
                let gated = dispatch.is_gated();
                let value = dispatch.into_value(&endpoint);
                entry.state.send_modify(|s| {
                    s.merged = match (&mut s.data, merge) {
                        (Some(existing), true) => {
                            endpoint.merge.apply(existing, value);
                            true
                        }
                        (slot, _) => {
                            *slot = Some(value);
                            false
                        }
                    };
                    s.seq = seq;
                    s.args = args;
                    s.status = QueryStatus::Fulfilled;
                    s.error = None;
                    s.gated = gated;
                    s.stale = false;
                    s.fulfilled_at = Some(now);
                });
                tracing::debug!(endpoint = endpoint.name, merge, gated, "Query fulfilled");
            }
            Err(err) => {
                tracing::debug!(endpoint = endpoint.name, error = %err, "Query rejected");
                entry.state.send_modify(|s| {
                    s.status = QueryStatus::Rejected;
                    s.error = Some(err);
                    s.stale = false;
                });
            }
        }
    }
}

/// Issue a request for `entry` and mark it pending.
///
/// `merge` folds the response into the existing data through the
/// endpoint's merge strategy; otherwise the response replaces it and
/// `args` becomes the head of a new series.
fn start_fetch(
    inner: &Arc<CacheInner>,
    fingerprint: &Fingerprint,
    entry: &mut CacheEntry,
    args: Value,
    merge: bool,
) {
    let seq = inner.next_id();
    entry.request_seq = seq;
    entry.last_args = args.clone();
    if !merge {
        entry.head_args = args.clone();
    }
    entry.state.send_modify(|s| s.status = QueryStatus::Pending);

    let inner = Arc::clone(inner);
    let endpoint = entry.endpoint;
    let fingerprint = fingerprint.clone();
    tokio::spawn(async move {
        let result = inner.transport.execute(&endpoint, &args).await;
        inner.complete(&fingerprint, seq, merge, args, result);
    });
}

enum Reuse {
    Cached,
    InFlight,
    Refetch,
    /// Stale or past the freshness window: start over from the head.
    Restart,
}

// ---------------------------------------------------------------------------
// QueryCache -- public facade
// ---------------------------------------------------------------------------

/// Explicitly constructed, shareable response cache.
///
/// Cloning is cheap and yields a handle to the same cache. [`query`] and
/// [`mutate`] spawn onto the current Tokio runtime.
///
/// [`query`]: QueryCache::query
/// [`mutate`]: QueryCache::mutate
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(transport: AuthorizedTransport, policy: CachePolicy) -> Self {
        Self::with_clock(transport, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: AuthorizedTransport,
        policy: CachePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                transport,
                clock,
                policy,
                store: Mutex::new(Store::default()),
                stats: CacheStats::new(),
                ids: AtomicU64::new(0),
            }),
        }
    }

    pub fn transport(&self) -> &AuthorizedTransport {
        &self.inner.transport
    }

    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    /// Subscribe to `endpoint` with `args`, fetching only if needed.
    pub fn query(&self, endpoint: &Endpoint, args: Value) -> QueryHandle {
        self.subscribe(endpoint, args, None)
    }

    /// Like [`query`](Self::query) but scoped to a pagination series.
    pub fn query_in_series(&self, endpoint: &Endpoint, args: Value, series: SeriesId) -> QueryHandle {
        self.subscribe(endpoint, args, Some(series))
    }

    /// A fresh series identifier, never handed out before.
    pub fn next_series(&self) -> SeriesId {
        SeriesId(self.inner.next_id())
    }

    fn subscribe(&self, endpoint: &Endpoint, args: Value, series: Option<SeriesId>) -> QueryHandle {
        let fingerprint = key::fingerprint(endpoint, &args, series);
        let now = self.inner.clock.now();
        let mut store = self.inner.store();

        if let Some(entry) = store.entries.get_mut(&fingerprint) {
            entry.subscribers += 1;
            entry.unused_since = None;

            let reuse = {
                let state = entry.state.borrow();
                let covered = entry.covers(&args);
                let expired = match (self.inner.policy.refetch_after, state.fulfilled_at) {
                    (Some(window), Some(at)) => now.saturating_duration_since(at) >= window,
                    _ => false,
                };
                match state.status {
                    QueryStatus::Pending if covered => Reuse::InFlight,
                    QueryStatus::Fulfilled if covered && !state.stale && !expired => Reuse::Cached,
                    QueryStatus::Fulfilled if state.stale || expired => Reuse::Restart,
                    _ => Reuse::Refetch,
                }
            };

            match reuse {
                Reuse::InFlight => {
                    CacheStats::bump(&self.inner.stats.dedups);
                    tracing::debug!(endpoint = endpoint.name, "Attached to in-flight request");
                }
                Reuse::Cached => {
                    CacheStats::bump(&self.inner.stats.hits);
                    tracing::debug!(endpoint = endpoint.name, "Cache hit");
                }
                Reuse::Refetch => {
                    CacheStats::bump(&self.inner.stats.refetches);
                    let merge = entry.endpoint.merge.merges()
                        && args != entry.head_args
                        && entry.state.borrow().data.is_some();
                    tracing::debug!(endpoint = endpoint.name, merge, "Refetching entry");
                    start_fetch(&self.inner, &fingerprint, entry, args, merge);
                }
                Reuse::Restart => {
                    CacheStats::bump(&self.inner.stats.refetches);
                    // Refolding a later page onto stale data would repeat it.
                    let args = if entry.endpoint.merge.merges() {
                        entry.head_args.clone()
                    } else {
                        args
                    };
                    tracing::debug!(endpoint = endpoint.name, "Refetching stale entry from its head");
                    start_fetch(&self.inner, &fingerprint, entry, args, false);
                }
            }

            return QueryHandle {
                inner: Arc::clone(&self.inner),
                entry_id: entry.id,
                receiver: entry.state.subscribe(),
                fingerprint,
            };
        }

        CacheStats::bump(&self.inner.stats.misses);
        tracing::debug!(endpoint = endpoint.name, fingerprint = fingerprint.short(), "Cache miss");

        let (state, receiver) = watch::channel(QueryState::pending());
        let mut entry = CacheEntry {
            id: self.inner.next_id(),
            endpoint: *endpoint,
            state,
            subscribers: 1,
            unused_since: None,
            request_seq: 0,
            last_args: Value::Null,
            head_args: Value::Null,
        };
        start_fetch(&self.inner, &fingerprint, &mut entry, args, false);
        let entry_id = entry.id;
        store.insert(fingerprint.clone(), entry);

        QueryHandle {
            inner: Arc::clone(&self.inner),
            fingerprint,
            entry_id,
            receiver,
        }
    }

    /// Run a mutation; on success invalidate the tags it declares.
    ///
    /// Failed and gated mutations invalidate nothing.
    pub async fn mutate(&self, endpoint: &Endpoint, args: &Value) -> Result<Value> {
        let dispatch = self.inner.transport.execute(endpoint, args).await?;
        if dispatch.is_gated() {
            tracing::debug!(endpoint = endpoint.name, "Mutation gated; nothing invalidated");
            return Ok(endpoint.empty_value());
        }

        let value = dispatch.into_value(endpoint);
        if !endpoint.invalidates.is_empty() {
            self.invalidate_tags(endpoint.invalidates);
        }
        Ok(value)
    }

    pub async fn mutate_as<T: DeserializeOwned>(&self, endpoint: &Endpoint, args: &Value) -> Result<T> {
        decode(self.mutate(endpoint, args).await?)
    }

    /// Mark every entry under `tags` stale and refetch the subscribed ones.
    /// Returns the number of entries invalidated.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> usize {
        let mut store = self.inner.store();
        let fingerprints: BTreeSet<Fingerprint> = tags
            .iter()
            .filter_map(|tag| store.by_tag.get(tag))
            .flatten()
            .cloned()
            .collect();

        let mut refetched = 0usize;
        for fingerprint in &fingerprints {
            let Some(entry) = store.entries.get_mut(fingerprint) else {
                continue;
            };
            CacheStats::bump(&self.inner.stats.invalidations);
            entry.state.send_modify(|s| s.stale = true);

            if entry.subscribers > 0 {
                // Merged series restart from their first page.
                let args = entry.head_args.clone();
                start_fetch(&self.inner, fingerprint, entry, args, false);
                refetched += 1;
            }
        }

        tracing::info!(
            tags = ?tags,
            invalidated = fingerprints.len(),
            refetched,
            "Cache tags invalidated"
        );
        fingerprints.len()
    }

    /// Drop every entry. In-flight responses land nowhere.
    pub fn reset(&self) {
        let mut store = self.inner.store();
        let dropped = store.entries.len();
        store.entries.clear();
        store.by_tag.clear();
        tracing::info!(dropped, "Cache reset");
    }

    /// Evict entries that have had no subscribers for `keep_unused`.
    pub fn collect_garbage(&self) -> usize {
        let now = self.inner.clock.now();
        let keep = self.inner.policy.keep_unused;
        let mut store = self.inner.store();

        let expired: Vec<Fingerprint> = store
            .entries
            .iter()
            .filter(|(_, e)| {
                e.subscribers == 0
                    && e.unused_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= keep)
            })
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in &expired {
            store.remove(fingerprint);
            CacheStats::bump(&self.inner.stats.evictions);
        }
        expired.len()
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `period` until
    /// the cache is dropped.
    pub fn spawn_gc(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = QueryCache { inner }.collect_garbage();
                if evicted > 0 {
                    tracing::debug!(evicted, "Cache GC");
                }
            }
        })
    }

    /// Current state of an entry without subscribing to it.
    pub fn peek(&self, endpoint: &Endpoint, args: &Value, series: Option<SeriesId>) -> Option<QueryState> {
        let fingerprint = key::fingerprint(endpoint, args, series);
        self.inner
            .store()
            .entries
            .get(&fingerprint)
            .map(|e| e.state.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.store().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("policy", &self.inner.policy)
            .field("entries", &self.len())
            .finish()
    }
}

/// Deserialize cached JSON into a typed model.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// QueryHandle -- one subscription
// ---------------------------------------------------------------------------

/// A live subscription to one cache entry. Dropping it unsubscribes.
pub struct QueryHandle {
    inner: Arc<CacheInner>,
    fingerprint: Fingerprint,
    entry_id: u64,
    receiver: watch::Receiver<QueryState>,
}

impl QueryHandle {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn state(&self) -> QueryState {
        self.receiver.borrow().clone()
    }

    pub fn data(&self) -> Option<Value> {
        self.receiver.borrow().data.clone()
    }

    /// Wait until the entry is no longer pending and return its outcome.
    pub async fn settled(&mut self) -> Result<Value> {
        match self.receiver.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.result(),
            Err(_) => Err(ConsoleError::Internal(
                "cache entry was dropped before it settled".to_string(),
            )),
        }
    }

    pub async fn settled_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        decode(self.settled().await?)
    }

    /// Wait for the next state change.
    pub async fn changed(&mut self) -> Result<QueryState> {
        self.receiver
            .changed()
            .await
            .map_err(|_| ConsoleError::Internal("cache entry was dropped".to_string()))?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Refetch from the head of the entry's series. Returns `false` when
    /// the entry no longer exists.
    pub fn refetch(&self) -> bool {
        let mut store = self.inner.store();
        match store.entries.get_mut(&self.fingerprint) {
            Some(entry) if entry.id == self.entry_id => {
                CacheStats::bump(&self.inner.stats.refetches);
                let args = entry.head_args.clone();
                start_fetch(&self.inner, &self.fingerprint, entry, args, false);
                true
            }
            _ => false,
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        let now = self.inner.clock.now();
        let mut store = self.inner.store();
        if let Some(entry) = store.entries.get_mut(&self.fingerprint) {
            if entry.id == self.entry_id {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                if entry.subscribers == 0 {
                    entry.unused_since = Some(now);
                }
            }
        }
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("fingerprint", &self.fingerprint.short())
            .field("status", &self.receiver.borrow().status)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{MergeStrategy, Method};
    use crate::session::{Session, SessionContext};
    use crate::transport::fake::FakeTransport;
    use serde_json::json;

    const BUDGETS: Endpoint = Endpoint::query("budget.list", "/budget/")
        .namespace("/budget/")
        .provides(&[Tag::Budget])
        .list();

    const POLICIES: Endpoint = Endpoint::query("policy.list", "/policy/")
        .namespace("/policy/")
        .provides(&[Tag::Policy])
        .list();

    const UPDATE_BUDGET: Endpoint = Endpoint::mutation(Method::Put, "budget.update", "/budget/{id}")
        .namespace("/budget/")
        .invalidates(&[Tag::Budget]);

    fn without_attempt(args: &Value) -> Value {
        let mut args = args.clone();
        if let Some(map) = args.as_object_mut() {
            map.remove("attempt");
            map.remove("cursor");
        }
        args
    }

    const SEARCH: Endpoint = Endpoint::query("search", "/search").fingerprint(without_attempt);

    const FEED: Endpoint = Endpoint::query("feed", "/feed")
        .provides(&[Tag::Log])
        .merge(MergeStrategy::Append)
        .fingerprint(without_attempt)
        .list();

    fn cache_for(session: Session, policy: CachePolicy) -> (Arc<FakeTransport>, QueryCache, Arc<ManualClock>) {
        let fake = FakeTransport::new();
        let transport = AuthorizedTransport::new(fake.clone(), SessionContext::with_session(session), "UTC");
        let clock = Arc::new(ManualClock::new());
        let cache = QueryCache::with_clock(transport, policy, clock.clone());
        (fake, cache, clock)
    }

    fn admin_cache() -> (Arc<FakeTransport>, QueryCache, Arc<ManualClock>) {
        cache_for(Session::with_token("t").super_admin(), CachePolicy::default())
    }

    #[tokio::test]
    async fn test_concurrent_queries_dedup() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([{"id": "b1"}]));
        fake.delay(|_| Duration::from_millis(30));

        let mut first = cache.query(&BUDGETS, json!({"app": "A1"}));
        let mut second = cache.query(&BUDGETS, json!({"app": "A1"}));

        let (a, b) = tokio::join!(first.settled(), second.settled());
        assert_eq!(a.unwrap(), json!([{"id": "b1"}]));
        assert_eq!(b.unwrap(), json!([{"id": "b1"}]));
        assert_eq!(fake.calls(), 1);
        assert_eq!(cache.stats().dedups, 1);
    }

    #[tokio::test]
    async fn test_fulfilled_entry_served_from_cache() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([]));

        let mut first = cache.query(&BUDGETS, Value::Null);
        first.settled().await.unwrap();
        let mut second = cache.query(&BUDGETS, Value::Null);
        second.settled().await.unwrap();

        assert_eq!(fake.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_only_declared_tags() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([{"id": "b1"}]));
        fake.respond("policy.list", json!([{"id": "p1"}]));
        fake.respond("budget.update", json!({"id": "b1"}));

        let mut budgets = cache.query(&BUDGETS, Value::Null);
        let mut policies = cache.query(&POLICIES, Value::Null);
        budgets.settled().await.unwrap();
        policies.settled().await.unwrap();

        cache
            .mutate(&UPDATE_BUDGET, &json!({"id": "b1", "limit": 5}))
            .await
            .unwrap();
        budgets.settled().await.unwrap();

        assert_eq!(fake.calls_to("budget.list"), 2);
        assert_eq!(fake.calls_to("policy.list"), 1);
        assert!(!policies.state().stale);
    }

    #[tokio::test]
    async fn test_invalidated_entry_without_subscribers_refetches_on_next_query() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([]));

        let mut handle = cache.query(&BUDGETS, Value::Null);
        handle.settled().await.unwrap();
        drop(handle);

        assert_eq!(cache.invalidate_tags(&[Tag::Budget]), 1);
        assert_eq!(fake.calls(), 1);
        assert!(cache.peek(&BUDGETS, &Value::Null, None).unwrap().stale);

        let mut again = cache.query(&BUDGETS, Value::Null);
        again.settled().await.unwrap();
        assert_eq!(fake.calls(), 2);
        assert!(!again.state().stale);
    }

    #[tokio::test]
    async fn test_failed_mutation_invalidates_nothing() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([]));
        fake.fail(
            "budget.update",
            ConsoleError::Validation {
                status: 422,
                message: "bad".into(),
                fields: vec![],
            },
        );

        let mut budgets = cache.query(&BUDGETS, Value::Null);
        budgets.settled().await.unwrap();

        let err = cache.mutate(&UPDATE_BUDGET, &json!({"id": "b1"})).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Validation { .. }));
        assert_eq!(fake.calls_to("budget.list"), 1);
        assert!(!budgets.state().stale);
    }

    #[tokio::test]
    async fn test_gated_query_is_silent_but_visible() {
        let (fake, cache, _) = cache_for(Session::with_token("t").grant("/policy/"), CachePolicy::default());

        let mut budgets = cache.query(&BUDGETS, Value::Null);
        assert_eq!(budgets.settled().await.unwrap(), json!([]));
        assert!(budgets.state().gated);
        assert_eq!(fake.calls(), 0);

        let result = cache.mutate(&UPDATE_BUDGET, &json!({"id": "b1"})).await.unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_prior_data() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([{"id": "b1"}]));

        let mut handle = cache.query(&BUDGETS, Value::Null);
        handle.settled().await.unwrap();

        fake.fail("budget.list", ConsoleError::Network("connection reset".into()));
        assert!(handle.refetch());
        let err = handle.settled().await.unwrap_err();
        assert_eq!(err, ConsoleError::Network("connection reset".into()));

        let state = handle.state();
        assert_eq!(state.status, QueryStatus::Rejected);
        assert_eq!(state.data, Some(json!([{"id": "b1"}])));
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let (fake, cache, _) = admin_cache();
        fake.on("search", |req| Ok(json!(req.query_value("attempt"))));
        fake.delay(|req| match req.query_value("attempt") {
            Some("1") => Duration::from_millis(80),
            _ => Duration::from_millis(5),
        });

        let mut slow = cache.query(&SEARCH, json!({"term": "x", "attempt": 1}));
        let mut fast = cache.query(&SEARCH, json!({"term": "x", "attempt": 2}));
        assert_eq!(slow.fingerprint(), fast.fingerprint());

        assert_eq!(fast.settled().await.unwrap(), json!("2"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(slow.settled().await.unwrap(), json!("2"));
        assert_eq!(cache.stats().discarded, 1);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_result_dropped_without_subscribers() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([]));
        fake.delay(|_| Duration::from_millis(20));

        let handle = cache.query(&BUDGETS, Value::Null);
        drop(handle);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(fake.calls(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_merge_series_appends_then_restarts_on_invalidation() {
        let (fake, cache, _) = admin_cache();
        fake.on("feed", |req| {
            Ok(match req.query_value("cursor") {
                None => json!([3, 2]),
                Some(_) => json!([1]),
            })
        });

        let series = cache.next_series();
        let mut page = cache.query_in_series(&FEED, json!({"app": "A1"}), series);
        page.settled().await.unwrap();

        let mut next = cache.query_in_series(&FEED, json!({"app": "A1", "cursor": 2}), series);
        drop(page);
        assert_eq!(next.settled().await.unwrap(), json!([3, 2, 1]));

        cache.invalidate_tags(&[Tag::Log]);
        assert_eq!(next.settled().await.unwrap(), json!([3, 2]));
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_stale_merge_series_restarts_from_head() {
        let (fake, cache, _) = admin_cache();
        fake.on("feed", |req| {
            Ok(match req.query_value("cursor") {
                None => json!([3, 2]),
                Some(_) => json!([1]),
            })
        });

        let series = cache.next_series();
        let mut head = cache.query_in_series(&FEED, json!({"app": "A1"}), series);
        head.settled().await.unwrap();
        let mut next = cache.query_in_series(&FEED, json!({"app": "A1", "cursor": 2}), series);
        assert_eq!(next.settled().await.unwrap(), json!([3, 2, 1]));
        assert!(next.state().merged);
        drop(head);
        drop(next);

        cache.invalidate_tags(&[Tag::Log]);
        let mut again = cache.query_in_series(&FEED, json!({"app": "A1", "cursor": 2}), series);
        assert_eq!(again.settled().await.unwrap(), json!([3, 2]));

        let state = again.state();
        assert!(!state.merged);
        assert_eq!(state.args, json!({"app": "A1"}));
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test]
    async fn test_series_do_not_share_entries() {
        let (fake, cache, _) = admin_cache();
        fake.respond("feed", json!([1]));

        let mut a = cache.query_in_series(&FEED, json!({"app": "A1"}), cache.next_series());
        let mut b = cache.query_in_series(&FEED, json!({"app": "A1"}), cache.next_series());
        a.settled().await.unwrap();
        b.settled().await.unwrap();
        assert_eq!(fake.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_garbage_collection_after_keep_unused() {
        let (fake, cache, clock) = admin_cache();
        fake.respond("budget.list", json!([]));

        let mut handle = cache.query(&BUDGETS, Value::Null);
        handle.settled().await.unwrap();
        assert_eq!(cache.collect_garbage(), 0);

        drop(handle);
        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.collect_garbage(), 0);

        clock.advance(Duration::from_secs(31));
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_freshness_window_triggers_refetch() {
        let policy = CachePolicy {
            refetch_after: Some(Duration::from_secs(10)),
            ..CachePolicy::default()
        };
        let (fake, cache, clock) = cache_for(Session::with_token("t").super_admin(), policy);
        fake.respond("budget.list", json!([]));

        let mut first = cache.query(&BUDGETS, Value::Null);
        first.settled().await.unwrap();

        let _hit = cache.query(&BUDGETS, Value::Null);
        assert_eq!(fake.calls(), 1);

        clock.advance(Duration::from_secs(11));
        let mut stale = cache.query(&BUDGETS, Value::Null);
        stale.settled().await.unwrap();
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_reset_drops_everything() {
        let (fake, cache, _) = admin_cache();
        fake.respond("budget.list", json!([]));

        let mut handle = cache.query(&BUDGETS, Value::Null);
        handle.settled().await.unwrap();
        cache.reset();
        assert!(cache.is_empty());
        assert!(!handle.refetch());

        // A stale handle must not touch a fresh entry under the same key.
        let mut fresh = cache.query(&BUDGETS, Value::Null);
        fresh.settled().await.unwrap();
        drop(handle);
        assert_eq!(cache.collect_garbage(), 0);
    }
}
