//! Log Pagination Engine.
//!
//! Pages walk backward in time. Each page is fetched with the timestamp of
//! the oldest row loaded so far as an exclusive upper bound, and the cache
//! appends it to the rows of the current series. Changing any filter field
//! other than the cursor starts a new series.
//!
//! The pager owns its rows. It only folds in responses it has not seen
//! (tracked by request sequence), so a cache hit never counts as a page.
//! When the entry underneath restarts from its head (tag invalidation,
//! freshness expiry) the pager adopts that head; when the entry vanishes
//! (cache reset) the next page starts a fresh entry and is appended.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::filter::{FilterPatch, KeywordSet, LogFilter};
use super::types::LogEntry;
use crate::api::logs::LIST_LOGS;
use crate::cache::{QueryCache, QueryHandle, QueryState, QueryStatus, SeriesId, decode};
use crate::error::{ConsoleError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum PagerState {
    Idle,
    Loading,
    Loaded,
    Error(ConsoleError),
}

/// What one round trip through the cache produced.
enum Landing {
    /// Nothing new since the last response folded in.
    Unchanged,
    /// The requested page, with its length.
    Page(usize),
    /// The entry restarted from its head; rows were rebuilt from it.
    Restarted(usize),
}

pub struct LogPager {
    cache: QueryCache,
    filter: LogFilter,
    page_size: u32,
    series: SeriesId,
    handle: Option<QueryHandle>,
    rows: Vec<LogEntry>,
    state: PagerState,
    exhausted: bool,
    /// Request sequence of the last response folded into `rows`.
    consumed_seq: u64,
    /// Rows of the current cache entry already in `rows`.
    entry_len: usize,
    /// Rows loaded before the current entry's head.
    entry_base: usize,
    /// Cursor the current entry's head was fetched with.
    entry_cursor: Option<DateTime<Utc>>,
}

impl LogPager {
    pub fn new(cache: QueryCache, page_size: u32) -> Self {
        Self::with_filter(cache, page_size, LogFilter::default())
    }

    pub fn with_filter(cache: QueryCache, page_size: u32, mut filter: LogFilter) -> Self {
        filter.end_cursor = None;
        let series = cache.next_series();
        Self {
            cache,
            filter,
            page_size: page_size.max(1),
            series,
            handle: None,
            rows: Vec::new(),
            state: PagerState::Idle,
            exhausted: false,
            consumed_seq: 0,
            entry_len: 0,
            entry_base: 0,
            entry_cursor: None,
        }
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    /// Rows loaded in this series, newest first.
    pub fn rows(&self) -> &[LogEntry] {
        &self.rows
    }

    pub fn state(&self) -> &PagerState {
        &self.state
    }

    pub fn series(&self) -> SeriesId {
        self.series
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The last page came back shorter than the page size.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// The log namespace is not granted; rows are always empty.
    pub fn is_gated(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.state().gated)
    }

    /// Merge `patch` into the filter. Returns `true` when that started a
    /// new series (accumulated rows dropped, cursor cleared).
    pub fn set_filter(&mut self, patch: FilterPatch) -> bool {
        let reset = self.filter.apply(patch);
        if reset {
            self.reset_series();
        }
        reset
    }

    pub fn add_keyword(&mut self, term: &str) -> bool {
        let mut keywords = self.filter.keywords.clone();
        keywords.insert(term) && self.set_filter(FilterPatch::new().keywords(keywords))
    }

    pub fn remove_keyword(&mut self, term: &str) -> bool {
        let mut keywords = self.filter.keywords.clone();
        keywords.remove(term) && self.set_filter(FilterPatch::new().keywords(keywords))
    }

    pub fn set_keywords(&mut self, keywords: KeywordSet) -> bool {
        self.set_filter(FilterPatch::new().keywords(keywords))
    }

    fn reset_series(&mut self) {
        self.filter.end_cursor = None;
        self.series = self.cache.next_series();
        self.handle = None;
        self.rows.clear();
        self.state = PagerState::Idle;
        self.exhausted = false;
        self.consumed_seq = 0;
        self.entry_len = 0;
        self.entry_base = 0;
        self.entry_cursor = None;
        tracing::debug!(series = %self.series, "Log series reset");
    }

    /// Fetch the page selected by the current filter and cursor.
    /// Returns the number of rows the page contributed; a page that was
    /// already loaded contributes nothing and leaves exhaustion alone.
    pub async fn fetch_page(&mut self) -> Result<usize> {
        self.sync().await?;
        Ok(match self.fetch().await? {
            Landing::Unchanged => 0,
            Landing::Page(len) | Landing::Restarted(len) => len,
        })
    }

    /// Load the next older page. No I/O once the series is exhausted.
    pub async fn load_more(&mut self) -> Result<usize> {
        self.sync().await?;
        // A restart underneath rebuilds the rows; go again from the new tail.
        for _ in 0..2 {
            if self.exhausted {
                return Ok(0);
            }
            self.filter.end_cursor = self.rows.last().map(|row| row.timestamp);
            match self.fetch().await? {
                Landing::Restarted(_) => continue,
                Landing::Page(len) => return Ok(len),
                Landing::Unchanged => return Ok(0),
            }
        }
        Ok(0)
    }

    /// Start the current filter over from its newest page.
    pub async fn refresh(&mut self) -> Result<usize> {
        self.reset_series();
        self.fetch_page().await
    }

    /// Catch up with a head refetch the cache ran on its own.
    async fn sync(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        if handle.state().is_pending() && handle.settled().await.is_err() {
            return Ok(());
        }

        let state = handle.state();
        if state.status != QueryStatus::Fulfilled || state.seq == self.consumed_seq || state.merged {
            return Ok(());
        }
        let data = self.decode_rows(&state)?;
        tracing::debug!(series = %self.series, rows = data.len(), "Log series head was refetched");
        self.adopt_head(data, state.seq);
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Landing> {
        let cursor = self.filter.end_cursor;
        let args = self.filter.to_args(self.page_size);
        self.state = PagerState::Loading;

        let mut handle = self.cache.query_in_series(&LIST_LOGS, args.clone(), self.series);
        let outcome = handle.settled().await;
        let landed = handle.state();
        self.handle = Some(handle);

        if let Err(err) = outcome {
            tracing::debug!(error = %err, "Log page failed");
            self.state = PagerState::Error(err.clone());
            return Err(err);
        }

        if landed.seq == self.consumed_seq {
            self.state = PagerState::Loaded;
            tracing::debug!(series = %self.series, "Log page already loaded");
            return Ok(Landing::Unchanged);
        }

        let data = self.decode_rows(&landed)?;
        let landing = if landed.merged && data.len() >= self.entry_len {
            let page = &data[self.entry_len..];
            let len = page.len();
            check_page_order(page, cursor);
            self.rows.extend_from_slice(page);
            self.entry_len = data.len();
            self.consumed_seq = landed.seq;
            Landing::Page(len)
        } else if landed.merged {
            // The entry lost rows this pager already holds; start over.
            self.adopt_head(data, landed.seq)
        } else if landed.args == args {
            // The entry holds exactly this page: the series head, or a page
            // that landed in an entry recreated after a cache reset.
            check_page_order(&data, cursor);
            let base = if cursor.is_some() { self.rows.len() } else { 0 };
            let len = data.len();
            self.rows.truncate(base);
            self.rows.extend(data);
            self.entry_base = base;
            self.entry_cursor = cursor;
            self.entry_len = len;
            self.consumed_seq = landed.seq;
            Landing::Page(len)
        } else {
            self.adopt_head(data, landed.seq)
        };

        if let Landing::Page(len) = landing {
            self.exhausted = len < self.page_size as usize;
        }
        self.state = PagerState::Loaded;
        tracing::debug!(
            series = %self.series,
            total = self.rows.len(),
            exhausted = self.exhausted,
            "Log page loaded"
        );
        Ok(landing)
    }

    /// Replace everything the current entry contributed with its head page.
    fn adopt_head(&mut self, data: Vec<LogEntry>, seq: u64) -> Landing {
        let len = data.len();
        self.rows.truncate(self.entry_base);
        self.rows.extend(data);
        self.entry_len = len;
        self.consumed_seq = seq;
        self.filter.end_cursor = self.entry_cursor;
        self.exhausted = len < self.page_size as usize;
        Landing::Restarted(len)
    }

    fn decode_rows(&mut self, state: &QueryState) -> Result<Vec<LogEntry>> {
        decode(state.data.clone().unwrap_or(Value::Array(Vec::new()))).inspect_err(|err| {
            tracing::debug!(error = %err, "Log page did not decode");
            self.state = PagerState::Error(err.clone());
        })
    }
}

impl std::fmt::Debug for LogPager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPager")
            .field("filter", &self.filter)
            .field("series", &self.series)
            .field("rows", &self.rows.len())
            .field("state", &self.state)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Rows must be newest-first and strictly older than the cursor. The
/// backend owns that contract; violations are logged, not repaired.
fn check_page_order(page: &[LogEntry], cursor: Option<DateTime<Utc>>) {
    if let (Some(cursor), Some(first)) = (cursor, page.first()) {
        if first.timestamp >= cursor {
            tracing::warn!(
                row = %first.id,
                timestamp = %first.timestamp,
                cursor = %cursor,
                "Log page row is not older than the cursor"
            );
        }
    }
    for pair in page.windows(2) {
        if pair[1].timestamp > pair[0].timestamp {
            tracing::warn!(row = %pair[1].id, "Log page is not ordered newest-first");
            break;
        }
    }
}
