//! The log filter and its keyword set.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexSet;
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Keywords
// ---------------------------------------------------------------------------

/// Ordered, de-duplicated search terms. Blank terms are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    terms: IndexSet<String>,
}

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a free-text string on whitespace.
    pub fn parse(text: &str) -> Self {
        text.split_whitespace().collect()
    }

    /// Returns `true` if the set changed.
    pub fn insert(&mut self, term: &str) -> bool {
        let term = term.trim();
        !term.is_empty() && self.terms.insert(term.to_string())
    }

    /// Returns `true` if the set changed. Order of the rest is preserved.
    pub fn remove(&mut self, term: &str) -> bool {
        self.terms.shift_remove(term.trim())
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains(term.trim())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The wire form: one space-joined string.
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl<'a> FromIterator<&'a str> for KeywordSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = Self::new();
        for term in iter {
            set.insert(term);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Everything that selects which log rows are shown.
///
/// `end_cursor` only moves within a series; every other field defines it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub app: Option<String>,
    pub provider: Option<String>,
    pub level: Option<i32>,
    pub http_status: Option<u16>,
    pub keywords: KeywordSet,
    pub end_cursor: Option<DateTime<Utc>>,
}

impl LogFilter {
    /// Whether both filters select the same series (cursor ignored).
    pub fn same_series(&self, other: &Self) -> bool {
        self.begin == other.begin
            && self.end == other.end
            && self.app == other.app
            && self.provider == other.provider
            && self.level == other.level
            && self.http_status == other.http_status
            && self.keywords == other.keywords
    }

    /// Merge `patch` in. Returns `true` when a series-defining field
    /// changed, in which case the cursor has been cleared.
    pub fn apply(&mut self, patch: FilterPatch) -> bool {
        let before = self.clone();

        if let Some(begin) = patch.begin {
            self.begin = begin;
        }
        if let Some(end) = patch.end {
            self.end = end;
        }
        if let Some(app) = patch.app {
            self.app = app;
        }
        if let Some(provider) = patch.provider {
            self.provider = provider;
        }
        if let Some(level) = patch.level {
            self.level = level;
        }
        if let Some(http_status) = patch.http_status {
            self.http_status = http_status;
        }
        if let Some(keywords) = patch.keywords {
            self.keywords = keywords;
        }

        let reset = !self.same_series(&before);
        if reset {
            self.end_cursor = None;
        } else if let Some(cursor) = patch.end_cursor {
            self.end_cursor = cursor;
        }
        reset
    }

    /// Query arguments for one page of at most `limit` rows.
    pub fn to_args(&self, limit: u32) -> Value {
        let mut args = Map::new();
        if let Some(begin) = self.begin {
            args.insert("begin".into(), json!(format_timestamp(begin)));
        }
        if let Some(end) = self.end {
            args.insert("end".into(), json!(format_timestamp(end)));
        }
        if let Some(app) = &self.app {
            args.insert("app".into(), json!(app));
        }
        if let Some(provider) = &self.provider {
            args.insert("provider".into(), json!(provider));
        }
        if let Some(level) = self.level {
            args.insert("level".into(), json!(level));
        }
        if let Some(status) = self.http_status {
            args.insert("http_status".into(), json!(status));
        }
        if !self.keywords.is_empty() {
            args.insert("keywords".into(), json!(self.keywords.joined()));
        }
        if let Some(cursor) = self.end_cursor {
            args.insert("cursor".into(), json!(format_timestamp(cursor)));
        }
        args.insert("limit".into(), json!(limit));
        Value::Object(args)
    }
}

/// RFC 3339 in UTC with only as much sub-second precision as needed.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A partial update to a [`LogFilter`]. Unset fields are left alone;
/// `clear_*` sets a field back to "any".
#[derive(Debug, Clone, Default)]
pub struct FilterPatch {
    begin: Option<Option<DateTime<Utc>>>,
    end: Option<Option<DateTime<Utc>>>,
    app: Option<Option<String>>,
    provider: Option<Option<String>>,
    level: Option<Option<i32>>,
    http_status: Option<Option<u16>>,
    keywords: Option<KeywordSet>,
    end_cursor: Option<Option<DateTime<Utc>>>,
}

macro_rules! patch_field {
    (@clear $set:ident, $clear:ident) => {
        pub fn $clear(mut self) -> Self {
            self.$set = Some(None);
            self
        }
    };
    ($set:ident, $clear:ident, into $ty:ty) => {
        pub fn $set(mut self, value: impl Into<$ty>) -> Self {
            self.$set = Some(Some(value.into()));
            self
        }

        patch_field!(@clear $set, $clear);
    };
    ($set:ident, $clear:ident, $ty:ty) => {
        pub fn $set(mut self, value: $ty) -> Self {
            self.$set = Some(Some(value));
            self
        }

        patch_field!(@clear $set, $clear);
    };
}

impl FilterPatch {
    pub fn new() -> Self {
        Self::default()
    }

    patch_field!(begin, clear_begin, DateTime<Utc>);
    patch_field!(end, clear_end, DateTime<Utc>);
    patch_field!(app, clear_app, into String);
    patch_field!(provider, clear_provider, into String);
    patch_field!(level, clear_level, i32);
    patch_field!(http_status, clear_http_status, u16);
    patch_field!(end_cursor, clear_end_cursor, DateTime<Utc>);

    pub fn keywords(mut self, keywords: KeywordSet) -> Self {
        self.keywords = Some(keywords);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.begin.is_none()
            && self.end.is_none()
            && self.app.is_none()
            && self.provider.is_none()
            && self.level.is_none()
            && self.http_status.is_none()
            && self.keywords.is_none()
            && self.end_cursor.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_keyword_set_dedups_and_ignores_blanks() {
        let mut keywords = KeywordSet::new();
        assert!(keywords.insert("timeout"));
        assert!(!keywords.insert(" timeout "));
        assert!(!keywords.insert("   "));
        assert!(keywords.insert("gpt-4o"));
        assert_eq!(keywords.joined(), "timeout gpt-4o");

        assert!(keywords.remove("timeout"));
        assert!(!keywords.remove("timeout"));
        assert_eq!(keywords.joined(), "gpt-4o");
    }

    #[test]
    fn test_keyword_parse() {
        let keywords = KeywordSet::parse("  rate  limit rate ");
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords.joined(), "rate limit");
    }

    #[test]
    fn test_cursor_only_patch_keeps_series() {
        let mut filter = LogFilter {
            app: Some("A1".into()),
            ..Default::default()
        };
        assert!(!filter.apply(FilterPatch::new().end_cursor(ts(5))));
        assert_eq!(filter.end_cursor, Some(ts(5)));
    }

    #[test]
    fn test_field_change_resets_cursor() {
        let mut filter = LogFilter {
            app: Some("A1".into()),
            end_cursor: Some(ts(5)),
            ..Default::default()
        };
        assert!(filter.apply(FilterPatch::new().app("A2").end_cursor(ts(3))));
        assert_eq!(filter.app.as_deref(), Some("A2"));
        assert_eq!(filter.end_cursor, None);
    }

    #[test]
    fn test_setting_same_value_is_not_a_change() {
        let mut filter = LogFilter {
            level: Some(3),
            end_cursor: Some(ts(5)),
            ..Default::default()
        };
        assert!(!filter.apply(FilterPatch::new().level(3)));
        assert_eq!(filter.end_cursor, Some(ts(5)));

        assert!(filter.apply(FilterPatch::new().clear_level()));
        assert_eq!(filter.level, None);
    }

    #[test]
    fn test_to_args() {
        let filter = LogFilter {
            begin: Some(ts(1)),
            app: Some("A1".into()),
            http_status: Some(502),
            keywords: KeywordSet::parse("upstream error"),
            end_cursor: Some(Utc.with_ymd_and_hms(2024, 1, 9, 12, 0, 0).unwrap()),
            ..Default::default()
        };
        let args = filter.to_args(50);
        assert_eq!(
            args,
            json!({
                "begin": "2024-01-01T00:00:00Z",
                "app": "A1",
                "http_status": 502,
                "keywords": "upstream error",
                "cursor": "2024-01-09T12:00:00Z",
                "limit": 50
            })
        );
    }

    #[test]
    fn test_empty_patch() {
        assert!(FilterPatch::new().is_empty());
        assert!(!FilterPatch::new().clear_app().is_empty());
    }
}
