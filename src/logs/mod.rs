//! Audit-log browsing: filters, cursor pagination, and request correlation.

pub mod correlation;
pub mod filter;
pub mod pager;
pub mod types;

pub use self::correlation::{CorrelationResolver, CorrelationSet, Direction, Leg, Side};
pub use self::filter::{FilterPatch, KeywordSet, LogFilter, format_timestamp};
pub use self::pager::{LogPager, PagerState};
pub use self::types::LogEntry;
