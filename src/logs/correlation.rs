//! Correlation Resolver: the four request/response legs of one call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::types::LogEntry;
use crate::api::logs::LOG_CORRELATION;
use crate::cache::{QueryCache, decode};
use crate::error::{ConsoleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Between the client application and the gateway.
    Caller,
    /// Between the gateway and the upstream model provider.
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
}

/// One of the four legs, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    CallerRequest,
    ProviderRequest,
    ProviderResponse,
    CallerResponse,
}

impl Leg {
    pub const ALL: [Leg; 4] = [
        Leg::CallerRequest,
        Leg::ProviderRequest,
        Leg::ProviderResponse,
        Leg::CallerResponse,
    ];

    pub fn new(side: Side, direction: Direction) -> Self {
        match (side, direction) {
            (Side::Caller, Direction::Request) => Self::CallerRequest,
            (Side::Caller, Direction::Response) => Self::CallerResponse,
            (Side::Provider, Direction::Request) => Self::ProviderRequest,
            (Side::Provider, Direction::Response) => Self::ProviderResponse,
        }
    }

    pub fn side(self) -> Side {
        match self {
            Self::CallerRequest | Self::CallerResponse => Side::Caller,
            Self::ProviderRequest | Self::ProviderResponse => Side::Provider,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Self::CallerRequest | Self::ProviderRequest => Direction::Request,
            Self::CallerResponse | Self::ProviderResponse => Direction::Response,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CallerRequest => "Client → Gateway request",
            Self::ProviderRequest => "Gateway → Provider request",
            Self::ProviderResponse => "Provider → Gateway response",
            Self::CallerResponse => "Gateway → Client response",
        }
    }
}

/// Wire form: a log row tagged with its side and direction.
#[derive(Debug, Deserialize)]
struct TaggedEntry {
    side: Side,
    direction: Direction,
    #[serde(flatten)]
    entry: LogEntry,
}

/// Up to four legs for one request id. Absent legs are simply missing.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationSet {
    pub request_id: String,
    legs: BTreeMap<Leg, LogEntry>,
    /// The log namespace is not granted; the set is empty by policy.
    pub gated: bool,
}

impl CorrelationSet {
    pub fn empty(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            legs: BTreeMap::new(),
            gated: false,
        }
    }

    /// Record a leg. A second row for the same leg is ignored.
    pub fn insert(&mut self, leg: Leg, entry: LogEntry) -> bool {
        if self.legs.contains_key(&leg) {
            tracing::warn!(
                request_id = %self.request_id,
                leg = leg.label(),
                row = %entry.id,
                "Duplicate correlation leg ignored"
            );
            return false;
        }
        self.legs.insert(leg, entry);
        true
    }

    pub fn get(&self, leg: Leg) -> Option<&LogEntry> {
        self.legs.get(&leg)
    }

    /// Every leg in display order, present or not.
    pub fn columns(&self) -> impl Iterator<Item = (Leg, Option<&LogEntry>)> {
        Leg::ALL.into_iter().map(|leg| (leg, self.legs.get(&leg)))
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.legs.len() == Leg::ALL.len()
    }
}

/// Fetches and pairs correlation legs through the cache.
#[derive(Debug, Clone)]
pub struct CorrelationResolver {
    cache: QueryCache,
}

impl CorrelationResolver {
    pub fn new(cache: QueryCache) -> Self {
        Self { cache }
    }

    pub async fn resolve(&self, request_id: &str) -> Result<CorrelationSet> {
        let request_id = request_id.trim();
        if request_id.is_empty() {
            return Err(ConsoleError::InvalidArgs("request id is empty".to_string()));
        }

        let mut handle = self
            .cache
            .query(&LOG_CORRELATION, json!({ "request_id": request_id }));
        let value = handle.settled().await?;

        let mut set = CorrelationSet::empty(request_id);
        set.gated = handle.state().gated;

        let tagged: Vec<TaggedEntry> = decode(value)?;
        for TaggedEntry {
            side,
            direction,
            entry,
        } in tagged
        {
            set.insert(Leg::new(side, direction), entry);
        }

        tracing::debug!(request_id, legs = set.len(), "Correlation resolved");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::session::{Session, SessionContext};
    use crate::transport::AuthorizedTransport;
    use crate::transport::fake::FakeTransport;
    use std::sync::Arc;

    fn resolver(session: Session) -> (Arc<FakeTransport>, CorrelationResolver) {
        let fake = FakeTransport::new();
        let transport = AuthorizedTransport::new(fake.clone(), SessionContext::with_session(session), "UTC");
        let cache = QueryCache::new(transport, CachePolicy::default());
        (fake, CorrelationResolver::new(cache))
    }

    fn leg(side: &str, direction: &str, id: u32) -> serde_json::Value {
        json!({
            "side": side,
            "direction": direction,
            "id": id,
            "timestamp": "2024-01-15T12:00:00Z",
            "request_id": "req-9",
            "raw_request": {"model": "gpt-4o"}
        })
    }

    #[tokio::test]
    async fn test_resolve_pairs_legs() {
        let (fake, resolver) = resolver(Session::with_token("t").grant("/log/"));
        fake.respond(
            "log.correlation",
            json!([
                leg("caller", "request", 1),
                leg("provider", "request", 2),
                leg("caller", "response", 4)
            ]),
        );

        let set = resolver.resolve("req-9").await.unwrap();
        assert_eq!(set.len(), 3);
        assert!(!set.is_complete());
        assert_eq!(set.get(Leg::ProviderRequest).unwrap().id, "2");
        assert!(set.get(Leg::ProviderResponse).is_none());

        let labels: Vec<(&str, bool)> = set
            .columns()
            .map(|(leg, entry)| (leg.label(), entry.is_some()))
            .collect();
        assert_eq!(labels[2], ("Provider → Gateway response", false));

        assert_eq!(fake.requests()[0].path(), "/log/correlation/req-9");
    }

    #[tokio::test]
    async fn test_duplicate_leg_keeps_first() {
        let (fake, resolver) = resolver(Session::with_token("t").super_admin());
        fake.respond(
            "log.correlation",
            json!([leg("caller", "request", 1), leg("caller", "request", 7)]),
        );

        let set = resolver.resolve("req-9").await.unwrap();
        assert_eq!(set.get(Leg::CallerRequest).unwrap().id, "1");
    }

    #[tokio::test]
    async fn test_gated_correlation_is_empty() {
        let (fake, resolver) = resolver(Session::with_token("t"));
        let set = resolver.resolve("req-9").await.unwrap();
        assert!(set.is_empty());
        assert!(set.gated);
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_request_id_rejected() {
        let (_fake, resolver) = resolver(Session::with_token("t").super_admin());
        assert!(matches!(
            resolver.resolve("  ").await,
            Err(ConsoleError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_leg_round_trip() {
        for leg in Leg::ALL {
            assert_eq!(Leg::new(leg.side(), leg.direction()), leg);
        }
    }
}
