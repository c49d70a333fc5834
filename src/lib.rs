//! Operator console engine for the gaud LLM gateway.
//!
//! The pieces, leaf first: a [`SessionContext`](session::SessionContext)
//! holding the caller's token and namespace grant; an
//! [`AuthorizedTransport`](transport::AuthorizedTransport) that gates and
//! authenticates every request; a tagged [`QueryCache`](cache::QueryCache);
//! and the audit-log [`LogPager`](logs::LogPager) and
//! [`CorrelationResolver`](logs::CorrelationResolver) built on it.

pub mod api;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logs;
pub mod net;
pub mod session;
pub mod transport;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::api::auth::Profile;
use crate::cache::{CachePolicy, QueryCache};
use crate::config::Config;
use crate::error::Result;
use crate::logs::{CorrelationResolver, LogFilter, LogPager};
use crate::net::HttpClient;
use crate::session::{SessionContext, SessionEvent};
use crate::transport::{AuthorizedTransport, HttpTransport, Transport};

/// Everything one console session needs, wired together.
#[derive(Debug, Clone)]
pub struct Console {
    config: Arc<Config>,
    cache: QueryCache,
}

impl Console {
    /// Build a console that talks to `config.server.base_url`.
    pub fn new(config: Config) -> Result<Self> {
        let client = HttpClient::from_config(&config.server);
        let transport = HttpTransport::new(client, &config.server.base_url)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a console over any [`Transport`].
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let timezone = config.server.effective_timezone();
        let authorized = AuthorizedTransport::new(transport, SessionContext::new(), timezone);
        let cache = QueryCache::new(authorized, CachePolicy::from(&config.cache));
        Self {
            config: Arc::new(config),
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        self.cache.transport().session()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Profile> {
        api::auth::login(&self.cache, username, password).await
    }

    /// Sign in with the token from `[auth]`, if one is configured.
    pub async fn authenticate_from_config(&self) -> Result<Option<Profile>> {
        match self.config.auth.token.clone() {
            Some(token) => api::auth::resume(&self.cache, token).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn logout(&self) {
        api::auth::logout(&self.cache).await;
    }

    /// A pager over the audit log with the configured page size.
    pub fn logs(&self) -> LogPager {
        LogPager::new(self.cache.clone(), self.config.logs.page_size)
    }

    pub fn logs_with_filter(&self, filter: LogFilter) -> LogPager {
        LogPager::with_filter(self.cache.clone(), self.config.logs.page_size, filter)
    }

    pub fn correlation(&self) -> CorrelationResolver {
        CorrelationResolver::new(self.cache.clone())
    }

    /// Background cache GC on the configured interval.
    pub fn spawn_gc(&self) -> JoinHandle<()> {
        self.cache.spawn_gc(self.config.cache.gc_interval())
    }

    /// The global 401 listener: when a session expires, drop everything
    /// cached under it. Runs until aborted.
    pub fn spawn_expiry_listener(&self) -> JoinHandle<()> {
        let mut events = self.session().subscribe();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            while events.changed().await.is_ok() {
                let event = *events.borrow_and_update();
                if let SessionEvent::Expired { generation } = event {
                    tracing::warn!(generation, "Session expired; cache cleared, sign in again");
                    cache.reset();
                }
            }
        })
    }
}
