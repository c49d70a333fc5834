//! Shared reqwest client used by the HTTP transport.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::config::ServerConfig;

/// User agent sent with every console request.
pub const USER_AGENT: &str = concat!("gaud-console/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin wrapper giving every console request the same user agent and timeouts.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Build a client from the `[server]` section.
    pub fn from_config(server: &ServerConfig) -> Self {
        Self::builder()
            .connect_timeout(server.connect_timeout())
            .request_timeout(server.timeout())
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.builder = self.builder.user_agent(ua);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    /// Build the client, falling back to reqwest defaults if the custom
    /// configuration is rejected.
    pub fn build(self) -> HttpClient {
        let inner = match self.builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
                Client::default()
            }
        };
        HttpClient { inner }
    }
}
