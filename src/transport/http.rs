//! reqwest-backed [`Transport`].

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use super::{Credentials, TIMEZONE_HEADER, Transport};
use crate::endpoint::ApiRequest;
use crate::error::{ConsoleError, Result};
use crate::net::HttpClient;

/// Talks JSON over HTTP(S) to the gateway's admin API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: HttpClient,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(client: HttpClient, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ConsoleError::Config(format!(
                "base URL '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request against the base URL, percent-encoding segments.
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ConsoleError::Config("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

/// Authorization, timezone, and a fresh request id.
fn build_headers(credentials: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(token) = credentials.bearer_token.as_deref() {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("Bearer token is not a valid header value; sending without it"),
        }
    }

    headers.insert(
        HeaderName::from_static(TIMEZONE_HEADER),
        HeaderValue::from_str(&credentials.timezone)
            .unwrap_or_else(|_| HeaderValue::from_static("UTC")),
    );

    headers.insert(
        HeaderName::from_static("x-request-id"),
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("00000000-0000-0000-0000-000000000000")),
    );

    headers
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest, credentials: &Credentials) -> Result<Value> {
        let url = self.url_for(request)?;

        let mut builder = self
            .client
            .inner()
            .request(request.method.as_reqwest(), url)
            .headers(build_headers(credentials));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::debug!(
                endpoint = request.endpoint,
                status = status.as_u16(),
                "Request rejected by gateway"
            );
            return Err(ConsoleError::from_response(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(endpoint = request.endpoint, error = %e, "Response is not valid JSON");
            ConsoleError::Decode(format!("{}: {e}", request.endpoint))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Method;

    fn request(segments: &[&str], query: &[(&str, &str)]) -> ApiRequest {
        ApiRequest {
            endpoint: "test",
            method: Method::Get,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: None,
        }
    }

    #[test]
    fn test_url_for_joins_base_path() {
        let transport = HttpTransport::new(HttpClient::new(), "http://gw:8400/api/").unwrap();
        let url = transport
            .url_for(&request(&["log", "list"], &[("app", "A 1")]))
            .unwrap();
        assert_eq!(url.as_str(), "http://gw:8400/api/log/list?app=A+1");
    }

    #[test]
    fn test_url_for_encodes_segments() {
        let transport = HttpTransport::new(HttpClient::new(), "http://gw:8400").unwrap();
        let url = transport.url_for(&request(&["provider", "a/b"], &[])).unwrap();
        assert_eq!(url.as_str(), "http://gw:8400/provider/a%2Fb");
    }

    #[test]
    fn test_rejects_non_base_url() {
        assert!(HttpTransport::new(HttpClient::new(), "mailto:ops@example.com").is_err());
    }

    #[test]
    fn test_headers() {
        let headers = build_headers(&Credentials {
            bearer_token: Some("abc".into()),
            timezone: "Asia/Tokyo".into(),
        });
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.get(TIMEZONE_HEADER).unwrap(), "Asia/Tokyo");
        assert!(headers.contains_key("x-request-id"));

        let anonymous = build_headers(&Credentials {
            bearer_token: None,
            timezone: "UTC".into(),
        });
        assert!(!anonymous.contains_key(AUTHORIZATION));
    }
}
