//! Authorized Transport: every outgoing request passes through here.
//!
//! The gate runs before any I/O. A request scoped to a namespace the caller
//! does not hold resolves to [`Dispatch::Gated`] without touching the
//! network (super-admins bypass the check). Everything else is forwarded
//! with the bearer token and the client timezone.

pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use serde_json::Value;

use crate::endpoint::{ApiRequest, Endpoint};
use crate::error::Result;
use crate::session::SessionContext;

pub use self::http::HttpTransport;

/// Header carrying the IANA timezone of the console.
pub const TIMEZONE_HEADER: &str = "x-timezone";

/// Per-request authentication material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub bearer_token: Option<String>,
    pub timezone: String,
}

/// Sends a resolved request to the backend.
///
/// Implementations must map non-2xx responses through
/// [`ConsoleError::from_response`](crate::error::ConsoleError::from_response)
/// so a 401 is recognizable upstream.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest, credentials: &Credentials) -> Result<Value>;
}

/// Outcome of an authorized call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Data(Value),
    /// The namespace gate refused the call; no I/O happened.
    Gated,
}

impl Dispatch {
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::Gated)
    }

    /// Collapse a gated call into the endpoint's empty value.
    pub fn into_value(self, endpoint: &Endpoint) -> Value {
        match self {
            Self::Data(value) => value,
            Self::Gated => endpoint.empty_value(),
        }
    }
}

/// Wraps a [`Transport`] with the session gate and credential injection.
#[derive(Clone)]
pub struct AuthorizedTransport {
    inner: Arc<dyn Transport>,
    session: SessionContext,
    timezone: String,
}

impl AuthorizedTransport {
    pub fn new(inner: Arc<dyn Transport>, session: SessionContext, timezone: impl Into<String>) -> Self {
        Self {
            inner,
            session,
            timezone: timezone.into(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Build the request for `endpoint` and run it through the gate.
    pub async fn execute(&self, endpoint: &Endpoint, args: &Value) -> Result<Dispatch> {
        let request = endpoint.build_request(args)?;
        let dispatch = self.execute_request(&request, endpoint.namespace).await?;
        Ok(match (dispatch, endpoint.transform) {
            (Dispatch::Data(value), Some(transform)) => Dispatch::Data(transform(value)),
            (dispatch, _) => dispatch,
        })
    }

    /// Gate and send an already resolved request.
    ///
    /// A 401 drops the session that was current when the request was
    /// issued, then propagates as an error like any other failure.
    pub async fn execute_request(
        &self,
        request: &ApiRequest,
        namespace: Option<&str>,
    ) -> Result<Dispatch> {
        let ticket = self.session.ticket();

        if let Some(namespace) = namespace {
            if !ticket.allows(namespace) {
                tracing::debug!(
                    endpoint = request.endpoint,
                    namespace,
                    "Request gated: namespace not granted"
                );
                return Ok(Dispatch::Gated);
            }
        }

        let credentials = Credentials {
            bearer_token: ticket.token().map(str::to_string),
            timezone: self.timezone.clone(),
        };

        tracing::debug!(
            endpoint = request.endpoint,
            method = %request.method,
            path = %request.path(),
            "Dispatching request"
        );

        match self.inner.send(request, &credentials).await {
            Ok(value) => Ok(Dispatch::Data(value)),
            Err(err) => {
                if err.is_unauthorized() && self.session.expire(ticket.generation) {
                    tracing::info!(endpoint = request.endpoint, "Session dropped after 401");
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for AuthorizedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedTransport")
            .field("timezone", &self.timezone)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;
    use crate::endpoint::{Method, Tag};
    use crate::error::ConsoleError;
    use crate::session::Session;
    use serde_json::json;

    const LIST_BUDGETS: Endpoint = Endpoint::query("budget.list", "/budget/")
        .namespace("/budget/")
        .provides(&[Tag::Budget])
        .list();

    const PROFILE: Endpoint = Endpoint::query("auth.profile", "/auth/profile");

    fn transport(session: Session) -> (Arc<FakeTransport>, AuthorizedTransport) {
        let fake = FakeTransport::new();
        let authorized = AuthorizedTransport::new(
            fake.clone(),
            SessionContext::with_session(session),
            "Europe/Oslo",
        );
        (fake, authorized)
    }

    #[tokio::test]
    async fn test_gate_blocks_missing_namespace() {
        let (fake, transport) = transport(Session::with_token("t").grant("/policy/"));
        fake.respond("budget.list", json!([{"id": 1}]));

        let dispatch = transport.execute(&LIST_BUDGETS, &Value::Null).await.unwrap();
        assert!(dispatch.is_gated());
        assert_eq!(dispatch.into_value(&LIST_BUDGETS), json!([]));
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_granted_namespace_reaches_backend() {
        let (fake, transport) = transport(Session::with_token("t").grant("/budget/"));
        fake.respond("budget.list", json!([{"id": 1}]));

        let dispatch = transport.execute(&LIST_BUDGETS, &Value::Null).await.unwrap();
        assert_eq!(dispatch, Dispatch::Data(json!([{"id": 1}])));
        assert_eq!(fake.calls(), 1);

        let credentials = fake.last_credentials().unwrap();
        assert_eq!(credentials.bearer_token.as_deref(), Some("t"));
        assert_eq!(credentials.timezone, "Europe/Oslo");
    }

    #[tokio::test]
    async fn test_super_admin_bypasses_gate() {
        let (fake, transport) = transport(Session::with_token("t").super_admin());
        fake.respond("budget.list", json!([]));

        let dispatch = transport.execute(&LIST_BUDGETS, &Value::Null).await.unwrap();
        assert!(!dispatch.is_gated());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_ungated_endpoint_ignores_namespaces() {
        let (fake, transport) = transport(Session::with_token("t"));
        fake.respond("auth.profile", json!({"namespaces": []}));

        transport.execute(&PROFILE, &Value::Null).await.unwrap();
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_401_expires_session_and_propagates() {
        let (fake, transport) = transport(Session::with_token("t").super_admin());
        fake.fail("budget.list", ConsoleError::Unauthorized("expired".into()));

        let err = transport.execute(&LIST_BUDGETS, &Value::Null).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(transport.session().current().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_keeps_session() {
        let (fake, transport) = transport(Session::with_token("t").super_admin());
        fake.fail(
            "budget.list",
            ConsoleError::Transport {
                status: 500,
                message: "boom".into(),
            },
        );

        let err = transport.execute(&LIST_BUDGETS, &Value::Null).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(transport.session().current().is_some());
    }

    #[tokio::test]
    async fn test_transform_applied() {
        fn unwrap_data(value: Value) -> Value {
            value.get("data").cloned().unwrap_or(Value::Null)
        }
        const WRAPPED: Endpoint =
            Endpoint::mutation(Method::Post, "wrapped", "/wrapped").transform(unwrap_data);

        let (fake, transport) = transport(Session::with_token("t"));
        fake.respond("wrapped", json!({"data": 5}));

        let dispatch = transport.execute(&WRAPPED, &json!({})).await.unwrap();
        assert_eq!(dispatch, Dispatch::Data(json!(5)));
    }
}
