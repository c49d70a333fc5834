//! Login, profile, and logout.
//!
//! Login and logout bypass the cache. The profile is an ordinary cached
//! query; what it returns becomes the session's namespace grant.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cache::{QueryCache, decode};
use crate::endpoint::{Endpoint, Method, Tag};
use crate::error::{ConsoleError, Result};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub namespaces: BTreeSet<String>,
    #[serde(default)]
    pub is_super_admin: bool,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    token: String,
}

pub const LOGIN: Endpoint = Endpoint::mutation(Method::Post, "auth.login", "/auth/login");

pub const LOGOUT: Endpoint = Endpoint::mutation(Method::Post, "auth.logout", "/auth/logout");

pub const PROFILE: Endpoint = Endpoint::query("auth.profile", "/auth/profile").provides(&[Tag::Profile]);

/// Exchange credentials for a token, install the session, load the profile.
///
/// The cache is reset first so nothing fetched for a previous principal
/// survives.
pub async fn login(cache: &QueryCache, username: &str, password: &str) -> Result<Profile> {
    let transport = cache.transport();
    let response = transport
        .execute(&LOGIN, &json!({ "username": username, "password": password }))
        .await?
        .into_value(&LOGIN);
    let LoginResponse { token } = decode(response)?;

    resume(cache, token).await
}

/// Install a pre-issued token and load its profile.
pub async fn resume(cache: &QueryCache, token: String) -> Result<Profile> {
    if token.trim().is_empty() {
        return Err(ConsoleError::InvalidArgs("bearer token is empty".to_string()));
    }
    cache.reset();
    cache.transport().session().install(Session::with_token(token));
    load_profile(cache).await
}

/// Fetch the caller profile and apply its grant to the session.
pub async fn load_profile(cache: &QueryCache) -> Result<Profile> {
    let profile: Profile = super::fetch(cache, &PROFILE, Value::Null).await?;
    cache
        .transport()
        .session()
        .apply_profile(profile.namespaces.clone(), profile.is_super_admin);
    tracing::info!(
        user = %profile.name,
        namespaces = profile.namespaces.len(),
        is_super_admin = profile.is_super_admin,
        "Profile loaded"
    );
    Ok(profile)
}

/// Tell the gateway (best effort), then drop the session and the cache.
pub async fn logout(cache: &QueryCache) {
    let transport = cache.transport();
    if transport.session().is_authenticated() {
        if let Err(e) = transport.execute(&LOGOUT, &Value::Null).await {
            tracing::warn!(error = %e, "Logout call failed; clearing session anyway");
        }
    }
    transport.session().clear();
    cache.reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::session::SessionContext;
    use crate::transport::AuthorizedTransport;
    use crate::transport::fake::FakeTransport;
    use std::sync::Arc;

    fn anonymous_cache() -> (Arc<FakeTransport>, QueryCache) {
        let fake = FakeTransport::new();
        let transport = AuthorizedTransport::new(fake.clone(), SessionContext::new(), "UTC");
        (fake, QueryCache::new(transport, CachePolicy::default()))
    }

    #[tokio::test]
    async fn test_login_installs_session_and_grant() {
        let (fake, cache) = anonymous_cache();
        fake.respond("auth.login", json!({"access_token": "tok-1"}));
        fake.respond(
            "auth.profile",
            json!({"id": "u1", "name": "ops", "namespaces": ["/log/", "/budget/"]}),
        );

        let profile = login(&cache, "ops", "secret").await.unwrap();
        assert_eq!(profile.namespaces.len(), 2);

        let ticket = cache.transport().session().ticket();
        assert_eq!(ticket.token(), Some("tok-1"));
        assert!(ticket.allows("/log/"));
        assert!(!ticket.allows("/policy/"));

        let login_request = &fake.requests()[0];
        assert_eq!(
            login_request.body,
            Some(json!({"username": "ops", "password": "secret"}))
        );
        assert_eq!(fake.last_credentials().unwrap().bearer_token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_failed_login_leaves_anonymous() {
        let (fake, cache) = anonymous_cache();
        fake.fail("auth.login", ConsoleError::Unauthorized("bad credentials".into()));

        let err = login(&cache, "ops", "wrong").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!cache.transport().session().is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_cache() {
        let (fake, cache) = anonymous_cache();
        fake.respond("auth.profile", json!({"id": "u1", "name": "ops", "is_super_admin": true}));
        fake.respond("auth.logout", Value::Null);

        resume(&cache, "tok".into()).await.unwrap();
        assert!(!cache.is_empty());

        logout(&cache).await;
        assert!(cache.is_empty());
        assert!(cache.transport().session().current().is_none());
        assert_eq!(fake.calls_to("auth.logout"), 1);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let (_fake, cache) = anonymous_cache();
        assert!(matches!(
            resume(&cache, "  ".into()).await,
            Err(ConsoleError::InvalidArgs(_))
        ));
    }
}
