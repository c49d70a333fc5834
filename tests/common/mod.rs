//! Shared fixtures for the wiremock-backed tests.

#![allow(dead_code)]

use gaud_console::Console;
use gaud_console::config::Config;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-token";

/// A console pointed at the mock server, with a fixed timezone.
pub fn console_for(server: &MockServer) -> Console {
    let mut config = Config::default();
    config.server.base_url = server.uri();
    config.server.timezone = Some("Europe/Oslo".to_string());
    config.logs.page_size = 2;
    Console::new(config).expect("console")
}

/// Mount a profile and sign in with [`TOKEN`].
pub async fn signed_in(server: &MockServer, namespaces: &[&str], is_super_admin: bool) -> Console {
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-1",
            "name": "operator",
            "namespaces": namespaces,
            "is_super_admin": is_super_admin,
        })))
        .mount(server)
        .await;

    let console = console_for(server);
    gaud_console::api::auth::resume(console.cache(), TOKEN.to_string())
        .await
        .expect("resume");
    console
}

pub fn log_row(id: u32, timestamp: &str) -> Value {
    json!({
        "id": id,
        "timestamp": timestamp,
        "level": 1,
        "request_id": format!("req-{id}"),
        "message": format!("row {id}"),
    })
}
