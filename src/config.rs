use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConsoleError;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "server.base_url") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Where the gateway's admin API lives and how to talk to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// IANA timezone sent as `x-timezone`. Falls back to `TZ`, then UTC.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timezone: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// The timezone to advertise to the gateway.
    pub fn effective_timezone(&self) -> String {
        self.timezone
            .clone()
            .filter(|tz| !tz.trim().is_empty())
            .or_else(|| std::env::var("TZ").ok().filter(|tz| !tz.trim().is_empty()))
            .unwrap_or_else(|| "UTC".to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// A pre-issued bearer token. When set, the console skips the login call.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// How long an entry with no subscribers survives before GC drops it.
    #[serde(default = "default_keep_unused_secs")]
    pub keep_unused_secs: u64,
    /// Period of the background GC task.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// When set, a new subscriber refetches entries older than this.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refetch_after_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_secs: default_keep_unused_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            refetch_after_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn keep_unused(&self) -> Duration {
        Duration::from_secs(self.keep_unused_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }

    pub fn refetch_after(&self) -> Option<Duration> {
        self.refetch_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogsConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "http://127.0.0.1:8400".to_string()
}
const fn default_timeout_secs() -> u64 {
    30
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_keep_unused_secs() -> u64 {
    60
}
const fn default_gc_interval_secs() -> u64 {
    30
}
const fn default_page_size() -> u32 {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `GAUD_CONSOLE_` takes precedence
    /// over the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save the current (file-level) configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConsoleError> {
        let url = url::Url::parse(&self.server.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConsoleError::Config(format!(
                "server.base_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.logs.page_size == 0 {
            return Err(ConsoleError::Config(
                "logs.page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.base_url", "GAUD_CONSOLE_BASE_URL", self.server.base_url);
        env_opt_str!("server.timezone", "GAUD_CONSOLE_TIMEZONE", self.server.timezone);
        env_parse!("server.timeout_secs", "GAUD_CONSOLE_TIMEOUT_SECS", self.server.timeout_secs);
        env_parse!(
            "server.connect_timeout_secs",
            "GAUD_CONSOLE_CONNECT_TIMEOUT_SECS",
            self.server.connect_timeout_secs
        );

        // -- Auth --
        env_opt_str!("auth.token", "GAUD_CONSOLE_TOKEN", self.auth.token);
        env_opt_str!("auth.username", "GAUD_CONSOLE_USERNAME", self.auth.username);

        // -- Cache --
        env_parse!("cache.keep_unused_secs", "GAUD_CONSOLE_CACHE_KEEP_UNUSED_SECS", self.cache.keep_unused_secs);
        env_parse!("cache.gc_interval_secs", "GAUD_CONSOLE_CACHE_GC_INTERVAL_SECS", self.cache.gc_interval_secs);
        if let Ok(val) = std::env::var("GAUD_CONSOLE_CACHE_REFETCH_AFTER_SECS") {
            self.cache.refetch_after_secs = val.parse().ok();
            ov.record("cache.refetch_after_secs", "GAUD_CONSOLE_CACHE_REFETCH_AFTER_SECS");
        }

        // -- Logs --
        env_parse!("logs.page_size", "GAUD_CONSOLE_LOGS_PAGE_SIZE", self.logs.page_size);

        // -- Logging --
        env_str!("logging.level", "GAUD_CONSOLE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "GAUD_CONSOLE_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
            logs: LogsConfig::default(),
            logging: LoggingConfig::default(),
            env_overrides: EnvOverrides::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
