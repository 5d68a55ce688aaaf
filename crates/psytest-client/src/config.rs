//! Client configuration and content source factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use psytest_core::delivery::{DeliveryConfig, DEFAULT_TIME_LIMIT_MULTIPLIER};
use psytest_core::session::SessionConfig;
use psytest_core::traits::ContentSource;

use crate::http::{HttpContentSource, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};

/// Connection settings for the test server.
///
/// Note: Custom Debug impl masks the API key.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Delivery timing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Seconds of countdown per authored time-limit unit.
    #[serde(default = "default_multiplier")]
    pub time_limit_multiplier: u32,
    #[serde(default = "default_grace")]
    pub grace_period_secs: u64,
    /// Countdown tick interval in milliseconds.
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
    /// Extra attempts when loading content fails transiently.
    #[serde(default = "default_retries")]
    pub load_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_multiplier() -> u32 {
    DEFAULT_TIME_LIMIT_MULTIPLIER
}
fn default_grace() -> u64 {
    10
}
fn default_tick() -> u64 {
    1000
}
fn default_retries() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    500
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            time_limit_multiplier: default_multiplier(),
            grace_period_secs: default_grace(),
            tick_ms: default_tick(),
            load_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Top-level psytest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PsytestConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliverySettings,
}

impl PsytestConfig {
    /// Session settings derived from the `[delivery]` section.
    pub fn session_config(&self) -> SessionConfig {
        let d = &self.delivery;
        SessionConfig {
            delivery: DeliveryConfig {
                time_limit_multiplier: d.time_limit_multiplier,
                grace_period: Duration::from_secs(d.grace_period_secs),
            },
            // A zero tick would make the countdown spin.
            tick: Duration::from_millis(d.tick_ms.max(1)),
            load_retries: d.load_retries,
            retry_delay: Duration::from_millis(d.retry_delay_ms),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `psytest.toml` in the current directory
/// 2. `~/.config/psytest/config.toml`
///
/// Environment variable overrides: `PSYTEST_BASE_URL`, `PSYTEST_API_KEY`.
pub fn load_config() -> Result<PsytestConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<PsytestConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("psytest.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            let config = toml::from_str::<PsytestConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            config
        }
        None => PsytestConfig::default(),
    };

    if let Ok(url) = std::env::var("PSYTEST_BASE_URL") {
        config.server.base_url = url;
    }
    if let Ok(key) = std::env::var("PSYTEST_API_KEY") {
        config.server.api_key = Some(key);
    }

    config.server.base_url = resolve_env_vars(&config.server.base_url);
    config.server.api_key = config
        .server
        .api_key
        .as_deref()
        .map(resolve_env_vars)
        .filter(|k| !k.is_empty());

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("psytest"))
}

/// Create the HTTP content source described by `config`.
pub fn create_source(config: &PsytestConfig) -> Arc<dyn ContentSource> {
    let server = &config.server;
    Arc::new(HttpContentSource::new(
        &server.base_url,
        server.api_key.clone(),
        server.timeout_secs,
    ))
}
