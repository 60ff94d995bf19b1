//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys may be written inline, but `secret_env` keeps them out of the
//! TOML. `GEMINI_API_KEY` replaces the secret of the first credential.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use common::Secret;
use key_pool::{Credential, RotationPolicy};
use serde::Deserialize;

/// Env var that overrides the first credential's key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub open: OpenConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Admin API listener; disabled when absent
    #[serde(default)]
    pub admin_addr: Option<SocketAddr>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-request upstream timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Credential pool settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Credential status file; status stays in memory when absent
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u32,
    #[serde(default = "default_reset_timezone")]
    pub reset_timezone: String,
    #[serde(default = "default_reset_margin_secs")]
    pub reset_margin_secs: u64,
}

/// One API key of the pool
#[derive(Debug, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    /// Display name; defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub secret: Option<Secret<String>>,
    /// Env var holding the key, preferred over `secret`
    #[serde(default)]
    pub secret_env: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
}

/// Session-authenticated alternate backend
#[derive(Debug, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_base_url")]
    pub base_url: String,
    /// Session token to start with; usually supplied later via the admin API
    #[serde(default)]
    pub session: Option<Secret<String>>,
    #[serde(default)]
    pub session_env: Option<String>,
}

/// Keyless last-resort backend
#[derive(Debug, Deserialize)]
pub struct OpenConfig {
    #[serde(default = "default_open_image_url")]
    pub image_url: String,
    #[serde(default = "default_open_text_url")]
    pub text_url: String,
}

fn default_max_connections() -> usize {
    256
}

fn default_timeout() -> u64 {
    120
}

fn default_min_interval_ms() -> u64 {
    key_pool::dispatcher::DEFAULT_MIN_INTERVAL.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_block_threshold() -> u32 {
    2
}

fn default_reset_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_reset_margin_secs() -> u64 {
    300
}

fn default_gemini_base_url() -> String {
    backend::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_image_model() -> String {
    backend::gemini::DEFAULT_IMAGE_MODEL.to_string()
}

fn default_text_model() -> String {
    backend::gemini::DEFAULT_TEXT_MODEL.to_string()
}

fn default_web_base_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_open_image_url() -> String {
    backend::open::DEFAULT_IMAGE_URL.to_string()
}

fn default_open_text_url() -> String {
    backend::open::DEFAULT_TEXT_URL.to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            min_interval_ms: default_min_interval_ms(),
            max_attempts: default_max_attempts(),
            block_threshold: default_block_threshold(),
            reset_timezone: default_reset_timezone(),
            reset_margin_secs: default_reset_margin_secs(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            image_model: default_image_model(),
            text_model: default_text_model(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            base_url: default_web_base_url(),
            session: None,
            session_env: None,
        }
    }
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            image_url: default_open_image_url(),
            text_url: default_open_text_url(),
        }
    }
}

impl PoolConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Rotation settings, parsing the reset timezone.
    pub fn rotation_policy(&self) -> common::Result<RotationPolicy> {
        let reset_timezone = Tz::from_str(&self.reset_timezone).map_err(|e| {
            common::Error::Config(format!(
                "reset_timezone {:?} is not a known timezone: {e}",
                self.reset_timezone
            ))
        })?;
        Ok(RotationPolicy {
            max_attempts: self.max_attempts,
            block_threshold: self.block_threshold,
            reset_timezone,
            reset_margin: Duration::from_secs(self.reset_margin_secs),
        })
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Key resolution order per credential:
    /// 1. `GEMINI_API_KEY` (first credential only)
    /// 2. the env var named by `secret_env`
    /// 3. inline `secret`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.pool.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if config.pool.block_threshold == 0 {
            return Err(common::Error::Config(
                "block_threshold must be greater than 0".into(),
            ));
        }
        config.pool.rotation_policy()?;

        for url in [
            &config.gemini.base_url,
            &config.web.base_url,
            &config.open.image_url,
            &config.open.text_url,
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "backend urls must start with http:// or https://, got: {url}"
                )));
            }
        }

        for credential in &mut config.credentials {
            if let Some(var) = &credential.secret_env
                && let Ok(value) = std::env::var(var)
                && !value.trim().is_empty()
            {
                credential.secret = Some(Secret::new(value.trim().to_owned()));
            }
        }

        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            let key = Secret::new(key.trim().to_owned());
            match config.credentials.first_mut() {
                Some(first) => first.secret = Some(key),
                None => config.credentials.push(CredentialConfig {
                    id: "default".into(),
                    name: None,
                    secret: Some(key),
                    secret_env: None,
                }),
            }
        }

        let mut seen = HashSet::new();
        for credential in &config.credentials {
            if credential.id.trim().is_empty() {
                return Err(common::Error::Config("credential id must not be empty".into()));
            }
            if !seen.insert(credential.id.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate credential id: {}",
                    credential.id
                )));
            }
            if credential.secret.as_ref().is_none_or(|s| s.is_empty()) {
                return Err(common::Error::Config(format!(
                    "credential {} has no key (set secret, secret_env or {API_KEY_ENV})",
                    credential.id
                )));
            }
        }

        if let Some(var) = &config.web.session_env
            && let Ok(value) = std::env::var(var)
            && !value.trim().is_empty()
        {
            config.web.session = Some(Secret::new(value.trim().to_owned()));
        }

        Ok(config)
    }

    /// Pool credentials in configuration order.
    pub fn pool_credentials(&self) -> Vec<Credential> {
        self.credentials
            .iter()
            .filter_map(|c| {
                let secret = c.secret.as_ref()?;
                let name = c.name.clone().unwrap_or_else(|| c.id.clone());
                Some(Credential::new(c.id.clone(), name, secret.expose().clone()))
            })
            .collect()
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("studio-gateway.toml")
    }
}
