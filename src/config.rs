//! Gateway configuration
//!
//! Defaults, then an optional TOML file, then environment overrides. Empty
//! values count as unset at every layer.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::mcp::error::{GatewayError, GatewayResult};

pub const ENV_REMOTE_URL: &str = "EXTERNAL_MCP_URL";
pub const ENV_TOKEN: &str = "EXTERNAL_MCP_TOKEN";
pub const ENV_LOGIN_URL: &str = "EXTERNAL_MCP_LOGIN_URL";
pub const ENV_EMAIL: &str = "EXTERNAL_MCP_EMAIL";
pub const ENV_PASSWORD: &str = "EXTERNAL_MCP_PASSWORD";
pub const ENV_TIMEOUT_MS: &str = "MCP_RELAY_TIMEOUT_MS";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Login exchange settings
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub url: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("url", &self.url)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Remote MCP endpoint; the gateway stays idle without one
    pub remote_url: Option<String>,
    /// Static bearer token, preferred over login when set
    pub static_token: Option<String>,
    pub login: LoginConfig,
    /// Deadline for each network step
    pub request_timeout_ms: u64,
    /// Name announced in the initialize handshake
    pub client_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            static_token: None,
            login: LoginConfig::default(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            client_name: "mcp-relay".to_string(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("remote_url", &self.remote_url)
            .field("static_token", &self.static_token.as_ref().map(|_| "<redacted>"))
            .field("login", &self.login)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("client_name", &self.client_name)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl GatewayConfig {
    /// `<config_dir>/mcp-relay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mcp-relay").join("config.toml"))
    }

    /// Load from `path` (which must exist) or the default location (used
    /// only when present), then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> GatewayResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| GatewayError::Configuration(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> GatewayResult<Self> {
        let mut config: GatewayConfig = toml::from_str(content)
            .map_err(|e| GatewayError::Configuration(format!("TOML parse error: {}", e)))?;
        config.normalize();
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> GatewayResult<()> {
        let get = |name: &str| non_empty(lookup(name));

        if let Some(url) = get(ENV_REMOTE_URL) {
            self.remote_url = Some(url);
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.static_token = Some(token);
        }
        if let Some(url) = get(ENV_LOGIN_URL) {
            self.login.url = Some(url);
        }
        if let Some(email) = get(ENV_EMAIL) {
            self.login.email = Some(email);
        }
        if let Some(password) = get(ENV_PASSWORD) {
            self.login.password = Some(password);
        }
        if let Some(timeout) = get(ENV_TIMEOUT_MS) {
            self.request_timeout_ms = timeout.parse().map_err(|_| {
                GatewayError::Configuration(format!(
                    "{} must be milliseconds, got {:?}",
                    ENV_TIMEOUT_MS, timeout
                ))
            })?;
        }
        self.normalize();
        Ok(())
    }

    fn normalize(&mut self) {
        self.remote_url = non_empty(self.remote_url.take());
        self.static_token = non_empty(self.static_token.take());
        self.login.url = non_empty(self.login.url.take());
        self.login.email = non_empty(self.login.email.take());
        // Passwords are taken verbatim; only an empty one is dropped
        self.login.password = self.login.password.take().filter(|p| !p.is_empty());
        self.request_timeout_ms = self.effective_timeout_ms();
    }

    /// Per-step deadline. Zero would expire every step at once, so it means
    /// the default.
    pub fn effective_timeout_ms(&self) -> u64 {
        if self.request_timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            self.request_timeout_ms
        }
    }

    /// Which credential source will be used
    pub fn credential_mode(&self) -> &'static str {
        if self.static_token.is_some() {
            "static"
        } else {
            "login"
        }
    }
}
