//! Credential Broker
//!
//! Owns the single bearer credential used against the remote server.
//! Credentials come from a `CredentialSource`: either a static token from
//! configuration or a login exchange (`POST {email, password}`). Expiry is
//! tracked with a five minute safety margin so a credential is considered
//! stale strictly before the remote would reject it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, Mutex};

use super::error::{GatewayError, GatewayResult};

/// Seconds subtracted from the server-declared lifetime
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// Lifetime assumed when the login response carries no `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Declared lifetimes are capped at one year
pub const MAX_EXPIRES_IN_SECS: u64 = 365 * 24 * 3600;

/// Expiry for a credential issued at `obtained_at` with a declared
/// lifetime of `expires_in` seconds, margin applied.
fn expiry_after(obtained_at: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let lifetime = expires_in.min(MAX_EXPIRES_IN_SECS) as i64 - EXPIRY_MARGIN_SECS;
    obtained_at + Duration::seconds(lifetime)
}

/// A bearer token plus its tracked expiry. Never mutated; a refresh
/// replaces it wholesale.
#[derive(Clone, PartialEq)]
pub struct Credential {
    value: String,
    obtained_at: DateTime<Utc>,
    /// `None` for static tokens, which never go stale locally
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Stale once `now >= expires_at`
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Raw token handed out by a source
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    /// Server-declared lifetime in seconds; `None` means no expiry
    pub expires_in: Option<u64>,
}

/// Where credentials come from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch a fresh token. No internal retries.
    async fn fetch(&self) -> GatewayResult<IssuedToken>;

    /// Source name for logging
    fn source_type(&self) -> &'static str;
}

/// Fixed token from configuration
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl CredentialSource for StaticTokenSource {
    async fn fetch(&self) -> GatewayResult<IssuedToken> {
        if self.token.is_empty() {
            return Err(GatewayError::Configuration("static bearer token is empty".to_string()));
        }
        Ok(IssuedToken {
            value: self.token.clone(),
            expires_in: None,
        })
    }

    fn source_type(&self) -> &'static str {
        "static"
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<serde_json::Value>,
}

/// Login exchange against an HTTP endpoint
pub struct LoginSource {
    client: Client,
    url: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

impl LoginSource {
    pub fn new(
        url: Option<String>,
        email: Option<String>,
        password: Option<String>,
        timeout_ms: u64,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            url,
            email,
            password,
        })
    }

    fn required<'a>(value: &'a Option<String>, what: &str) -> GatewayResult<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::Configuration(format!("login {} is not configured", what)))
    }
}

/// `expires_in` arrives as a number or a numeric string
fn parse_expires_in(value: Option<&serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        _ => DEFAULT_EXPIRES_IN_SECS,
    }
}

#[async_trait]
impl CredentialSource for LoginSource {
    async fn fetch(&self) -> GatewayResult<IssuedToken> {
        let url = Self::required(&self.url, "endpoint")?;
        let email = Self::required(&self.email, "identity")?;
        let password = Self::required(&self.password, "secret")?;

        debug!("Performing login exchange against {}", url);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Authentication(format!(
                "login failed with HTTP {}: {}",
                status, body
            )));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| {
                GatewayError::Authentication(format!("login response is not JSON: {}", e))
            })?;

        let value = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                GatewayError::Authentication("login response carries no token".to_string())
            })?;

        Ok(IssuedToken {
            value,
            expires_in: Some(parse_expires_in(body.expires_in.as_ref())),
        })
    }

    fn source_type(&self) -> &'static str {
        "login"
    }
}

/// Credential lifecycle events, for audit
#[derive(Debug, Clone)]
pub enum CredentialEvent {
    Refreshed {
        source: &'static str,
        obtained_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    },
    RefreshFailed {
        source: &'static str,
        error: String,
    },
    Invalidated,
}

/// Caches one credential and refreshes it on demand
pub struct CredentialBroker {
    source: Box<dyn CredentialSource>,
    cached: RwLock<Option<Credential>>,
    /// Serializes refreshes so concurrent misses share one exchange
    refresh_lock: Mutex<()>,
    exchanges: AtomicU64,
    event_tx: broadcast::Sender<CredentialEvent>,
}

impl CredentialBroker {
    pub fn new(source: Box<dyn CredentialSource>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            source,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            exchanges: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Subscribe to credential events
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.event_tx.subscribe()
    }

    /// Return the cached credential if fresh, else fetch a new one.
    pub async fn obtain(&self, force_refresh: bool) -> GatewayResult<Credential> {
        if !force_refresh {
            if let Some(credential) = self.fresh_credential() {
                return Ok(credential);
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if !force_refresh {
            if let Some(credential) = self.fresh_credential() {
                return Ok(credential);
            }
        }

        self.refresh().await
    }

    async fn refresh(&self) -> GatewayResult<Credential> {
        let source = self.source.source_type();
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        match self.source.fetch().await {
            Ok(issued) => {
                let obtained_at = Utc::now();
                let expires_at = issued.expires_in.map(|secs| expiry_after(obtained_at, secs));
                let credential = Credential {
                    value: issued.value,
                    obtained_at,
                    expires_at,
                };
                *self.cached.write() = Some(credential.clone());

                match expires_at {
                    Some(at) => info!(
                        "Credential refreshed via {} source, valid until {}",
                        source,
                        at.to_rfc3339()
                    ),
                    None => info!("Credential refreshed via {} source (no expiry)", source),
                }
                let _ = self.event_tx.send(CredentialEvent::Refreshed {
                    source,
                    obtained_at,
                    expires_at,
                });
                Ok(credential)
            }
            Err(e) => {
                *self.cached.write() = None;
                warn!("Credential refresh via {} source failed: {}", source, e);
                let _ = self.event_tx.send(CredentialEvent::RefreshFailed {
                    source,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn fresh_credential(&self) -> Option<Credential> {
        self.cached.read().as_ref().filter(|c| !c.is_stale()).cloned()
    }

    /// Snapshot of the cached credential, fresh or not
    pub fn current(&self) -> Option<Credential> {
        self.cached.read().clone()
    }

    /// True when a cached credential exists and its expiry has passed
    pub fn is_stale(&self) -> bool {
        self.cached.read().as_ref().map(Credential::is_stale).unwrap_or(false)
    }

    /// Discard the cached credential
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            debug!("Credential invalidated");
            let _ = self.event_tx.send(CredentialEvent::Invalidated);
        }
    }

    /// Number of exchanges attempted so far
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn source_type(&self) -> &'static str {
        self.source.source_type()
    }
}
