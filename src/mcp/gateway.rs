//! Proxy Gateway
//!
//! Owns the one remote session and the credential behind it. Every proxied
//! operation runs in two phases:
//!
//! 1. ensure-ready: open a session if none is live, or renew it up front
//!    when the cached credential has already expired;
//! 2. invoke with one retry: if the call fails with an authentication-looking
//!    error, close the session, force a credential refresh, reopen, and retry
//!    exactly once. A second failure is returned unchanged.
//!
//! Session replacement is serialized behind an async admission gate. Each
//! session carries a generation number; a caller whose call failed on
//! generation `g` only reconnects if the live session is still `g`, so
//! concurrent failures share one refresh.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::auth::{CredentialBroker, CredentialSource, LoginSource, StaticTokenSource};
use super::classify::is_auth_failure;
use super::error::{GatewayError, GatewayResult};
use super::health::ServerHealth;
use super::streamable_http::StreamableHttpConnector;
use super::transport::{bearer_headers, McpTransport, TransportConnector};
use super::types::{Prompt, Resource, SessionState, Tool};
use crate::config::GatewayConfig;

/// Upper bound on `nextCursor` pages followed by one list operation
const MAX_PAGES: usize = 100;

/// One live authenticated connection
struct Session {
    transport: Arc<dyn McpTransport>,
    credential_value: String,
    connected_at: DateTime<Utc>,
    generation: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport.transport_type())
            .field("credential_value", &"<redacted>")
            .field("connected_at", &self.connected_at)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Snapshot of the live session for diagnostics
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub generation: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub transport: Option<&'static str>,
    pub credential_expires_at: Option<DateTime<Utc>>,
}

pub struct ProxyGateway {
    remote_url: Option<String>,
    broker: CredentialBroker,
    connector: Arc<dyn TransportConnector>,
    session: RwLock<Option<Arc<Session>>>,
    state: RwLock<SessionState>,
    /// Single-flight admission for connect/reconnect
    gate: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    recoveries: AtomicU64,
    health: RwLock<ServerHealth>,
    timeout: Duration,
}

impl ProxyGateway {
    pub fn new(
        remote_url: Option<String>,
        broker: CredentialBroker,
        connector: Arc<dyn TransportConnector>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            remote_url: remote_url.filter(|u| !u.trim().is_empty()),
            broker,
            connector,
            session: RwLock::new(None),
            state: RwLock::new(SessionState::Disconnected),
            gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            health: RwLock::new(ServerHealth::default()),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Build a gateway over streamable HTTP. A configured static token wins
    /// over login-based credentials.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let timeout_ms = config.effective_timeout_ms();
        let source: Box<dyn CredentialSource> = match config.static_token.as_deref() {
            Some(token) if !token.is_empty() => Box::new(StaticTokenSource::new(token)),
            _ => Box::new(LoginSource::new(
                config.login.url.clone(),
                config.login.email.clone(),
                config.login.password.clone(),
                timeout_ms,
            )?),
        };
        let connector =
            StreamableHttpConnector::new(timeout_ms).with_client_name(config.client_name.clone());

        Ok(Self::new(
            config.remote_url.clone(),
            CredentialBroker::new(source),
            Arc::new(connector),
            timeout_ms,
        ))
    }

    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Non-blocking snapshot: a session is open and marked connected
    pub fn is_connected(&self) -> bool {
        self.live_session().is_some()
    }

    /// Number of auth-triggered recovery cycles so far
    pub fn recovery_count(&self) -> u64 {
        self.recoveries.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> ServerHealth {
        self.health.read().clone()
    }

    pub fn session_info(&self) -> SessionInfo {
        let session = self.session.read().clone();
        SessionInfo {
            state: self.state(),
            generation: session.as_ref().map(|s| s.generation).unwrap_or(0),
            connected_at: session.as_ref().map(|s| s.connected_at),
            session_id: session.as_ref().and_then(|s| s.transport.session_id()),
            transport: session.as_ref().map(|s| s.transport.transport_type()),
            credential_expires_at: self.broker.current().and_then(|c| c.expires_at()),
        }
    }

    /// Open a session with a cached (or freshly obtained) credential,
    /// replacing any existing one. Also leaves the terminal `Closed` state.
    pub async fn connect(&self) -> GatewayResult<()> {
        let _gate = self.gate.lock().await;
        self.open_session_recovering_locked(false).await.map(|_| ())
    }

    /// Close the session and return to `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        let _gate = self.gate.lock().await;
        self.retire_session_locked().await;
        *self.state.write() = SessionState::Disconnected;
    }

    /// Close the session for good; calls fail until `connect()` is invoked.
    pub async fn close(&self) {
        let _gate = self.gate.lock().await;
        self.retire_session_locked().await;
        *self.state.write() = SessionState::Closed;
        info!("Gateway closed");
    }

    pub async fn list_tools(&self) -> GatewayResult<Vec<Tool>> {
        self.invoke("tools/list", |transport| {
            collect_pages("tools", move |cursor| {
                let transport = transport.clone();
                async move {
                    let page = transport.list_tools(cursor.as_deref()).await?;
                    Ok::<_, GatewayError>((page.tools, page.next_cursor))
                }
            })
        })
        .await
    }

    /// Call a remote tool. `Null` arguments are sent as an empty object.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> GatewayResult<serde_json::Value> {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        info!("Calling tool: {}", name);
        let name = name.to_string();
        self.invoke("tools/call", move |transport| {
            let name = name.clone();
            let arguments = arguments.clone();
            async move { transport.call_tool(&name, Some(arguments)).await }
        })
        .await
    }

    pub async fn list_resources(&self) -> GatewayResult<Vec<Resource>> {
        self.invoke("resources/list", |transport| {
            collect_pages("resources", move |cursor| {
                let transport = transport.clone();
                async move {
                    let page = transport.list_resources(cursor.as_deref()).await?;
                    Ok::<_, GatewayError>((page.resources, page.next_cursor))
                }
            })
        })
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> GatewayResult<serde_json::Value> {
        let uri = uri.to_string();
        self.invoke("resources/read", move |transport| {
            let uri = uri.clone();
            async move { transport.read_resource(&uri).await }
        })
        .await
    }

    pub async fn list_prompts(&self) -> GatewayResult<Vec<Prompt>> {
        self.invoke("prompts/list", |transport| {
            collect_pages("prompts", move |cursor| {
                let transport = transport.clone();
                async move {
                    let page = transport.list_prompts(cursor.as_deref()).await?;
                    Ok::<_, GatewayError>((page.prompts, page.next_cursor))
                }
            })
        })
        .await
    }

    /// Render a remote prompt. `Null` arguments are omitted.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> GatewayResult<serde_json::Value> {
        let arguments = (!arguments.is_null()).then_some(arguments);
        let name = name.to_string();
        self.invoke("prompts/get", move |transport| {
            let name = name.clone();
            let arguments = arguments.clone();
            async move { transport.get_prompt(&name, arguments).await }
        })
        .await
    }

    /// Ping the live session. A failed ping drops the session so the next
    /// call opens a fresh one.
    pub async fn check_health(&self) -> ServerHealth {
        let Some(session) = self.live_session() else {
            self.health.write().record_failure("not connected");
            return self.health();
        };

        let start = Instant::now();
        match self.deadline("ping", session.transport.ping()).await {
            Ok(()) => {
                let latency = start.elapsed().as_millis() as u64;
                self.health.write().record_success(latency);
                debug!("Health check passed: {}ms", latency);
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
                self.health.write().record_failure(e.to_string());

                let _gate = self.gate.lock().await;
                if self.current_generation() == Some(session.generation) {
                    self.retire_session_locked().await;
                    *self.state.write() = SessionState::Disconnected;
                }
            }
        }
        self.health()
    }

    /// Ensure-ready, call, and on an auth-classified failure recover once.
    async fn invoke<T, F, Fut>(&self, operation: &'static str, call: F) -> GatewayResult<T>
    where
        F: Fn(Arc<dyn McpTransport>) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let session = self.ensure_ready().await?;

        let err = match self.deadline(operation, call(session.transport.clone())).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        // A concurrent renewal may have closed the session under this call
        let superseded = self.current_generation() != Some(session.generation);
        if !is_auth_failure(&err) && !superseded {
            error!("{} failed: {}", operation, err);
            return Err(err);
        }

        if superseded {
            debug!("{} lost its session to a concurrent renewal; retrying once", operation);
        } else {
            warn!(
                "{} failed with an authentication error ({}); renewing session and retrying once",
                operation, err
            );
        }
        let session = self.recover(session.generation).await?;

        self.deadline(operation, call(session.transport.clone()))
            .await
            .map_err(|err| {
                error!("{} failed after session renewal: {}", operation, err);
                err
            })
    }

    async fn ensure_ready(&self) -> GatewayResult<Arc<Session>> {
        if let Some(session) = self.ready_session() {
            return Ok(session);
        }

        let _gate = self.gate.lock().await;
        if let Some(session) = self.ready_session() {
            return Ok(session);
        }
        self.refuse_if_closed()?;

        let stale = self.broker.is_stale();
        if stale && self.live_session().is_some() {
            info!("Credential expired; renewing session before the call");
        }
        self.open_session_recovering_locked(stale).await
    }

    /// Replace the session that failed on `failed_generation`, unless
    /// another caller already did.
    async fn recover(&self, failed_generation: u64) -> GatewayResult<Arc<Session>> {
        let _gate = self.gate.lock().await;
        self.refuse_if_closed()?;

        if let Some(session) = self.ready_session() {
            if session.generation != failed_generation {
                debug!("Session already renewed (generation {}); reusing it", session.generation);
                return Ok(session);
            }
        }

        self.recoveries.fetch_add(1, Ordering::SeqCst);
        let result = self.open_session_locked(true).await;
        self.forget_rejected_credential(&result);
        result
    }

    /// Open a session. If the handshake rejects the credential, force one
    /// refresh and try again. Caller holds the gate.
    async fn open_session_recovering_locked(
        &self,
        force_refresh: bool,
    ) -> GatewayResult<Arc<Session>> {
        let result = match self.open_session_locked(force_refresh).await {
            Err(e) if is_auth_failure(&e) => {
                warn!(
                    "Handshake rejected the credential ({}); refreshing and reconnecting once",
                    e
                );
                self.recoveries.fetch_add(1, Ordering::SeqCst);
                self.open_session_locked(true).await
            }
            other => other,
        };
        self.forget_rejected_credential(&result);
        result
    }

    /// A credential the remote refused must not be presented again
    fn forget_rejected_credential(&self, result: &GatewayResult<Arc<Session>>) {
        if let Err(e) = result {
            if is_auth_failure(e) {
                self.broker.invalidate();
            }
        }
    }

    fn refuse_if_closed(&self) -> GatewayResult<()> {
        if self.state() == SessionState::Closed {
            Err(GatewayError::Connection(
                "gateway is closed; call connect() to reopen".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn current_generation(&self) -> Option<u64> {
        self.session.read().as_ref().map(|s| s.generation)
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        if self.state() != SessionState::Connected {
            return None;
        }
        self.session
            .read()
            .as_ref()
            .filter(|s| s.transport.is_open())
            .cloned()
    }

    /// Live session whose credential is still the broker's fresh one
    fn ready_session(&self) -> Option<Arc<Session>> {
        let credential = self.broker.current().filter(|c| !c.is_stale())?;
        self.live_session()
            .filter(|s| s.credential_value == credential.value())
    }

    /// Close and drop the current session. Close errors are swallowed.
    /// Caller holds the gate.
    async fn retire_session_locked(&self) {
        let previous = self.session.write().take();
        if let Some(previous) = previous {
            if let Err(e) = self.deadline("close", previous.transport.close()).await {
                debug!("Ignoring error while closing session {}: {}", previous.generation, e);
            }
            info!("Disconnected from external MCP server (generation {})", previous.generation);
        }
    }

    /// Retire any session, obtain a credential, and open a new session.
    /// Caller holds the gate.
    async fn open_session_locked(&self, force_refresh: bool) -> GatewayResult<Arc<Session>> {
        let endpoint = match self.remote_url.as_deref() {
            Some(url) => Url::parse(url)?,
            None => {
                *self.state.write() = SessionState::Disconnected;
                return Err(GatewayError::Configuration(
                    "remote endpoint is not configured".to_string(),
                ));
            }
        };

        self.retire_session_locked().await;
        *self.state.write() = SessionState::Connecting;

        match self.handshake(&endpoint, force_refresh).await {
            Ok((credential_value, transport)) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let session = Arc::new(Session {
                    transport,
                    credential_value,
                    connected_at: Utc::now(),
                    generation,
                });
                *self.session.write() = Some(session.clone());
                *self.state.write() = SessionState::Connected;
                info!(
                    "Connected to external MCP server {} (generation {})",
                    endpoint, generation
                );
                Ok(session)
            }
            Err(e) => {
                *self.state.write() = SessionState::Disconnected;
                error!("Failed to connect to external MCP server {}: {}", endpoint, e);
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        endpoint: &Url,
        force_refresh: bool,
    ) -> GatewayResult<(String, Arc<dyn McpTransport>)> {
        let credential = self.deadline("login", self.broker.obtain(force_refresh)).await?;
        let headers = bearer_headers(credential.value());

        let transport = self
            .deadline("handshake", self.connector.open(endpoint, headers))
            .await
            .map_err(|e| match e {
                GatewayError::Connection(_) => e,
                other => GatewayError::Connection(format!("handshake failed: {}", other)),
            })?;

        Ok((credential.value().to_string(), transport))
    }

    async fn deadline<T>(
        &self,
        step: &str,
        fut: impl Future<Output = GatewayResult<T>>,
    ) -> GatewayResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(step, self.timeout.as_millis() as u64)),
        }
    }
}

impl std::fmt::Debug for ProxyGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyGateway")
            .field("remote_url", &self.remote_url)
            .field("state", &self.state())
            .field("session", &self.session.read())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Follow `nextCursor` until the remote stops returning one
async fn collect_pages<T, F, Fut>(what: &'static str, mut fetch: F) -> GatewayResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = GatewayResult<(Vec<T>, Option<String>)>>,
{
    let mut items = Vec::new();
    let mut cursor = None;

    for _ in 0..MAX_PAGES {
        let (page, next) = fetch(cursor.take()).await?;
        items.extend(page);
        match next {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(items),
        }
    }

    warn!("Stopped listing {} after {} pages", what, MAX_PAGES);
    Ok(items)
}
