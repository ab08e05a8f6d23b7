//! In-process fakes for the transport and credential seams

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use url::Url;

use super::auth::{CredentialBroker, CredentialSource, IssuedToken};
use super::error::{GatewayError, GatewayResult};
use super::gateway::ProxyGateway;
use super::transport::{McpTransport, TransportConnector};
use super::types::*;

/// Scriptable remote server shared by every session opened against it
#[derive(Default)]
pub struct MockRemote {
    /// Raw descriptors, so malformed entries can be served
    tools: RwLock<Vec<serde_json::Value>>,
    resources: RwLock<Vec<Resource>>,
    prompts: RwLock<Vec<Prompt>>,
    /// Only this bearer token is accepted by operations, when set
    accepted_token: RwLock<Option<String>>,
    /// Only this bearer token survives the handshake, when set
    handshake_token: RwLock<Option<String>>,
    /// method -> non-auth failure message
    failing: RwLock<HashMap<String, String>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    tokens: Mutex<Vec<String>>,
    /// 0 disables paging
    pub page_size: AtomicUsize,
    pub delay_ms: AtomicU64,
    pub ping_fails: AtomicBool,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn TransportConnector> {
        Arc::new(MockConnector { remote: self.clone() })
    }

    pub fn add_tool(&self, name: &str, input_schema: serde_json::Value) {
        self.tools.write().push(json!({
            "name": name,
            "description": format!("{} tool", name),
            "inputSchema": input_schema,
        }));
    }

    /// Serve `descriptor` verbatim in `tools/list`
    pub fn add_raw_tool(&self, descriptor: serde_json::Value) {
        self.tools.write().push(descriptor);
    }

    pub fn add_resource(&self, uri: &str) {
        self.resources.write().push(Resource {
            uri: uri.to_string(),
            name: None,
            description: None,
            mime_type: Some("text/plain".to_string()),
        });
    }

    pub fn add_prompt(&self, name: &str, arguments: serde_json::Value) {
        self.prompts.write().push(Prompt {
            name: name.to_string(),
            description: None,
            arguments,
        });
    }

    pub fn accept_only(&self, token: &str) {
        *self.accepted_token.write() = Some(token.to_string());
    }

    pub fn handshake_accept_only(&self, token: &str) {
        *self.handshake_token.write() = Some(token.to_string());
    }

    pub fn fail_method(&self, method: &str, message: &str) {
        self.failing.write().insert(method.to_string(), message.to_string());
    }

    /// Bearer tokens presented at handshake, in order
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    /// How many times `method` reached the remote
    pub fn invocations(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    pub fn last_params(&self, method: &str) -> Option<serde_json::Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }

    fn page<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> (Vec<T>, Option<String>) {
        let size = self.page_size.load(SeqCst);
        if size == 0 {
            return (items.to_vec(), None);
        }
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + size).min(items.len());
        let next = (end < items.len()).then(|| end.to_string());
        (items[start.min(end)..end].to_vec(), next)
    }
}

struct MockConnector {
    remote: Arc<MockRemote>,
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(
        &self,
        _endpoint: &Url,
        headers: HashMap<String, String>,
    ) -> GatewayResult<Arc<dyn McpTransport>> {
        let token = headers
            .get("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string();
        self.remote.opens.fetch_add(1, SeqCst);
        self.remote.tokens.lock().push(token.clone());

        let required = self.remote.handshake_token.read().clone();
        if let Some(required) = required {
            if required != token {
                return Err(GatewayError::Authentication(
                    "HTTP 401 Unauthorized: invalid token".to_string(),
                ));
            }
        }
        Ok(Arc::new(MockTransport {
            remote: self.remote.clone(),
            token,
            open: AtomicBool::new(true),
        }))
    }
}

struct MockTransport {
    remote: Arc<MockRemote>,
    token: String,
    open: AtomicBool,
}

impl MockTransport {
    async fn enter(&self, method: &str, params: serde_json::Value) -> GatewayResult<()> {
        if !self.open.load(SeqCst) {
            return Err(GatewayError::Connection("session is closed".to_string()));
        }
        let delay = self.remote.delay_ms.load(SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        self.remote.calls.lock().push((method.to_string(), params));

        let accepted = self.remote.accepted_token.read().clone();
        if let Some(accepted) = accepted {
            if accepted != self.token {
                return Err(GatewayError::Authentication("HTTP 401 Unauthorized".to_string()));
            }
        }
        let failure = self.remote.failing.read().get(method).cloned();
        match failure {
            Some(message) => Err(GatewayError::remote(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl McpTransport for MockTransport {
    async fn list_tools(&self, cursor: Option<&str>) -> GatewayResult<ToolsListResult> {
        self.enter("tools/list", json!({ "cursor": cursor })).await?;
        let tools = self.remote.tools.read().clone();
        let (tools, next_cursor) = self.remote.page(&tools, cursor);
        Ok(serde_json::from_value(json!({ "tools": tools, "nextCursor": next_cursor }))?)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value> {
        self.enter("tools/call", json!({ "name": name, "arguments": arguments })).await?;
        Ok(json!({ "tool": name, "arguments": arguments }))
    }

    async fn list_resources(&self, cursor: Option<&str>) -> GatewayResult<ResourcesListResult> {
        self.enter("resources/list", json!({ "cursor": cursor })).await?;
        let resources = self.remote.resources.read().clone();
        let (resources, next_cursor) = self.remote.page(&resources, cursor);
        Ok(ResourcesListResult { resources, next_cursor })
    }

    async fn read_resource(&self, uri: &str) -> GatewayResult<serde_json::Value> {
        self.enter("resources/read", json!({ "uri": uri })).await?;
        Ok(json!({ "contents": [{ "uri": uri, "text": "content" }] }))
    }

    async fn list_prompts(&self, cursor: Option<&str>) -> GatewayResult<PromptsListResult> {
        self.enter("prompts/list", json!({ "cursor": cursor })).await?;
        let prompts = self.remote.prompts.read().clone();
        let (prompts, next_cursor) = self.remote.page(&prompts, cursor);
        Ok(PromptsListResult { prompts, next_cursor })
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value> {
        self.enter("prompts/get", json!({ "name": name, "arguments": arguments })).await?;
        Ok(json!({ "prompt": name, "arguments": arguments }))
    }

    async fn ping(&self) -> GatewayResult<()> {
        if self.remote.ping_fails.load(SeqCst) {
            return Err(GatewayError::Connection("connection reset".to_string()));
        }
        self.enter("ping", json!(null)).await
    }

    async fn close(&self) -> GatewayResult<()> {
        if self.open.swap(false, SeqCst) {
            self.remote.closes.fetch_add(1, SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(SeqCst)
    }

    fn session_id(&self) -> Option<String> {
        None
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}

/// Issues `token-1`, `token-2`, ... with a fixed lifetime
pub struct CountingSource {
    issued: AtomicU64,
    expires_in: Option<u64>,
}

#[async_trait]
impl CredentialSource for CountingSource {
    async fn fetch(&self) -> GatewayResult<IssuedToken> {
        let n = self.issued.fetch_add(1, SeqCst) + 1;
        Ok(IssuedToken {
            value: format!("token-{}", n),
            expires_in: self.expires_in,
        })
    }

    fn source_type(&self) -> &'static str {
        "counting"
    }
}

pub fn counting_broker(expires_in: Option<u64>) -> CredentialBroker {
    CredentialBroker::new(Box::new(CountingSource {
        issued: AtomicU64::new(0),
        expires_in,
    }))
}

pub fn gateway_with(remote: Arc<MockRemote>, expires_in: Option<u64>) -> ProxyGateway {
    ProxyGateway::new(
        Some("http://mock.invalid/mcp".to_string()),
        counting_broker(expires_in),
        remote.connector(),
        500,
    )
}
