//! MCP Streamable HTTP Transport
//!
//! JSON-RPC over POST to a single endpoint. Responses arrive either as a
//! JSON body or as an SSE stream; the server may assign a session id through
//! the `Mcp-Session-Id` header, which is echoed on every later request and
//! used for a best-effort DELETE on close.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::error::{GatewayError, GatewayResult};
use super::transport::{McpTransport, TransportConnector};
use super::types::*;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Streamable HTTP session
pub struct StreamableHttpTransport {
    client: Client,
    endpoint: Url,
    /// Extra headers sent on every request (carries `Authorization`)
    headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
    open: AtomicBool,
    timeout_ms: u64,
    request_id: AtomicU64,
    server_info: RwLock<Option<ServerInfo>>,
}

impl StreamableHttpTransport {
    /// Create an unopened transport; call `initialize` before use
    pub fn new(
        endpoint: Url,
        headers: HashMap<String, String>,
        timeout_ms: u64,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            headers,
            session_id: RwLock::new(None),
            open: AtomicBool::new(false),
            timeout_ms,
            request_id: AtomicU64::new(1),
            server_info: RwLock::new(None),
        })
    }

    /// Server identity reported by the handshake
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref session_id) = *self.session_id.read() {
            request = request.header(SESSION_HEADER, session_id.as_str());
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        request
    }

    fn build_request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");

        self.apply_headers(request).json(body)
    }

    fn ensure_open(&self) -> GatewayResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Connection("session is closed".to_string()))
        }
    }

    fn remember_session_id(&self, response: &Response) {
        if let Some(sid) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(sid) {
                info!("MCP session ID: {}", sid);
                *current = Some(sid.to_string());
            }
        }
    }

    /// Send a request and return its `result` member
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value> {
        let request = JsonRpcRequest::new(method, params, self.next_request_id());
        let body = serde_json::to_value(&request)?;

        debug!("Sending MCP request: {} (id: {})", request.method, request.id);

        let response = self.build_request(&body).send().await?;
        self.remember_session_id(&response);

        let reply = self.handle_response(response, &request.id).await?;
        if let Some(error) = reply.error {
            return Err(GatewayError::json_rpc(error.code, error.message));
        }
        reply
            .result
            .ok_or_else(|| GatewayError::remote(format!("missing result in {} response", method)))
    }

    async fn request_as<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> GatewayResult<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(GatewayError::from)
    }

    async fn handle_response(
        &self,
        response: Response,
        request_id: &serde_json::Value,
    ) -> GatewayResult<JsonRpcResponse> {
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        debug!("MCP response status: {}, content-type: {}", status, content_type);

        match status {
            StatusCode::OK | StatusCode::ACCEPTED => {
                if content_type.contains("text/event-stream") {
                    self.handle_sse_response(response, request_id).await
                } else {
                    Ok(response.json::<JsonRpcResponse>().await?)
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let error_text = response.text().await.unwrap_or_default();
                Err(GatewayError::Authentication(format!("HTTP {}: {}", status, error_text)))
            }
            StatusCode::NOT_FOUND => Err(GatewayError::Connection(format!(
                "endpoint or session not found: {}",
                self.endpoint
            ))),
            StatusCode::BAD_REQUEST => {
                let error_text = response.text().await.unwrap_or_default();
                Err(GatewayError::remote(format!("Bad request: {}", error_text)))
            }
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                Err(GatewayError::Connection(format!("HTTP {}: {}", status, error_text)))
            }
        }
    }

    /// Read SSE events until the response matching `request_id` arrives
    async fn handle_sse_response(
        &self,
        response: Response,
        request_id: &serde_json::Value,
    ) -> GatewayResult<JsonRpcResponse> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk).replace("\r\n", "\n"));

            while let Some(event_end) = buffer.find("\n\n") {
                let event_str: String = buffer.drain(..event_end + 2).collect();
                if let Some(reply) = self.match_sse_event(&event_str, request_id) {
                    return Ok(reply);
                }
            }
        }

        // Trailing event without a blank-line terminator
        if let Some(reply) = self.match_sse_event(&buffer, request_id) {
            return Ok(reply);
        }

        Err(GatewayError::remote("No result in SSE stream"))
    }

    fn match_sse_event(
        &self,
        text: &str,
        request_id: &serde_json::Value,
    ) -> Option<JsonRpcResponse> {
        let event = parse_sse_event(text)?;
        match serde_json::from_str::<JsonRpcResponse>(&event.data) {
            Ok(reply) if reply.id == *request_id => Some(reply),
            Ok(_) => None,
            Err(_) => {
                debug!("Ignoring non-response SSE event: {:?}", event.event);
                None
            }
        }
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> GatewayResult<()> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        let response = self.build_request(&notification).send().await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Authentication(
                format!("HTTP {} on {}", response.status(), method),
            )),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(GatewayError::Connection(format!(
                    "Notification failed with HTTP {}: {}",
                    status, error_text
                )))
            }
        }
    }

    /// Run the initialize handshake and mark the session open
    pub async fn initialize(&self, params: InitializeParams) -> GatewayResult<InitializeResult> {
        let result: InitializeResult = self
            .request_as("initialize", Some(serde_json::to_value(&params)?))
            .await?;

        if result.protocol_version != params.protocol_version {
            warn!(
                "Protocol version mismatch: offered {}, server chose {}",
                params.protocol_version, result.protocol_version
            );
        }

        *self.server_info.write() = Some(result.server_info.clone());
        self.send_notification("notifications/initialized", None).await?;
        self.open.store(true, Ordering::SeqCst);

        info!(
            "Connected to MCP server: {} (protocol: {})",
            result.server_info.name, result.protocol_version
        );
        Ok(result)
    }
}

/// Parse an SSE event from text
pub(crate) fn parse_sse_event(text: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = String::new();
    let mut id = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim());
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = Some(rest.trim().to_string());
        }
    }

    if data.is_empty() {
        None
    } else {
        Some(SseEvent { event, data, id })
    }
}

fn cursor_params(cursor: Option<&str>) -> Option<serde_json::Value> {
    cursor.map(|c| serde_json::json!({ "cursor": c }))
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn list_tools(&self, cursor: Option<&str>) -> GatewayResult<ToolsListResult> {
        self.ensure_open()?;
        self.request_as("tools/list", cursor_params(cursor)).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value> {
        self.ensure_open()?;
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        self.request("tools/call", Some(serde_json::to_value(&params)?)).await
    }

    async fn list_resources(&self, cursor: Option<&str>) -> GatewayResult<ResourcesListResult> {
        self.ensure_open()?;
        self.request_as("resources/list", cursor_params(cursor)).await
    }

    async fn read_resource(&self, uri: &str) -> GatewayResult<serde_json::Value> {
        self.ensure_open()?;
        self.request("resources/read", Some(serde_json::json!({ "uri": uri }))).await
    }

    async fn list_prompts(&self, cursor: Option<&str>) -> GatewayResult<PromptsListResult> {
        self.ensure_open()?;
        self.request_as("prompts/list", cursor_params(cursor)).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value> {
        self.ensure_open()?;
        let mut params = serde_json::json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request("prompts/get", Some(params)).await
    }

    async fn ping(&self) -> GatewayResult<()> {
        self.ensure_open()?;
        self.request("ping", None).await?;
        Ok(())
    }

    async fn close(&self) -> GatewayResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing MCP session at {}", self.endpoint);
        let session_id = self.session_id.write().take();
        *self.server_info.write() = None;

        if let Some(session_id) = session_id {
            let mut request = self
                .client
                .delete(self.endpoint.clone())
                .header(SESSION_HEADER, session_id.as_str());
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }
            let response = request.send().await?;
            // 405 means the server does not support explicit termination
            let status = response.status();
            if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
                debug!("Session DELETE returned HTTP {}", status);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn transport_type(&self) -> &'static str {
        "streamable-http"
    }
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.open)
            .field("session_id", &self.session_id)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Opens streamable HTTP sessions
#[derive(Debug, Clone)]
pub struct StreamableHttpConnector {
    timeout_ms: u64,
    client_info: ClientInfo,
}

impl StreamableHttpConnector {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            client_info: ClientInfo::default(),
        }
    }

    /// Override the client name announced in the handshake
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_info.name = name.into();
        self
    }
}

#[async_trait]
impl TransportConnector for StreamableHttpConnector {
    async fn open(
        &self,
        endpoint: &Url,
        headers: HashMap<String, String>,
    ) -> GatewayResult<Arc<dyn McpTransport>> {
        info!("Connecting to MCP server at {}", endpoint);
        let transport = StreamableHttpTransport::new(endpoint.clone(), headers, self.timeout_ms)?;
        transport.initialize(InitializeParams::new(self.client_info.clone())).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::bearer_headers;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn handle(headers: HeaderMap, Json(body): Json<Value>) -> AxumResponse {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer good");
        if !authorized {
            return (AxumStatus::UNAUTHORIZED, "invalid token").into_response();
        }

        let id = body.get("id").cloned();
        let method = body["method"].as_str().unwrap_or_default().to_string();
        let Some(id) = id else {
            return AxumStatus::ACCEPTED.into_response();
        };

        match method.as_str() {
            "initialize" => (
                [("mcp-session-id", "sess-1")],
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": MCP_PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "mock", "version": "1.0" }
                    }
                })),
            )
                .into_response(),
            "tools/list" => {
                assert_eq!(
                    headers.get("mcp-session-id").and_then(|v| v.to_str().ok()),
                    Some("sess-1")
                );
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "tools": [{ "name": "echo", "inputSchema": { "type": "object" } }] }
                }))
                .into_response()
            }
            "resources/read" => {
                let event = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "contents": [{ "uri": body["params"]["uri"], "text": "hi" }] }
                });
                let progress = r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#;
                let sse = format!(
                    "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                    progress, event
                );
                ([("content-type", "text/event-stream")], sse).into_response()
            }
            _ => Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "Method not found" }
            }))
            .into_response(),
        }
    }

    async fn spawn_server() -> Url {
        let app = Router::new().route("/mcp", post(handle).delete(|| async { AxumStatus::OK }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/mcp", addr)).unwrap()
    }

    #[test]
    fn test_parse_sse_event() {
        let event = parse_sse_event("event: message\ndata: {\"test\": true}\nid: 123").unwrap();
        assert_eq!(event.event, Some("message".to_string()));
        assert_eq!(event.data, "{\"test\": true}");
        assert_eq!(event.id, Some("123".to_string()));

        assert!(parse_sse_event(": keep-alive").is_none());
    }

    #[tokio::test]
    async fn test_handshake_and_list_tools() {
        let endpoint = spawn_server().await;
        let connector = StreamableHttpConnector::new(5_000);
        let transport = connector.open(&endpoint, bearer_headers("good")).await.unwrap();

        assert!(transport.is_open());
        assert_eq!(transport.session_id().as_deref(), Some("sess-1"));

        let tools = transport.list_tools(None).await.unwrap();
        assert_eq!(tools.tools.len(), 1);
        assert_eq!(tools.tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_sse_response_skips_notifications() {
        let endpoint = spawn_server().await;
        let transport = StreamableHttpConnector::new(5_000)
            .open(&endpoint, bearer_headers("good"))
            .await
            .unwrap();

        let result = transport.read_resource("file:///a.txt").await.unwrap();
        assert_eq!(result["contents"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_rejected_token_is_authentication_error() {
        let endpoint = spawn_server().await;
        let err = StreamableHttpConnector::new(5_000)
            .open(&endpoint, bearer_headers("stale"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::Authentication(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_json_rpc_error_and_close() {
        let endpoint = spawn_server().await;
        let transport = StreamableHttpConnector::new(5_000)
            .open(&endpoint, bearer_headers("good"))
            .await
            .unwrap();

        let err = transport.get_prompt("missing", None).await.unwrap_err();
        assert_eq!(err.code(), Some(-32601));

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.list_tools(None).await,
            Err(GatewayError::Connection(_))
        ));
    }
}
