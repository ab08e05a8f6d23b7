//! MCP Transport Abstraction
//!
//! `McpTransport` is one open, initialized session with the remote server.
//! `TransportConnector` opens such sessions given an endpoint and a header
//! map; the gateway only ever talks to these two traits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use super::error::GatewayResult;
use super::types::*;

/// An open session with the remote server
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// List available tools (one page)
    async fn list_tools(&self, cursor: Option<&str>) -> GatewayResult<ToolsListResult>;

    /// Call a tool; the remote result is passed through untouched
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value>;

    /// List available resources (one page)
    async fn list_resources(&self, cursor: Option<&str>) -> GatewayResult<ResourcesListResult>;

    /// Read a resource
    async fn read_resource(&self, uri: &str) -> GatewayResult<serde_json::Value>;

    /// List available prompts (one page)
    async fn list_prompts(&self, cursor: Option<&str>) -> GatewayResult<PromptsListResult>;

    /// Render a prompt
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> GatewayResult<serde_json::Value>;

    /// Ping the server for health check
    async fn ping(&self) -> GatewayResult<()>;

    /// Release the session. Must be safe to call more than once.
    async fn close(&self) -> GatewayResult<()>;

    /// Whether the session is still open
    fn is_open(&self) -> bool;

    /// Server-assigned session id, if any
    fn session_id(&self) -> Option<String>;

    /// Get transport type name
    fn transport_type(&self) -> &'static str;
}

/// Opens sessions against a remote endpoint
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open and initialize a session. `headers` carries `Authorization`.
    async fn open(
        &self,
        endpoint: &Url,
        headers: HashMap<String, String>,
    ) -> GatewayResult<Arc<dyn McpTransport>>;
}

/// Header map carrying a bearer credential
pub fn bearer_headers(token: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_headers() {
        let headers = bearer_headers("abc");
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
        assert_eq!(headers.len(), 1);
    }
}
