//! MCP (Model Context Protocol) Gateway
//!
//! Client-side gateway in front of one remote MCP server:
//! - Credential acquisition and caching with an expiry safety margin
//! - A single streamable HTTP session, renewed transparently on auth failure
//! - Mirroring of remote tools, resources and prompts as local bindings
//! - On-demand health probing

pub mod auth;
pub mod classify;
pub mod error;
pub mod gateway;
pub mod health;
pub mod meta_tools;
pub mod mirror;
pub mod registry;
pub mod schema;
pub mod streamable_http;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{
    Credential, CredentialBroker, CredentialEvent, CredentialSource, LoginSource, StaticTokenSource,
};
pub use classify::is_auth_failure;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{ProxyGateway, SessionInfo};
pub use health::{HealthStatus, ServerHealth};
pub use mirror::{CapabilityMirror, LocalCapabilityBinding, MirrorReport};
pub use registry::{CapabilityRegistrar, InMemoryRegistry};
pub use schema::{ParameterSchema, ParameterSpec, ParameterType};
pub use streamable_http::{StreamableHttpConnector, StreamableHttpTransport};
pub use transport::{McpTransport, TransportConnector};
pub use types::*;
