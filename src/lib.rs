//! mcp-relay: a client-side MCP gateway
//!
//! Authenticates to a remote MCP server, keeps one session alive across
//! credential and network churn, and republishes the server's capabilities
//! as local bindings.

pub mod config;
pub mod mcp;
