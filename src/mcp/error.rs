//! Gateway Error Types
//!
//! One taxonomy for every failure the gateway can surface. `kind()` gives a
//! stable machine-readable label that the auth classifier also inspects.

use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Required configuration (endpoint URL, identity, secret) is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Login exchange failed, or the remote rejected the presented credential
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Transport handshake failed, endpoint unreachable, or a deadline expired
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote accepted the session but the operation itself failed
    #[error("Remote invocation error: {message}")]
    RemoteInvocation { code: Option<i32>, message: String },

    /// Malformed remote schema; recovered locally, never surfaced to callers
    #[error("Schema inference error: {0}")]
    SchemaInference(String),

    /// The capability-registration collaborator refused a binding
    #[error("Registration error: {0}")]
    Registration(String),
}

impl GatewayError {
    /// Remote operation failure without a JSON-RPC error code
    pub fn remote(message: impl Into<String>) -> Self {
        GatewayError::RemoteInvocation {
            code: None,
            message: message.into(),
        }
    }

    /// Remote operation failure reported as a JSON-RPC error object
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        GatewayError::RemoteInvocation {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn timeout(step: &str, timeout_ms: u64) -> Self {
        GatewayError::Connection(format!("{} timed out after {}ms", step, timeout_ms))
    }

    /// Stable error-kind label
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration_error",
            GatewayError::Authentication(_) => "authentication_error",
            GatewayError::Connection(_) => "connection_error",
            GatewayError::RemoteInvocation { .. } => "remote_invocation_error",
            GatewayError::SchemaInference(_) => "schema_inference_error",
            GatewayError::Registration(_) => "registration_error",
        }
    }

    /// JSON-RPC error code, when the remote supplied one
    pub fn code(&self) -> Option<i32> {
        match self {
            GatewayError::RemoteInvocation { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Connection(format!("request timed out: {}", err))
        } else {
            GatewayError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::remote(format!("invalid response: {}", err))
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::Configuration(format!("Invalid URL: {}", err))
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
