//! Authentication-failure classification
//!
//! The remote transport has no structured error-code channel, so this is a
//! case-insensitive substring match over the error kind and message. A false
//! positive costs one extra reconnect. Retry logic only calls
//! `is_auth_failure`; swap the body when a structured channel exists.

use super::error::GatewayError;

const AUTH_MARKERS: &[&str] = &["unauthorized", "401", "forbidden", "403", "token", "auth"];

/// Whether `text` looks like an authentication failure
pub fn looks_like_auth_failure(text: &str) -> bool {
    let text = text.to_lowercase();
    AUTH_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Whether a failed remote call should trigger credential recovery
pub fn is_auth_failure(err: &GatewayError) -> bool {
    looks_like_auth_failure(err.kind()) || looks_like_auth_failure(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_is_auth() {
        assert!(looks_like_auth_failure("403 Forbidden"));
        assert!(is_auth_failure(&GatewayError::remote("403 Forbidden")));
    }

    #[test]
    fn test_unknown_tool_is_not_auth() {
        assert!(!looks_like_auth_failure("remote tool not found"));
        assert!(!is_auth_failure(&GatewayError::remote("remote tool not found")));
        assert!(!is_auth_failure(&GatewayError::Connection("connection refused".into())));
    }

    #[test]
    fn test_markers_are_case_insensitive() {
        assert!(looks_like_auth_failure("UNAUTHORIZED"));
        assert!(looks_like_auth_failure("Invalid Token"));
        assert!(looks_like_auth_failure("HTTP 401"));
        assert!(is_auth_failure(&GatewayError::Authentication("rejected".into())));
    }
}
