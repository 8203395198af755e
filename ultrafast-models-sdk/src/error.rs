//! # Error Taxonomy
//!
//! A closed set of error kinds shared by every component in this crate:
//! the resilient HTTP client, the circuit breaker, the model registry, the
//! metadata registry, and the guardrails pipeline all return `GatewayError`.
//!
//! ## Kinds
//!
//! - `provider_error` — the upstream returned a 5xx, a network error
//!   occurred, or the circuit breaker rejected the call.
//! - `rate_limit_error` — the upstream returned 429.
//! - `invalid_request_error` — malformed input, an unsupported operation, or
//!   an upstream 4xx other than 401/403/429.
//! - `authentication_error` — the upstream returned 401 or 403.
//! - `not_found_error` — no provider claims the requested model.
//!
//! ## Usage
//!
//! ```rust
//! use ultrafast_models_sdk::error::{ErrorKind, GatewayError};
//!
//! let err = GatewayError::new(ErrorKind::RateLimitError, "too many requests");
//! assert_eq!(err.http_status(), 429);
//! ```

use std::fmt;

use serde_json::{json, Value};
use thiserror::Error;

/// The closed set of error kinds this crate ever returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProviderError,
    RateLimitError,
    InvalidRequestError,
    AuthenticationError,
    NotFoundError,
}

impl ErrorKind {
    /// Machine-readable string used in the JSON error envelope and in
    /// `IntoResponse` error-type fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::InvalidRequestError => "invalid_request_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::NotFoundError => "not_found_error",
        }
    }

    /// Default HTTP status for this kind when no explicit status was set.
    fn default_status(&self) -> u16 {
        match self {
            ErrorKind::ProviderError => 502,
            ErrorKind::RateLimitError => 429,
            ErrorKind::InvalidRequestError => 400,
            ErrorKind::AuthenticationError => 401,
            ErrorKind::NotFoundError => 404,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type returned by every public operation in this crate.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    /// Explicit HTTP status; 0 means "use the kind's default".
    status_code: u16,
    pub provider: Option<String>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: 0,
            provider: None,
            cause: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimitError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequestError, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
    }

    pub fn circuit_open() -> Self {
        Self::new(ErrorKind::ProviderError, "circuit breaker open").with_status(503)
    }

    /// Resolves the HTTP status: the explicit one if set, else the kind's default.
    pub fn http_status(&self) -> u16 {
        if self.status_code != 0 {
            self.status_code
        } else {
            self.kind.default_status()
        }
    }

    /// Renders the wire envelope `{"error":{"type","message"}}`. Provider
    /// attribution is intentionally not included here (see §7), it remains
    /// available on the struct for logging.
    pub fn as_json(&self) -> Value {
        json!({
            "error": {
                "message": self.message,
                "type": self.kind.as_str(),
            }
        })
    }

    /// Builds a `GatewayError` from an upstream HTTP response: 401/403
    /// collapse to 401 `authentication_error`; 429 is `rate_limit_error`;
    /// other 4xx keep their code as `invalid_request_error`; 5xx keep their
    /// code as `provider_error`. The message is taken from a decoded
    /// `{"error":{"message"}}` body when present, else the raw body.
    pub fn from_upstream(status: u16, body: &str, provider: Option<&str>) -> Self {
        let message = extract_message(body);
        let mut err = match status {
            401 | 403 => Self::new(ErrorKind::AuthenticationError, message).with_status(401),
            429 => Self::new(ErrorKind::RateLimitError, message).with_status(429),
            400..=499 => Self::new(ErrorKind::InvalidRequestError, message).with_status(status),
            _ => Self::new(ErrorKind::ProviderError, message).with_status(status),
        };
        if let Some(p) = provider {
            err = err.with_provider(p);
        }
        err
    }

    /// Programmatic cause unwrapping.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .and_then(|e| e.get("message").cloned())
        .and_then(|m| m.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string())
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::new(ErrorKind::ProviderError, e.to_string()).with_cause(e)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::new(ErrorKind::InvalidRequestError, e.to_string()).with_cause(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_per_kind() {
        assert_eq!(GatewayError::rate_limit("x").http_status(), 429);
        assert_eq!(GatewayError::invalid_request("x").http_status(), 400);
        assert_eq!(GatewayError::authentication("x").http_status(), 401);
        assert_eq!(GatewayError::not_found("x").http_status(), 404);
        assert_eq!(GatewayError::provider_error("x").http_status(), 502);
    }

    #[test]
    fn explicit_status_overrides_default() {
        let err = GatewayError::provider_error("down").with_status(503);
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn as_json_envelope_shape() {
        let err = GatewayError::invalid_request("bad model");
        let v = err.as_json();
        assert_eq!(v["error"]["type"], "invalid_request_error");
        assert_eq!(v["error"]["message"], "bad model");
    }

    #[test]
    fn from_upstream_maps_401_and_403_to_401() {
        let e1 = GatewayError::from_upstream(401, "{}", None);
        let e3 = GatewayError::from_upstream(403, "{}", None);
        assert_eq!(e1.http_status(), 401);
        assert_eq!(e3.http_status(), 401);
        assert_eq!(e1.kind, ErrorKind::AuthenticationError);
    }

    #[test]
    fn from_upstream_preserves_other_4xx_and_5xx_codes() {
        let e422 = GatewayError::from_upstream(422, "{}", None);
        assert_eq!(e422.http_status(), 422);
        assert_eq!(e422.kind, ErrorKind::InvalidRequestError);

        let e503 = GatewayError::from_upstream(503, "{}", None);
        assert_eq!(e503.http_status(), 503);
        assert_eq!(e503.kind, ErrorKind::ProviderError);
    }

    #[test]
    fn from_upstream_extracts_message_from_json_body() {
        let body = r#"{"error":{"message":"invalid api key","type":"auth"}}"#;
        let err = GatewayError::from_upstream(401, body, None);
        assert_eq!(err.message, "invalid api key");
    }

    #[test]
    fn from_upstream_falls_back_to_raw_body() {
        let err = GatewayError::from_upstream(500, "internal error", None);
        assert_eq!(err.message, "internal error");
    }

    #[test]
    fn circuit_open_is_503_provider_error() {
        let err = GatewayError::circuit_open();
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.kind, ErrorKind::ProviderError);
        assert!(err.message.contains("circuit breaker open"));
    }
}
