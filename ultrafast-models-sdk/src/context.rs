//! Ambient per-request context.
//!
//! Carries the request id that every outbound HTTP call propagates as
//! `X-Request-ID` and that the PII anonymizer uses as a correlation key for
//! its token map, plus a cancellation token that the resilient client's
//! retries, backoff sleeps, and the guardrails pipeline all observe.

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    start_time: Instant,
    metadata: HashMap<String, String>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            metadata: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::new()
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Token observed by every suspend point in the resilient client
    /// (backoff sleeps, streaming reads) and by intra-group guardrail
    /// execution.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A child context sharing this context's cancellation but able to be
    /// cancelled independently without affecting the parent (used for
    /// per-guardrail scoping within a group).
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            start_time: self.start_time,
            metadata: self.metadata.clone(),
            cancellation: self.cancellation.child_token(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
