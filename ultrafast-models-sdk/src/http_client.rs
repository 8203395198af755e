//! # Resilient HTTP Client
//!
//! The single abstraction every provider adapter uses to talk to its
//! upstream: `do_json` for request/response JSON calls, `do_raw` for calls
//! where the caller wants to inspect the status itself (the metadata
//! registry's fetch, for instance), and `do_stream` for SSE/streaming
//! bodies. Retries, exponential backoff, and the per-provider circuit
//! breaker are all applied uniformly here so individual provider adapters
//! never reimplement them.
//!
//! ```rust,no_run
//! use ultrafast_models_sdk::http_client::{ResilientClient, ResilientClientConfig};
//!
//! let client = ResilientClient::new(
//!     ResilientClientConfig {
//!         provider: "openai".to_string(),
//!         base_url: "https://api.openai.com/v1".to_string(),
//!         ..Default::default()
//!     },
//!     std::sync::Arc::new(|req: reqwest::RequestBuilder| req),
//! ).unwrap();
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::context::RequestContext;
use crate::error::GatewayError;

/// Closure that injects provider-specific headers (bearer auth, custom
/// headers) into an outgoing request. `X-Request-ID` propagation from the
/// ambient context is handled by the client itself, not by this closure.
pub type HeaderInjector = Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

#[derive(Clone)]
pub struct ResilientClientConfig {
    pub provider: String,
    pub base_url: String,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub request_timeout: Duration,
}

impl Default for ResilientClientConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            base_url: String::new(),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            request_timeout: Duration::from_secs(60),
        }
    }
}

const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

fn counts_as_breaker_failure(status: u16) -> bool {
    status >= 500 || status == 429
}

/// An upstream can return HTTP 200 with a JSON body shaped like
/// `{"error": {...}}` instead of a proper non-2xx status. Treated as a
/// terminal provider error rather than a successful decode.
fn has_error_field(bytes: &Bytes) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.as_object().map(|o| o.contains_key("error")))
        .unwrap_or(false)
}

pub struct ResilientClient {
    http: reqwest::Client,
    config: ResilientClientConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    header_injector: HeaderInjector,
}

impl ResilientClient {
    pub fn new(config: ResilientClientConfig, header_injector: HeaderInjector) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::provider_error(format!("failed to build HTTP client: {e}")))?;

        let breaker = config
            .circuit_breaker
            .clone()
            .map(|cb_config| Arc::new(CircuitBreaker::new(config.provider.clone(), cb_config)));

        Ok(Self {
            http,
            config,
            breaker,
            header_injector,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
        }
    }

    fn build_request(&self, method: Method, path: &str, ctx: &RequestContext) -> reqwest::RequestBuilder {
        let url = self.build_url(path);
        let mut builder = self.http.request(method, url);
        builder = (self.header_injector)(builder);
        builder = builder.header("Content-Type", "application/json");
        builder = builder.header("X-Request-ID", ctx.request_id.clone());
        builder
    }

    fn backoff_for_retry(&self, retry_index: u32) -> Duration {
        let scaled = self.config.initial_backoff.as_secs_f64()
            * self.config.backoff_factor.powi(retry_index as i32);
        Duration::from_secs_f64(scaled.min(self.config.max_backoff.as_secs_f64()))
    }

    /// Sleeps for `duration`, returning early with an error if the context
    /// is cancelled during the sleep.
    async fn sleep_cancellable(token: &CancellationToken, duration: Duration) -> Result<(), GatewayError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = token.cancelled() => Err(GatewayError::provider_error("request cancelled during backoff")),
        }
    }

    async fn breaker_allow(&self) -> Result<(), GatewayError> {
        if let Some(breaker) = &self.breaker {
            if !breaker.allow().await {
                return Err(GatewayError::circuit_open().with_provider(self.config.provider.clone()));
            }
        }
        Ok(())
    }

    async fn record_outcome(&self, status: Option<u16>, network_error: bool) {
        let Some(breaker) = &self.breaker else { return };
        if network_error {
            breaker.record_failure().await;
        } else if let Some(status) = status {
            if counts_as_breaker_failure(status) {
                breaker.record_failure().await;
            } else if status < 400 {
                breaker.record_success().await;
            }
        }
    }

    /// Performs a JSON request/response call with retries, backoff, and
    /// circuit-breaker protection.
    pub async fn do_json<Req: Serialize + ?Sized, Resp: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&Req>,
    ) -> Result<Resp, GatewayError> {
        let body_bytes = body
            .map(|b| serde_json::to_vec(b).map(Bytes::from))
            .transpose()?;
        let (status, bytes) = self.do_raw(ctx, method, path, body_bytes).await?;
        if (200..300).contains(&status) {
            if has_error_field(&bytes) {
                let text = String::from_utf8_lossy(&bytes).to_string();
                return Err(GatewayError::from_upstream(500, &text, Some(&self.config.provider)));
            }
            serde_json::from_slice(&bytes).map_err(GatewayError::from)
        } else {
            let text = String::from_utf8_lossy(&bytes).to_string();
            Err(GatewayError::from_upstream(status, &text, Some(&self.config.provider)))
        }
    }

    /// Performs a call and returns the raw status/body, applying retries and
    /// the circuit breaker but leaving status interpretation to the caller.
    pub async fn do_raw(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<(u16, Bytes), GatewayError> {
        let token = ctx.cancellation_token();
        let total_attempts = self.config.max_retries + 1;

        let mut last_err: Option<GatewayError> = None;

        for attempt in 0..total_attempts {
            if token.is_cancelled() {
                return Err(GatewayError::provider_error("request cancelled"));
            }

            if attempt > 0 {
                let backoff = self.backoff_for_retry(attempt - 1);
                Self::sleep_cancellable(&token, backoff).await?;
            }

            self.breaker_allow().await?;

            let mut req = self.build_request(method.clone(), path, ctx);
            if let Some(b) = &body {
                req = req.body(b.clone());
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let bytes = resp.bytes().await.unwrap_or_default();
                    self.record_outcome(Some(status), false).await;

                    if (200..300).contains(&status) || !is_retryable_status(status) {
                        return Ok((status, bytes));
                    }

                    last_err = Some(GatewayError::from_upstream(
                        status,
                        &String::from_utf8_lossy(&bytes),
                        Some(&self.config.provider),
                    ));
                }
                Err(e) => {
                    self.record_outcome(None, true).await;
                    last_err = Some(GatewayError::from(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::provider_error("exhausted retries")))
    }

    /// Performs a streaming call. Streaming calls are never retried: once a
    /// 2xx response begins, partial bytes may already be on the wire. A
    /// non-success status is read to completion and mapped to an error.
    pub async fn do_stream(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>, GatewayError> {
        self.breaker_allow().await?;

        let mut req = self.build_request(method, path, ctx);
        if let Some(b) = body {
            req = req.body(b);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.record_outcome(None, true).await;
                return Err(GatewayError::from(e));
            }
        };

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let bytes = resp.bytes().await.unwrap_or_default();
            self.record_outcome(Some(status), false).await;
            return Err(GatewayError::from_upstream(
                status,
                &String::from_utf8_lossy(&bytes),
                Some(&self.config.provider),
            ));
        }
        self.record_outcome(Some(status), false).await;

        let provider = self.config.provider.clone();
        let stream = resp.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| GatewayError::provider_error(e.to_string()).with_provider(provider.clone()))
        });
        Ok(Box::pin(stream))
    }

    pub async fn circuit_state(&self) -> Option<crate::circuit_breaker::CircuitState> {
        match &self.breaker {
            Some(b) => Some(b.state().await),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        ok: bool,
    }

    fn no_headers() -> HeaderInjector {
        Arc::new(|req| req)
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: "test".into(),
                base_url: server.uri(),
                max_retries: 3,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(50),
                backoff_factor: 2.0,
                circuit_breaker: None,
                request_timeout: Duration::from_secs(5),
            },
            no_headers(),
        )
        .unwrap();

        let ctx = RequestContext::new();
        let resp: Echo = client
            .do_json(&ctx, Method::POST, "/v1/chat", Some(&serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp, Echo { ok: true });
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "bad request"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: "test".into(),
                base_url: server.uri(),
                circuit_breaker: None,
                ..Default::default()
            },
            no_headers(),
        )
        .unwrap();

        let ctx = RequestContext::new();
        let result: Result<Echo, _> = client
            .do_json(&ctx, Method::POST, "/v1/chat", Some(&serde_json::json!({})))
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().message, "bad request");
    }

    #[tokio::test]
    async fn status_200_with_error_body_is_a_terminal_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"message": "upstream rejected the request"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: "test".into(),
                base_url: server.uri(),
                circuit_breaker: None,
                ..Default::default()
            },
            no_headers(),
        )
        .unwrap();

        let ctx = RequestContext::new();
        let result: Result<Echo, _> = client
            .do_json(&ctx, Method::POST, "/v1/chat", Some(&serde_json::json!({})))
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.message, "upstream rejected the request");
        assert_eq!(err.kind, ErrorKind::ProviderError);
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_blocks_further_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: "test".into(),
                base_url: server.uri(),
                max_retries: 0,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                backoff_factor: 2.0,
                circuit_breaker: Some(CircuitBreakerConfig {
                    failure_threshold: 3,
                    success_threshold: 2,
                    timeout: Duration::from_secs(30),
                }),
                request_timeout: Duration::from_secs(5),
            },
            no_headers(),
        )
        .unwrap();

        let ctx = RequestContext::new();
        for _ in 0..3 {
            let _: Result<Echo, _> = client
                .do_json(&ctx, Method::POST, "/v1/chat", Some(&serde_json::json!({})))
                .await;
        }

        let result: Result<Echo, _> = client
            .do_json(&ctx, Method::POST, "/v1/chat", Some(&serde_json::json!({})))
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert!(err.message.contains("circuit breaker open"));
    }

    #[tokio::test]
    async fn backoff_is_min_of_exponential_and_max() {
        let config = ResilientClientConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
            ..Default::default()
        };
        let client = ResilientClient::new(config, no_headers()).unwrap();
        assert_eq!(client.backoff_for_retry(0), Duration::from_secs(1));
        assert_eq!(client.backoff_for_retry(1), Duration::from_secs(2));
        assert_eq!(client.backoff_for_retry(2), Duration::from_secs(4));
        // factor^5 = 32 > max(30), clamps
        assert_eq!(client.backoff_for_retry(5), Duration::from_secs(30));
    }
}
