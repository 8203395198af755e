//! # Generic OpenAI-Compatible Provider
//!
//! Speaks the OpenAI wire shape directly: `ChatRequest`/`ChatResponse`
//! serialize and deserialize with no translation, so this adapter is
//! reused for OpenAI itself and for any vendor (Groq, Together, an
//! in-house gateway) that mirrors the same `/v1/chat/completions` shape.
//! `responses()`/`stream_responses()` are not overridden: this family
//! doesn't natively speak the Responses API shape, so it falls back to
//! `Provider`'s default chat-conversion bridge (§4.E).

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::http_client::{HeaderInjector, ResilientClient, ResilientClientConfig};
use crate::models::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, Model, ModelsResponse, StreamChunk};
use crate::provider::{ChatStream, Provider};

pub struct OpenAiCompatibleConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub circuit_breaker: Option<crate::circuit_breaker::CircuitBreakerConfig>,
    pub request_timeout: Duration,
    /// Models this provider claims, used by `supports()` when the registry
    /// falls back to scanning (no explicit provider prefix in the
    /// selector). An empty list means "claim nothing by default" — the
    /// caller must route to this provider explicitly.
    pub known_models: Vec<String>,
}

impl OpenAiCompatibleConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            max_retries: 3,
            circuit_breaker: Some(crate::circuit_breaker::CircuitBreakerConfig::default()),
            request_timeout: Duration::from_secs(60),
            known_models: Vec::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_known_models(mut self, models: Vec<String>) -> Self {
        self.known_models = models;
        self
    }
}

pub struct OpenAiCompatibleProvider {
    name: String,
    known_models: Vec<String>,
    client: ResilientClient,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, GatewayError> {
        let api_key = config.api_key.clone();
        let header_injector: HeaderInjector = Arc::new(move |req| match &api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        });

        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: config.name.clone(),
                base_url: config.base_url,
                max_retries: config.max_retries,
                circuit_breaker: config.circuit_breaker,
                request_timeout: config.request_timeout,
                ..Default::default()
            },
            header_injector,
        )?;

        Ok(Self {
            name: config.name,
            known_models: config.known_models,
            client,
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, model: &str) -> bool {
        self.known_models.iter().any(|m| m == model)
    }

    async fn chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let mut response: ChatResponse = self
            .client
            .do_json(ctx, Method::POST, "/chat/completions", Some(&request))
            .await?;
        response.provider = self.name.clone();
        Ok(response)
    }

    async fn stream_chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let mut streaming_request = request;
        streaming_request.stream = Some(true);
        let body = serde_json::to_vec(&streaming_request)?;
        let byte_stream = self
            .client
            .do_stream(ctx, Method::POST, "/chat/completions", Some(body.into()))
            .await?;

        let stream = stream! {
            let mut byte_stream = byte_stream;
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();
                    let Some(data) = line.strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => yield Ok(parsed),
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embeddings(
        &self,
        ctx: &RequestContext,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, GatewayError> {
        let mut response: EmbeddingResponse = self
            .client
            .do_json(ctx, Method::POST, "/embeddings", Some(&request))
            .await?;
        response.provider = self.name.clone();
        Ok(response)
    }

    async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
        let response: ModelsResponse = self.client.do_json(ctx, Method::GET, "/models", None::<&()>).await?;
        Ok(response
            .data
            .into_iter()
            .map(|mut m| {
                m.owned_by = self.name.clone();
                m
            })
            .collect())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_availability_capable(&self) -> Option<&dyn crate::provider::AvailabilityCapable> {
        Some(self)
    }
}

#[async_trait]
impl crate::provider::AvailabilityCapable for OpenAiCompatibleProvider {
    async fn is_available(&self, ctx: &RequestContext) -> bool {
        self.list_models(ctx).await.is_ok()
    }
}
