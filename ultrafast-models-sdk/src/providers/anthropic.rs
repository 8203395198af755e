//! # Anthropic Provider
//!
//! Speaks Anthropic's native Messages API (`/v1/messages`), which differs
//! from the OpenAI shape in three ways this adapter bridges: system
//! messages are collected into a single top-level `system` field rather
//! than living in the message list, `max_tokens` is mandatory, and
//! streaming is server-sent `content_block_delta` events rather than
//! OpenAI-style `chat.completion.chunk` deltas.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::http_client::{HeaderInjector, ResilientClient, ResilientClientConfig};
use crate::models::{
    ChatRequest, ChatResponse, Choice, Delta, EmbeddingRequest, EmbeddingResponse, Message, Model,
    Role, StreamChoice, StreamChunk, Usage,
};
use crate::provider::{ChatStream, Provider};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub known_models: Vec<String>,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(120),
            known_models: vec![
                "claude-opus-4-20250514".to_string(),
                "claude-sonnet-4-20250514".to_string(),
                "claude-3-7-sonnet-20250219".to_string(),
                "claude-3-5-sonnet-20241022".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
                "claude-3-haiku-20240307".to_string(),
            ],
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicProvider {
    client: ResilientClient,
    known_models: Vec<String>,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, GatewayError> {
        let api_key = config.api_key;
        let header_injector: HeaderInjector = Arc::new(move |req| {
            req.header("x-api-key", api_key.as_str())
                .header("anthropic-version", ANTHROPIC_VERSION)
        });

        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: "anthropic".to_string(),
                base_url: config.base_url,
                request_timeout: config.request_timeout,
                ..Default::default()
            },
            header_injector,
        )?;

        Ok(Self {
            client,
            known_models: config.known_models,
        })
    }
}

/// Splits a chat message list into Anthropic's `(system, messages)` shape:
/// every system-role message's content is concatenated with `"\n"`; other
/// roles pass through as Anthropic user/assistant turns. Tool messages are
/// dropped — Anthropic tool use isn't modeled by this adapter.
fn split_system_and_messages(messages: Vec<Message>) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(message.content),
            Role::User => turns.push(AnthropicMessage {
                role: "user".to_string(),
                content: message.content,
            }),
            Role::Assistant => turns.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: message.content,
            }),
            Role::Tool => continue,
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, turns)
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports(&self, model: &str) -> bool {
        self.known_models.iter().any(|m| m == model)
    }

    async fn chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let model = request.model.clone();
        let (system, messages) = split_system_and_messages(request.messages);

        let anthropic_request = AnthropicRequest {
            model,
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            system,
            temperature: request.temperature,
            stream: Some(false),
        };

        let response: AnthropicResponse = self
            .client
            .do_json(ctx, Method::POST, "/v1/messages", Some(&anthropic_request))
            .await?;

        let content = response.content.into_iter().map(|c| c.text).collect::<Vec<_>>().join("");

        Ok(ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response.model,
            provider: self.name().to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: response.stop_reason,
            }],
            usage: Some(Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
                prompt_tokens_details: None,
                completion_tokens_details: None,
                raw_usage: None,
            }),
        })
    }

    async fn stream_chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let model = request.model.clone();
        let (system, messages) = split_system_and_messages(request.messages);

        let anthropic_request = AnthropicRequest {
            model: model.clone(),
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            system,
            temperature: request.temperature,
            stream: Some(true),
        };
        let body = serde_json::to_vec(&anthropic_request)?;

        let byte_stream = self
            .client
            .do_stream(ctx, Method::POST, "/v1/messages", Some(body.into()))
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

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    };

                    match event["type"].as_str() {
                        Some("content_block_delta") => {
                            if let Some(text) = event["delta"]["text"].as_str() {
                                yield Ok(StreamChunk {
                                    id: format!("anthropic-{}", uuid::Uuid::new_v4()),
                                    object: "chat.completion.chunk".to_string(),
                                    created: chrono::Utc::now().timestamp() as u64,
                                    model: model.clone(),
                                    choices: vec![StreamChoice {
                                        index: 0,
                                        delta: Delta { role: None, content: Some(text.to_string()) },
                                        finish_reason: None,
                                    }],
                                });
                            }
                        }
                        Some("message_delta") => {
                            if let Some(stop_reason) = event["delta"]["stop_reason"].as_str() {
                                yield Ok(StreamChunk {
                                    id: format!("anthropic-{}", uuid::Uuid::new_v4()),
                                    object: "chat.completion.chunk".to_string(),
                                    created: chrono::Utc::now().timestamp() as u64,
                                    model: model.clone(),
                                    choices: vec![StreamChoice {
                                        index: 0,
                                        delta: Delta::default(),
                                        finish_reason: Some(stop_reason.to_string()),
                                    }],
                                });
                            }
                        }
                        Some("message_stop") => return,
                        _ => {}
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embeddings(
        &self,
        _ctx: &RequestContext,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, GatewayError> {
        Err(GatewayError::invalid_request("anthropic does not support embeddings"))
    }

    async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
        // Anthropic has no models-listing endpoint; report the configured
        // known set instead of calling out to the API.
        Ok(self
            .known_models
            .iter()
            .map(|id| Model {
                id: id.clone(),
                object: "model".to_string(),
                owned_by: self.name().to_string(),
                created: 0,
                metadata: None,
            })
            .collect())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
