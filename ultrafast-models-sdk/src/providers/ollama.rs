//! # Ollama Provider
//!
//! Talks to a local (or self-hosted) Ollama server's native `/api/chat` and
//! `/api/embeddings` endpoints rather than its OpenAI-compatible shim, so it
//! can translate Ollama's newline-delimited streaming JSON directly instead
//! of going through SSE.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use serde_json::json;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::http_client::{HeaderInjector, ResilientClient, ResilientClientConfig};
use crate::models::{
    ChatRequest, ChatResponse, Choice, Delta, Embedding, EmbeddingInput, EmbeddingRequest,
    EmbeddingResponse, Message, Model, Role, StreamChoice, StreamChunk, Usage,
};
use crate::provider::{AvailabilityCapable, ChatStream, Provider};

pub struct OllamaConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub known_models: Vec<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            request_timeout: Duration::from_secs(120),
            known_models: vec![
                "llama2".to_string(),
                "llama2:13b".to_string(),
                "llama2:70b".to_string(),
                "codellama".to_string(),
                "mistral".to_string(),
                "mistral:7b".to_string(),
                "neural-chat".to_string(),
                "vicuna".to_string(),
                "orca-mini".to_string(),
            ],
        }
    }
}

pub struct OllamaProvider {
    client: ResilientClient,
    known_models: Vec<String>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self, GatewayError> {
        let no_auth: HeaderInjector = Arc::new(|req| req);
        let client = ResilientClient::new(
            ResilientClientConfig {
                provider: "ollama".to_string(),
                base_url: config.base_url,
                request_timeout: config.request_timeout,
                // A local Ollama instance has no upstream rate limits to
                // protect; retries still help with the server warming up a
                // model into memory on first request.
                circuit_breaker: None,
                ..Default::default()
            },
            no_auth,
        )?;

        Ok(Self {
            client,
            known_models: config.known_models,
        })
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "user",
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn supports(&self, model: &str) -> bool {
        self.known_models.iter().any(|m| m == model)
    }

    async fn chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| json!({
                "role": role_str(m.role),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "stream": false,
            "options": {
                "temperature": request.temperature.unwrap_or(0.7),
                "num_predict": request.max_tokens,
            }
        });

        let response: serde_json::Value = self.client.do_json(ctx, Method::POST, "/api/chat", Some(&body)).await?;

        let prompt_tokens = response["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = response["eval_count"].as_u64().unwrap_or(0) as u32;

        Ok(ChatResponse {
            id: format!("ollama-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: request.model,
            provider: self.name().to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(response["message"]["content"].as_str().unwrap_or("")),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                prompt_tokens_details: None,
                completion_tokens_details: None,
                raw_usage: Some(response),
            }),
        })
    }

    async fn stream_chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let model = request.model.clone();
        let body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| json!({
                "role": role_str(m.role),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "stream": true,
            "options": {
                "temperature": request.temperature.unwrap_or(0.7),
                "num_predict": request.max_tokens,
            }
        });
        let bytes = serde_json::to_vec(&body)?;

        let byte_stream = self
            .client
            .do_stream(ctx, Method::POST, "/api/chat", Some(bytes.into()))
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
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: serde_json::Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    };

                    let Some(content) = parsed["message"]["content"].as_str() else { continue };
                    let done = parsed["done"].as_bool().unwrap_or(false);

                    yield Ok(StreamChunk {
                        id: format!("ollama-{}", uuid::Uuid::new_v4()),
                        object: "chat.completion.chunk".to_string(),
                        created: chrono::Utc::now().timestamp() as u64,
                        model: model.clone(),
                        choices: vec![StreamChoice {
                            index: 0,
                            delta: Delta {
                                role: None,
                                content: Some(content.to_string()),
                            },
                            finish_reason: if done { Some("stop".to_string()) } else { None },
                        }],
                    });

                    if done {
                        return;
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
        let prompt = match &request.input {
            EmbeddingInput::String(s) => s.clone(),
            EmbeddingInput::StringArray(_) => {
                return Err(GatewayError::invalid_request(
                    "ollama embeddings only support a single string input",
                ))
            }
        };

        let body = json!({ "model": request.model, "prompt": prompt });
        let response: serde_json::Value = self
            .client
            .do_json(ctx, Method::POST, "/api/embeddings", Some(&body))
            .await?;

        let embedding: Vec<f32> = response["embedding"]
            .as_array()
            .map(|values| values.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
            .unwrap_or_default();

        Ok(EmbeddingResponse {
            object: "list".to_string(),
            data: vec![Embedding {
                object: "embedding".to_string(),
                embedding,
                index: 0,
            }],
            model: request.model,
            provider: self.name().to_string(),
            usage: Usage::default(),
        })
    }

    async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
        let response: serde_json::Value = self.client.do_json(ctx, Method::GET, "/api/tags", None::<&()>).await?;
        let models = response["models"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                let id = entry["name"].as_str()?.to_string();
                Some(Model {
                    id,
                    object: "model".to_string(),
                    owned_by: self.name().to_string(),
                    created: chrono::Utc::now().timestamp() as u64,
                    metadata: None,
                })
            })
            .collect();
        Ok(models)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_availability_capable(&self) -> Option<&dyn AvailabilityCapable> {
        Some(self)
    }
}

#[async_trait]
impl AvailabilityCapable for OllamaProvider {
    async fn is_available(&self, ctx: &RequestContext) -> bool {
        self.client
            .do_json::<(), serde_json::Value>(ctx, Method::GET, "/api/tags", None)
            .await
            .is_ok()
    }
}
