//! # Ultrafast Models SDK
//!
//! Core library behind the gateway: a provider abstraction, a resilient
//! HTTP client, a model registry, an external metadata registry, and a
//! guardrails pipeline (system-prompt injection and PII anonymization).
//! The gateway crate is a thin axum shell over this library; everything
//! that can be unit-tested without an HTTP server lives here.
//!
//! ## Overview
//!
//! - [`error`] — the closed `GatewayError` taxonomy every fallible
//!   operation in this crate returns.
//! - [`models`] — wire types: chat, responses, embeddings, batches, files,
//!   and model/metadata/pricing shapes.
//! - [`selector`] — parses a model selector (`"model"` or
//!   `"provider/model"`) into a `ModelSelector`.
//! - [`circuit_breaker`] — the three-state breaker the resilient client
//!   consults before every call.
//! - [`http_client`] — `ResilientClient`: retries, backoff, and
//!   circuit-breaker protection for every outbound provider call.
//! - [`context`] — `RequestContext`, the ambient request id and
//!   cancellation token threaded through a single gateway request.
//! - [`provider`] — the `Provider` trait and optional capability traits
//!   (`BatchCapable`, `FileCapable`, `AvailabilityCapable`).
//! - [`registry`] — `ModelRegistry`, the model-to-owning-provider map.
//! - [`metadata`] — `MetadataRegistry`, the external model-metadata source.
//! - [`guardrails`] — the guardrail pipeline, system-prompt guardrail, and
//!   PII anonymizer.
//! - [`guarded`] — `GuardedProvider`, the pipeline-mediated provider
//!   wrapper the gateway dispatches every request through.
//! - [`providers`] — concrete provider adapters (OpenAI-compatible,
//!   Ollama, Anthropic-style).
//! - [`responses_bridge`] — the default chat→Responses conversion used by
//!   any provider that doesn't override `responses`/`stream_responses`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ultrafast_models_sdk::context::RequestContext;
//! use ultrafast_models_sdk::models::{ChatRequest, Message};
//! use ultrafast_models_sdk::provider::Provider;
//!
//! async fn example(provider: &dyn Provider) -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = RequestContext::new();
//!     let request = ChatRequest {
//!         model: "gpt-4o".to_string(),
//!         messages: vec![Message::user("Hello, world!")],
//!         ..Default::default()
//!     };
//!     let response = provider.chat(&ctx, request).await?;
//!     println!("{}", response.choices[0].message.content);
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod common;
pub mod context;
pub mod error;
pub mod guarded;
pub mod guardrails;
pub mod http_client;
pub mod metadata;
pub mod models;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod responses_bridge;
pub mod selector;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use context::RequestContext;
pub use error::{ErrorKind, GatewayError};
pub use http_client::{ResilientClient, ResilientClientConfig};
pub use provider::Provider;
pub use registry::ModelRegistry;
pub use selector::ModelSelector;

/// Result type for SDK operations, using [`GatewayError`] as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatRequest, Message, Role};

    #[test]
    fn message_constructors_set_role_and_content() {
        let user_msg = Message::user("Hello, world!");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.content, "Hello, world!");

        let assistant_msg = Message::assistant("Hi there!");
        assert_eq!(assistant_msg.role, Role::Assistant);

        let system_msg = Message::system("You are a helpful assistant.");
        assert_eq!(system_msg.role, Role::System);
    }

    #[test]
    fn chat_request_default_is_empty() {
        let request = ChatRequest::default();
        assert_eq!(request.model, "");
        assert_eq!(request.messages.len(), 0);
        assert_eq!(request.temperature, None);
        assert_eq!(request.stream, None);
    }

    #[test]
    fn model_selector_round_trips_through_result_alias() {
        let selector = ModelSelector::parse("openai/gpt-4o", "").unwrap();
        assert_eq!(selector.provider.as_deref(), Some("openai"));
        assert_eq!(selector.model, "gpt-4o");
    }
}
