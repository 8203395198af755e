//! # Provider Contract
//!
//! The trait every upstream adapter implements. A `Provider` handles the
//! model-bearing operations (chat, responses, embeddings, listing models)
//! directly; batch, file, and availability support are modeled as separate
//! capability traits so that a provider which doesn't support batching
//! doesn't have to carry dead methods, and callers can query support with a
//! downcast instead of a runtime "not supported" error on every call.
//!
//! ```rust,no_run
//! use ultrafast_models_sdk::provider::{batch_capable, Provider};
//!
//! fn try_batch(provider: &dyn Provider) {
//!     if let Some(batcher) = batch_capable(provider) {
//!         // provider supports the batch API
//!         let _ = batcher;
//!     }
//! }
//! ```

use std::any::Any;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::models::{
    BatchRequest, BatchResponse, BatchResultItem, ChatRequest, ChatResponse, EmbeddingRequest,
    EmbeddingResponse, FileObject, Model, ResponsesRequest, ResponsesResponse, StreamChunk,
};

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>;
pub type ResponsesStream = Pin<Box<dyn Stream<Item = Result<ResponsesResponse, GatewayError>> + Send>>;

/// The model-bearing operations every provider adapter implements.
///
/// `responses` and `stream_responses` default to
/// [`crate::responses_bridge`]'s chat-conversion: `instructions`/`input`
/// become a leading system message plus role-tagged messages, the
/// provider's own `chat`/`stream_chat` does the call, and the result is
/// wrapped back into a `ResponsesResponse`. A provider that speaks the
/// Responses shape natively overrides them instead.
#[async_trait]
pub trait Provider: Send + Sync + Any {
    /// Unique identifier used in routing and in `ChatResponse::provider`.
    fn name(&self) -> &str;

    /// Whether this provider claims to serve `model`. The model registry
    /// (§4.F) consults this when a request doesn't carry an explicit
    /// provider prefix.
    fn supports(&self, model: &str) -> bool;

    async fn chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError>;

    async fn stream_chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatStream, GatewayError>;

    async fn responses(
        &self,
        ctx: &RequestContext,
        request: ResponsesRequest,
    ) -> Result<ResponsesResponse, GatewayError> {
        crate::responses_bridge::bridge_responses(self, ctx, request).await
    }

    async fn stream_responses(
        &self,
        ctx: &RequestContext,
        request: ResponsesRequest,
    ) -> Result<ResponsesStream, GatewayError> {
        crate::responses_bridge::bridge_stream_responses(self, ctx, request).await
    }

    async fn embeddings(
        &self,
        _ctx: &RequestContext,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, GatewayError> {
        Err(GatewayError::invalid_request(format!(
            "provider '{}' does not support embeddings",
            self.name()
        )))
    }

    async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<Model>, GatewayError>;

    /// For `Any`-based downcasting to a concrete provider type, used by
    /// adapters that need to recover provider-specific state.
    fn as_any(&self) -> &dyn Any;

    /// Returns `Some(self)` if this provider implements [`BatchCapable`].
    /// Overridden by providers that support the batch API; capability
    /// traits can't be queried by downcasting a `dyn Provider` directly,
    /// since they aren't supertraits of it, so each capable provider opts
    /// in explicitly.
    fn as_batch_capable(&self) -> Option<&dyn BatchCapable> {
        None
    }

    /// Returns `Some(self)` if this provider implements [`FileCapable`].
    fn as_file_capable(&self) -> Option<&dyn FileCapable> {
        None
    }

    /// Returns `Some(self)` if this provider implements [`AvailabilityCapable`].
    fn as_availability_capable(&self) -> Option<&dyn AvailabilityCapable> {
        None
    }
}

/// Optional batch-API support (create/poll/fetch results). `list_batches`
/// and `cancel_batch` default to `invalid_request` for providers that only
/// implement the core create/get/results trio.
#[async_trait]
pub trait BatchCapable: Provider {
    async fn create_batch(&self, ctx: &RequestContext, request: BatchRequest) -> Result<BatchResponse, GatewayError>;

    async fn get_batch(&self, ctx: &RequestContext, batch_id: &str) -> Result<BatchResponse, GatewayError>;

    async fn batch_results(
        &self,
        ctx: &RequestContext,
        batch_id: &str,
    ) -> Result<Vec<BatchResultItem>, GatewayError>;

    async fn list_batches(&self, _ctx: &RequestContext) -> Result<Vec<BatchResponse>, GatewayError> {
        Err(GatewayError::invalid_request(format!(
            "provider '{}' does not support listing batches",
            self.name()
        )))
    }

    async fn cancel_batch(&self, _ctx: &RequestContext, _batch_id: &str) -> Result<(), GatewayError> {
        Err(GatewayError::invalid_request(format!(
            "provider '{}' does not support cancelling batches",
            self.name()
        )))
    }
}

/// Optional file-upload support backing the batch API's `input_file_id`.
/// `list_files` and `get_file_content` default to `invalid_request` for
/// providers that only implement upload/get/delete.
#[async_trait]
pub trait FileCapable: Provider {
    async fn upload_file(
        &self,
        ctx: &RequestContext,
        filename: &str,
        purpose: &str,
        content: Bytes,
    ) -> Result<FileObject, GatewayError>;

    async fn get_file(&self, ctx: &RequestContext, file_id: &str) -> Result<FileObject, GatewayError>;

    async fn delete_file(&self, ctx: &RequestContext, file_id: &str) -> Result<(), GatewayError>;

    async fn list_files(&self, _ctx: &RequestContext) -> Result<Vec<FileObject>, GatewayError> {
        Err(GatewayError::invalid_request(format!(
            "provider '{}' does not support listing files",
            self.name()
        )))
    }

    async fn get_file_content(&self, _ctx: &RequestContext, _file_id: &str) -> Result<Bytes, GatewayError> {
        Err(GatewayError::invalid_request(format!(
            "provider '{}' does not support file content retrieval",
            self.name()
        )))
    }
}

/// Optional liveness probe distinct from the circuit breaker's failure
/// tracking — a provider may implement this with a cheap upstream ping.
#[async_trait]
pub trait AvailabilityCapable: Provider {
    async fn is_available(&self, ctx: &RequestContext) -> bool;
}

/// Downcasts a provider to its batch capability, if it has one.
pub fn batch_capable(provider: &dyn Provider) -> Option<&dyn BatchCapable> {
    provider.as_batch_capable()
}

/// Downcasts a provider to its file capability, if it has one.
pub fn file_capable(provider: &dyn Provider) -> Option<&dyn FileCapable> {
    provider.as_file_capable()
}

/// Downcasts a provider to its availability capability, if it has one.
pub fn availability_capable(provider: &dyn Provider) -> Option<&dyn AvailabilityCapable> {
    provider.as_availability_capable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Choice, Message, Usage};

    struct StubProvider {
        models: Vec<String>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn supports(&self, model: &str) -> bool {
            self.models.iter().any(|m| m == model)
        }

        async fn chat(&self, _ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
            Ok(ChatResponse {
                id: "stub-1".into(),
                object: "chat.completion".into(),
                created: 0,
                model: request.model,
                provider: self.name().to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant("hi"),
                    finish_reason: Some("stop".into()),
                }],
                usage: Some(Usage::default()),
            })
        }

        async fn stream_chat(&self, _ctx: &RequestContext, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            Err(GatewayError::invalid_request("streaming not implemented in stub"))
        }

        async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
            Ok(vec![])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn default_responses_impl_bridges_through_chat() {
        let provider = StubProvider { models: vec!["m".into()] };
        let ctx = RequestContext::new();
        let response = provider
            .responses(&ctx, ResponsesRequest::default())
            .await
            .unwrap();
        assert_eq!(response.output.len(), 1);
        assert_eq!(response.output[0].content[0].text, "hi");
    }

    #[tokio::test]
    async fn default_stream_responses_impl_errors_when_stream_chat_does() {
        let provider = StubProvider { models: vec!["m".into()] };
        let ctx = RequestContext::new();
        let err = provider
            .stream_responses(&ctx, ResponsesRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn uncapable_provider_has_no_batch_capability() {
        let provider = StubProvider { models: vec![] };
        assert!(batch_capable(&provider).is_none());
        assert!(file_capable(&provider).is_none());
        assert!(availability_capable(&provider).is_none());
    }

    #[tokio::test]
    async fn supports_checks_the_model_list() {
        let provider = StubProvider { models: vec!["gpt-4o".into()] };
        assert!(provider.supports("gpt-4o"));
        assert!(!provider.supports("claude-3"));
    }
}
