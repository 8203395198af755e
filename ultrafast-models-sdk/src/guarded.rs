//! # Guarded Provider Wrapper
//!
//! Implements the router-facing operations by delegating to an inner
//! [`ModelRegistry`], running every model-bearing request through the
//! guardrails [`Pipeline`] first. `list_models`, `embeddings`, and the
//! batch/file capability extensions delegate straight through — the batch
//! extension additionally guards inline chat/responses items when
//! configured to (§4.K).

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::guardrails::pii::DeanonymizingChatStream;
use crate::guardrails::{self, GuardrailContext, Pipeline};
use bytes::Bytes;
use futures::StreamExt;

use crate::models::{
    BatchRequest, BatchRequestItem, BatchResponse, BatchResultItem, ChatRequest, ChatResponse,
    EmbeddingRequest, EmbeddingResponse, FileObject, Model, ResponsesRequest, ResponsesResponse,
};
use crate::provider::{batch_capable, file_capable, ChatStream, ResponsesStream};
use crate::registry::ModelRegistry;
use crate::selector::ModelSelector;

pub struct GuardedProvider {
    registry: Arc<ModelRegistry>,
    pipeline: Arc<Pipeline>,
    /// Whether the batch extension should run inline chat/responses items
    /// found inside a batch body through the pipeline too. The spec leaves
    /// embeddings batch items unguarded by default (§9 Open Questions).
    guard_inline_batch: bool,
}

impl GuardedProvider {
    pub fn new(registry: Arc<ModelRegistry>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            registry,
            pipeline,
            guard_inline_batch: false,
        }
    }

    pub fn with_inline_batch_guarding(mut self, enabled: bool) -> Self {
        self.guard_inline_batch = enabled;
        self
    }

    fn resolve(&self, model: &str) -> Result<Arc<dyn crate::provider::Provider>, GatewayError> {
        let selector = ModelSelector::parse(model, "")?;
        self.registry.resolve(&selector)
    }

    pub async fn chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let provider = self.resolve(&request.model)?;
        let pctx = GuardrailContext::for_model(request.model.clone());
        let messages = self.pipeline.run_with_context(request.messages, &pctx).await?;
        let request = ChatRequest { messages, ..request };
        let mut response = provider.chat(ctx, request).await?;
        let map = pctx.token_map.lock().unwrap();
        if !map.is_empty() {
            for choice in &mut response.choices {
                choice.message.content = guardrails::pii::deanonymize_text(&choice.message.content, &map);
            }
        }
        Ok(response)
    }

    pub async fn stream_chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let provider = self.resolve(&request.model)?;
        let pctx = GuardrailContext::for_model(request.model.clone());
        let messages = self.pipeline.run_with_context(request.messages, &pctx).await?;
        let request = ChatRequest { messages, ..request };
        let stream = provider.stream_chat(ctx, request).await?;
        let map = pctx.token_map.lock().unwrap().clone();
        if map.is_empty() {
            return Ok(stream);
        }
        Ok(Box::pin(DeanonymizingChatStream::new(stream, Arc::new(map))))
    }

    pub async fn responses(
        &self,
        ctx: &RequestContext,
        request: ResponsesRequest,
    ) -> Result<ResponsesResponse, GatewayError> {
        let provider = self.resolve(&request.model)?;
        let pctx = GuardrailContext::for_model(request.model.clone());
        let request = self.run_pipeline_on_responses(request, &pctx).await?;
        let mut response = provider.responses(ctx, request).await?;
        let map = pctx.token_map.lock().unwrap();
        if !map.is_empty() {
            for output_item in &mut response.output {
                for part in &mut output_item.content {
                    part.text = guardrails::pii::deanonymize_text(&part.text, &map);
                }
            }
        }
        Ok(response)
    }

    pub async fn stream_responses(
        &self,
        ctx: &RequestContext,
        request: ResponsesRequest,
    ) -> Result<ResponsesStream, GatewayError> {
        let provider = self.resolve(&request.model)?;
        let pctx = GuardrailContext::for_model(request.model.clone());
        let request = self.run_pipeline_on_responses(request, &pctx).await?;
        let stream = provider.stream_responses(ctx, request).await?;
        let map = pctx.token_map.lock().unwrap().clone();
        if map.is_empty() {
            return Ok(stream);
        }
        Ok(Box::pin(stream.map(move |item| {
            item.map(|mut response| {
                for output_item in &mut response.output {
                    for part in &mut output_item.content {
                        part.text = guardrails::pii::deanonymize_text(&part.text, &map);
                    }
                }
                response
            })
        })))
    }

    async fn run_pipeline_on_responses(
        &self,
        request: ResponsesRequest,
        pctx: &GuardrailContext,
    ) -> Result<ResponsesRequest, GatewayError> {
        let item_messages = responses_input_to_messages(request.input.as_ref());
        let neutral = guardrails::from_responses(request.instructions.as_deref(), item_messages);
        let processed = self.pipeline.run_with_context(neutral, pctx).await?;
        let (instructions, rest) = guardrails::to_responses(processed);

        let input = if rest.is_empty() {
            request.input
        } else {
            Some(crate::models::ResponsesInput::Items(
                rest.into_iter()
                    .map(|m| crate::models::ResponsesInputItem {
                        role: m.role,
                        content: crate::models::ResponsesContent::Text(m.content),
                    })
                    .collect(),
            ))
        };

        Ok(ResponsesRequest {
            instructions,
            input,
            ..request
        })
    }

    pub async fn embeddings(
        &self,
        ctx: &RequestContext,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, GatewayError> {
        let provider = self.resolve(&request.model)?;
        provider.embeddings(ctx, request).await
    }

    pub async fn list_models(&self, ctx: &RequestContext) -> Vec<Model> {
        self.registry.list_models(ctx).await
    }

    pub async fn create_batch(
        &self,
        ctx: &RequestContext,
        model: &str,
        request: BatchRequest,
    ) -> Result<BatchResponse, GatewayError> {
        let provider = self.resolve(model)?;
        let batcher = batch_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support batches")))?;
        batcher.create_batch(ctx, request).await
    }

    pub async fn batch_results(
        &self,
        ctx: &RequestContext,
        model: &str,
        batch_id: &str,
    ) -> Result<Vec<BatchResultItem>, GatewayError> {
        let provider = self.resolve(model)?;
        let batcher = batch_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support batches")))?;
        batcher.batch_results(ctx, batch_id).await
    }

    pub async fn get_batch(
        &self,
        ctx: &RequestContext,
        model: &str,
        batch_id: &str,
    ) -> Result<BatchResponse, GatewayError> {
        let provider = self.resolve(model)?;
        let batcher = batch_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support batches")))?;
        batcher.get_batch(ctx, batch_id).await
    }

    pub async fn list_batches(&self, ctx: &RequestContext, model: &str) -> Result<Vec<BatchResponse>, GatewayError> {
        let provider = self.resolve(model)?;
        let batcher = batch_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support batches")))?;
        batcher.list_batches(ctx).await
    }

    pub async fn cancel_batch(&self, ctx: &RequestContext, model: &str, batch_id: &str) -> Result<(), GatewayError> {
        let provider = self.resolve(model)?;
        let batcher = batch_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support batches")))?;
        batcher.cancel_batch(ctx, batch_id).await
    }

    pub async fn upload_file(
        &self,
        ctx: &RequestContext,
        model: &str,
        filename: &str,
        purpose: &str,
        content: Bytes,
    ) -> Result<FileObject, GatewayError> {
        let provider = self.resolve(model)?;
        let filer = file_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support files")))?;
        filer.upload_file(ctx, filename, purpose, content).await
    }

    pub async fn get_file(
        &self,
        ctx: &RequestContext,
        model: &str,
        file_id: &str,
    ) -> Result<FileObject, GatewayError> {
        let provider = self.resolve(model)?;
        let filer = file_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support files")))?;
        filer.get_file(ctx, file_id).await
    }

    pub async fn delete_file(&self, ctx: &RequestContext, model: &str, file_id: &str) -> Result<(), GatewayError> {
        let provider = self.resolve(model)?;
        let filer = file_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support files")))?;
        filer.delete_file(ctx, file_id).await
    }

    pub async fn list_files(&self, ctx: &RequestContext, model: &str) -> Result<Vec<FileObject>, GatewayError> {
        let provider = self.resolve(model)?;
        let filer = file_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support files")))?;
        filer.list_files(ctx).await
    }

    pub async fn get_file_content(&self, ctx: &RequestContext, model: &str, file_id: &str) -> Result<Bytes, GatewayError> {
        let provider = self.resolve(model)?;
        let filer = file_capable(provider.as_ref())
            .ok_or_else(|| GatewayError::invalid_request(format!("provider '{model}' does not support files")))?;
        filer.get_file_content(ctx, file_id).await
    }

    /// Inspects each POST item in an inline batch body whose URL path is
    /// `/v1/chat/completions` or `/v1/responses`, running its decoded body
    /// through the pipeline and re-encoding it. Other items, and every item
    /// when `guard_inline_batch` is off, pass through unchanged. Always
    /// returns a fresh copy.
    pub async fn guard_inline_batch_items(
        &self,
        items: Vec<BatchRequestItem>,
    ) -> Result<Vec<BatchRequestItem>, GatewayError> {
        if !self.guard_inline_batch {
            return Ok(items);
        }

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if item.method.eq_ignore_ascii_case("POST") {
                let path = item.url.split('?').next().unwrap_or(&item.url);
                if path == "/v1/chat/completions" {
                    let request: ChatRequest = serde_json::from_value(item.body.clone())?;
                    let pctx = GuardrailContext::for_model(request.model.clone());
                    let messages = self.pipeline.run_with_context(request.messages, &pctx).await?;
                    let request = ChatRequest { messages, ..request };
                    out.push(BatchRequestItem {
                        body: serde_json::to_value(request)?,
                        ..item
                    });
                    continue;
                }
                if path == "/v1/responses" {
                    let request: ResponsesRequest = serde_json::from_value(item.body.clone())?;
                    let pctx = GuardrailContext::for_model(request.model.clone());
                    let request = self.run_pipeline_on_responses(request, &pctx).await?;
                    out.push(BatchRequestItem {
                        body: serde_json::to_value(request)?,
                        ..item
                    });
                    continue;
                }
            }
            out.push(item);
        }
        Ok(out)
    }
}

fn responses_input_to_messages(input: Option<&crate::models::ResponsesInput>) -> Vec<crate::models::Message> {
    use crate::models::Message;

    match input {
        None => Vec::new(),
        Some(crate::models::ResponsesInput::Text(text)) => vec![Message::user(text.clone())],
        Some(crate::models::ResponsesInput::Items(items)) => items
            .iter()
            .map(|item| {
                let content = match &item.content {
                    crate::models::ResponsesContent::Text(text) => text.clone(),
                    crate::models::ResponsesContent::Parts(parts) => parts
                        .iter()
                        .filter_map(|p| p.text.clone())
                        .collect::<Vec<_>>()
                        .join("\n"),
                };
                Message {
                    role: item.role,
                    content,
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::system_prompt::{Mode, SystemPromptGuardrail};
    use crate::models::{Choice, Message, Usage};
    use crate::provider::Provider;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Mutex;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn supports(&self, model: &str) -> bool {
            model == "echo-model"
        }

        async fn chat(&self, _ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
            Ok(ChatResponse {
                id: "1".into(),
                object: "chat.completion".into(),
                created: 0,
                model: request.model,
                provider: "echo".into(),
                choices: vec![Choice {
                    index: 0,
                    message: request.messages.first().cloned().unwrap_or_else(|| Message::assistant("")),
                    finish_reason: Some("stop".into()),
                }],
                usage: Some(Usage::default()),
            })
        }

        async fn stream_chat(&self, _ctx: &RequestContext, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            Err(GatewayError::invalid_request("n/a"))
        }

        async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
            Ok(vec![])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct RecordingEchoProvider {
        model: &'static str,
        received: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl Provider for RecordingEchoProvider {
        fn name(&self) -> &str {
            "recording-echo"
        }

        fn supports(&self, model: &str) -> bool {
            model == self.model
        }

        async fn chat(&self, _ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
            let content = request.messages.first().map(|m| m.content.clone()).unwrap_or_default();
            *self.received.lock().unwrap() = Some(content.clone());
            Ok(ChatResponse {
                id: "1".into(),
                object: "chat.completion".into(),
                created: 0,
                model: request.model,
                provider: "recording-echo".into(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: Some("stop".into()),
                }],
                usage: Some(Usage::default()),
            })
        }

        async fn stream_chat(&self, _ctx: &RequestContext, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            Err(GatewayError::invalid_request("n/a"))
        }

        async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
            Ok(vec![])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn guarded_with_system_prompt() -> GuardedProvider {
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(EchoProvider));

        let pipeline = Pipeline::new().add(
            0,
            SystemPromptGuardrail::new(Mode::Inject, "be nice").unwrap(),
        );

        GuardedProvider::new(Arc::new(registry), Arc::new(pipeline))
    }

    fn guarded_with_pii() -> GuardedProvider {
        use crate::guardrails::pii::{AnonymizeGuardrail, Anonymizer, DetectorConfig, TokenStrategy};

        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(EchoProvider));

        let anonymizer = Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Token);
        let pipeline = Pipeline::new().add(0, AnonymizeGuardrail::new(Arc::new(anonymizer)));

        GuardedProvider::new(Arc::new(registry), Arc::new(pipeline))
    }

    fn guarded_with_pii_allowlisted_to(
        allowed_model: &str,
        recording_model: &'static str,
    ) -> (GuardedProvider, Arc<Mutex<Option<String>>>) {
        use crate::guardrails::pii::{AnonymizeGuardrail, Anonymizer, DetectorConfig, TokenStrategy};

        let received = Arc::new(Mutex::new(None));
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(RecordingEchoProvider {
            model: recording_model,
            received: received.clone(),
        }));

        let anonymizer = Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Token)
            .with_model_allowlist(vec![allowed_model.to_string()]);
        let pipeline = Pipeline::new().add(0, AnonymizeGuardrail::new(Arc::new(anonymizer)));

        (GuardedProvider::new(Arc::new(registry), Arc::new(pipeline)), received)
    }

    #[tokio::test]
    async fn chat_runs_pipeline_before_dispatch() {
        let guarded = guarded_with_system_prompt();
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let response = guarded.chat(&ctx, request).await.unwrap();
        assert_eq!(response.choices[0].message.role, crate::models::Role::System);
        assert_eq!(response.choices[0].message.content, "be nice");
    }

    #[tokio::test]
    async fn chat_does_not_mutate_caller_request() {
        let guarded = guarded_with_system_prompt();
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let original_messages = request.messages.clone();
        let _ = guarded.chat(&ctx, request.clone()).await;
        assert_eq!(request.messages, original_messages);
    }

    #[tokio::test]
    async fn unknown_model_surfaces_not_found() {
        let guarded = guarded_with_system_prompt();
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "ghost".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let err = guarded.chat(&ctx, request).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn chat_anonymizes_request_and_deanonymizes_response() {
        // The provider in this test echoes the (anonymized) message content
        // straight back; the wrapper must restore the original value in
        // the response despite never having seen it itself.
        let guarded = guarded_with_pii();
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("email me at test@example.com")],
            ..Default::default()
        };
        let response = guarded.chat(&ctx, request).await.unwrap();
        assert_eq!(response.choices[0].message.content, "email me at test@example.com");
    }

    #[tokio::test]
    async fn chat_with_no_pii_leaves_response_untouched() {
        let guarded = guarded_with_pii();
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("no secrets here")],
            ..Default::default()
        };
        let response = guarded.chat(&ctx, request).await.unwrap();
        assert_eq!(response.choices[0].message.content, "no secrets here");
    }

    #[tokio::test]
    async fn two_concurrent_requests_do_not_share_token_maps() {
        // Each call must get its own token map — otherwise a token minted
        // for one request's value could leak into another's response.
        let guarded = guarded_with_pii();
        let ctx = RequestContext::new();

        let request_a = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("a@example.com")],
            ..Default::default()
        };
        let request_b = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("b@example.com")],
            ..Default::default()
        };

        let response_a = guarded.chat(&ctx, request_a).await.unwrap();
        let response_b = guarded.chat(&ctx, request_b).await.unwrap();
        assert_eq!(response_a.choices[0].message.content, "a@example.com");
        assert_eq!(response_b.choices[0].message.content, "b@example.com");
    }

    #[tokio::test]
    async fn chat_skips_anonymization_for_models_outside_the_allowlist() {
        let (guarded, received) = guarded_with_pii_allowlisted_to("gpt-4o", "claude-3");
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "claude-3".into(),
            messages: vec![Message::user("email me at test@example.com")],
            ..Default::default()
        };
        let response = guarded.chat(&ctx, request).await.unwrap();

        // The provider must have seen the raw PII, not a token, since
        // "claude-3" is not in the allowlist.
        assert_eq!(received.lock().unwrap().as_deref(), Some("email me at test@example.com"));
        assert_eq!(response.choices[0].message.content, "email me at test@example.com");
    }

    #[tokio::test]
    async fn chat_anonymizes_for_models_inside_the_allowlist() {
        let (guarded, received) = guarded_with_pii_allowlisted_to("gpt-4o", "gpt-4o");
        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("email me at test@example.com")],
            ..Default::default()
        };
        let response = guarded.chat(&ctx, request).await.unwrap();

        // The provider must only have seen a token, never the raw address.
        let seen = received.lock().unwrap().clone().unwrap();
        assert!(seen.contains("[EMAIL_"));
        assert!(!seen.contains("test@example.com"));
        // The wrapper still de-anonymizes the response back for the caller.
        assert_eq!(response.choices[0].message.content, "email me at test@example.com");
    }

    struct StreamingEchoProvider;

    #[async_trait]
    impl Provider for StreamingEchoProvider {
        fn name(&self) -> &str {
            "streaming-echo"
        }

        fn supports(&self, model: &str) -> bool {
            model == "echo-model"
        }

        async fn chat(&self, _ctx: &RequestContext, _request: ChatRequest) -> Result<ChatResponse, GatewayError> {
            Err(GatewayError::invalid_request("n/a"))
        }

        async fn stream_chat(&self, _ctx: &RequestContext, request: ChatRequest) -> Result<ChatStream, GatewayError> {
            // Splits the (already anonymized) message content across two
            // chunks at its midpoint, simulating a token straddling a
            // chunk boundary the way an upstream might.
            let content = request.messages.first().map(|m| m.content.clone()).unwrap_or_default();
            let mid = content.len() / 2;
            let (first, second) = content.split_at(mid);
            let chunk = |text: &str| {
                Ok(crate::models::StreamChunk {
                    id: "1".into(),
                    object: "chat.completion.chunk".into(),
                    created: 0,
                    model: "echo-model".into(),
                    choices: vec![crate::models::StreamChoice {
                        index: 0,
                        delta: crate::models::Delta {
                            role: None,
                            content: Some(text.to_string()),
                        },
                        finish_reason: None,
                    }],
                })
            };
            let chunks = vec![chunk(first), chunk(second)];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
            Ok(vec![])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn stream_chat_deanonymizes_tokens_split_across_chunks() {
        use crate::guardrails::pii::{AnonymizeGuardrail, Anonymizer, DetectorConfig, TokenStrategy};

        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(StreamingEchoProvider));
        let anonymizer = Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Token);
        let pipeline = Pipeline::new().add(0, AnonymizeGuardrail::new(Arc::new(anonymizer)));
        let guarded = GuardedProvider::new(Arc::new(registry), Arc::new(pipeline));

        let ctx = RequestContext::new();
        let request = ChatRequest {
            model: "echo-model".into(),
            messages: vec![Message::user("contact test@example.com now")],
            ..Default::default()
        };
        let stream = guarded.stream_chat(&ctx, request).await.unwrap();
        let chunks: Vec<_> = futures::StreamExt::collect(stream).await;
        let total: String = chunks
            .into_iter()
            .map(|c| c.unwrap().choices[0].delta.content.clone().unwrap_or_default())
            .collect();
        assert_eq!(total, "contact test@example.com now");
    }

    #[tokio::test]
    async fn inline_batch_guarding_off_by_default_passes_items_through() {
        let guarded = guarded_with_system_prompt();
        let item = BatchRequestItem {
            custom_id: "1".into(),
            method: "POST".into(),
            url: "/v1/chat/completions".into(),
            body: serde_json::json!({"model": "echo-model", "messages": [{"role": "user", "content": "hi"}]}),
        };
        let out = guarded.guard_inline_batch_items(vec![item.clone()]).await.unwrap();
        assert_eq!(out[0].body, item.body);
    }

    #[tokio::test]
    async fn inline_batch_guarding_applies_pipeline_when_enabled() {
        let guarded = guarded_with_system_prompt().with_inline_batch_guarding(true);
        let item = BatchRequestItem {
            custom_id: "1".into(),
            method: "POST".into(),
            url: "/v1/chat/completions".into(),
            body: serde_json::json!({"model": "echo-model", "messages": [{"role": "user", "content": "hi"}]}),
        };
        let out = guarded.guard_inline_batch_items(vec![item]).await.unwrap();
        let decoded: ChatRequest = serde_json::from_value(out[0].body.clone()).unwrap();
        assert!(decoded.messages.iter().any(|m| m.role.is_system()));
    }
}
