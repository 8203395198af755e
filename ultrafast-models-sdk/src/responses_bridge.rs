//! # Chat→Responses Bridge
//!
//! The conversion §4.E documents for a provider whose native upstream API
//! is chat-shaped: `instructions` becomes a leading system message, the
//! polymorphic `input` becomes role-tagged messages, the provider's own
//! `chat`/`stream_chat` does the actual call, and the result is wrapped
//! back into a `ResponsesResponse` carrying one `message`/`output_text`
//! item. [`Provider::responses`](crate::provider::Provider::responses) and
//! `stream_responses` default to this bridge, so any provider that only
//! implements chat still serves `/v1/responses`; a provider that speaks
//! the Responses shape natively overrides them instead.

use futures::StreamExt;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::models::{
    ChatRequest, ChatResponse, Message, ResponsesContent, ResponsesInput, ResponsesOutputContent,
    ResponsesOutputItem, ResponsesRequest, ResponsesResponse,
};
use crate::provider::{Provider, ResponsesStream};

/// Converts a Responses request into a chat request: (1) `instructions`
/// becomes a leading system message, (2) polymorphic `input` becomes
/// user/role-tagged messages.
pub fn responses_to_chat(request: &ResponsesRequest) -> ChatRequest {
    let mut messages = Vec::new();
    if let Some(instructions) = &request.instructions {
        if !instructions.is_empty() {
            messages.push(Message::system(instructions.clone()));
        }
    }
    match &request.input {
        Some(ResponsesInput::Text(text)) => messages.push(Message::user(text.clone())),
        Some(ResponsesInput::Items(items)) => {
            for item in items {
                let content = match &item.content {
                    ResponsesContent::Text(text) => text.clone(),
                    ResponsesContent::Parts(parts) => parts
                        .iter()
                        .filter_map(|p| p.text.clone())
                        .collect::<Vec<_>>()
                        .join("\n"),
                };
                messages.push(Message {
                    role: item.role,
                    content,
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
        }
        None => {}
    }

    ChatRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_output_tokens,
        stream: request.stream,
        tools: request.tools.clone(),
        ..Default::default()
    }
}

/// Wraps a chat response into a `ResponsesResponse` with one `message`
/// output item containing a single `output_text` part.
pub fn chat_response_to_responses(response: ChatResponse) -> ResponsesResponse {
    let text = response
        .choices
        .first()
        .map(|c| c.message.content.clone())
        .unwrap_or_default();

    ResponsesResponse {
        id: response.id,
        object: "response".to_string(),
        created: response.created,
        model: response.model,
        provider: response.provider,
        output: vec![ResponsesOutputItem {
            id: format!("msg_{}", Uuid::new_v4()),
            item_type: "message".to_string(),
            content: vec![ResponsesOutputContent {
                part_type: "output_text".to_string(),
                text,
            }],
        }],
        usage: response.usage,
    }
}

/// Default body of `Provider::responses` for a chat-only provider: convert,
/// dispatch through the provider's own `chat`, convert back.
pub async fn bridge_responses<P: Provider + ?Sized>(
    provider: &P,
    ctx: &RequestContext,
    request: ResponsesRequest,
) -> Result<ResponsesResponse, GatewayError> {
    let chat_request = responses_to_chat(&request);
    let chat_response = provider.chat(ctx, chat_request).await?;
    Ok(chat_response_to_responses(chat_response))
}

/// Default body of `Provider::stream_responses`: the provider's own
/// `stream_chat` drives a `response.created` / `response.output_text.delta`
/// / `response.done` event sequence.
pub async fn bridge_stream_responses<P: Provider + ?Sized>(
    provider: &P,
    ctx: &RequestContext,
    request: ResponsesRequest,
) -> Result<ResponsesStream, GatewayError> {
    let chat_request = responses_to_chat(&request);
    let model = request.model.clone();
    let chat_stream = provider.stream_chat(ctx, chat_request).await?;

    let stream = async_stream::stream! {
        let response_id = format!("resp_{}", Uuid::new_v4());
        yield Ok(created_event(&response_id, &model));

        let mut chat_stream = chat_stream;
        while let Some(item) = chat_stream.next().await {
            match item {
                Ok(chunk) => {
                    if let Some(choice) = chunk.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            yield Ok(delta_event(&response_id, &model, content));
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Ok(done_event(&response_id, &model));
    };

    Ok(Box::pin(stream))
}

fn created_event(response_id: &str, model: &str) -> ResponsesResponse {
    ResponsesResponse {
        id: response_id.to_string(),
        object: "response.created".to_string(),
        created: now_unix(),
        model: model.to_string(),
        provider: String::new(),
        output: vec![],
        usage: None,
    }
}

fn delta_event(response_id: &str, model: &str, text: &str) -> ResponsesResponse {
    ResponsesResponse {
        id: response_id.to_string(),
        object: "response.output_text.delta".to_string(),
        created: now_unix(),
        model: model.to_string(),
        provider: String::new(),
        output: vec![ResponsesOutputItem {
            id: format!("msg_{}", Uuid::new_v4()),
            item_type: "message".to_string(),
            content: vec![ResponsesOutputContent {
                part_type: "output_text".to_string(),
                text: text.to_string(),
            }],
        }],
        usage: None,
    }
}

fn done_event(response_id: &str, model: &str) -> ResponsesResponse {
    ResponsesResponse {
        id: response_id.to_string(),
        object: "response.done".to_string(),
        created: now_unix(),
        model: model.to_string(),
        provider: String::new(),
        output: vec![],
        usage: None,
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
