//! # Route Handlers
//!
//! Thin delegation layer: every handler builds a fresh [`RequestContext`],
//! forwards to the matching [`GuardedProvider`] method, and translates the
//! result into an axum response. Streaming endpoints convert the SDK's
//! `ChatStream`/`ResponsesStream` into server-sent events.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::http::StatusCode;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use ultrafast_models_sdk::context::RequestContext;
use ultrafast_models_sdk::guarded::GuardedProvider;
use ultrafast_models_sdk::models::{
    BatchRequest, ChatRequest, EmbeddingRequest, ResponsesRequest,
};

use crate::error::ApiError;

pub type AppState = Arc<GuardedProvider>;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let ctx = RequestContext::new();
    if request.stream.unwrap_or(false) {
        let stream = state.stream_chat(&ctx, request).await?;
        return Ok(sse_from_chat_stream(stream).into_response());
    }
    let response = state.chat(&ctx, request).await?;
    Ok(Json(response).into_response())
}

fn sse_from_chat_stream(
    stream: ultrafast_models_sdk::provider::ChatStream,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let events = stream.map(|item| {
        let event = match item {
            Ok(chunk) => Event::default().json_data(chunk).unwrap_or_else(|_| Event::default().data("{}")),
            Err(err) => Event::default().event("error").data(err.as_json().to_string()),
        };
        Ok(event)
    });
    let done = futures::stream::once(async { Ok(Event::default().data("[DONE]")) });
    Sse::new(events.chain(done))
}

pub async fn responses(
    State(state): State<AppState>,
    Json(request): Json<ResponsesRequest>,
) -> Result<Response, ApiError> {
    let ctx = RequestContext::new();
    if request.stream.unwrap_or(false) {
        let stream = state.stream_responses(&ctx, request).await?;
        return Ok(sse_from_responses_stream(stream).into_response());
    }
    let response = state.responses(&ctx, request).await?;
    Ok(Json(response).into_response())
}

fn sse_from_responses_stream(
    stream: ultrafast_models_sdk::provider::ResponsesStream,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut created_sent = false;
    let events = stream.flat_map(move |item| {
        let mut out = Vec::new();
        match item {
            Ok(response) => {
                if !created_sent {
                    created_sent = true;
                    out.push(Ok(Event::default().event("response.created").json_data(&response).unwrap_or_else(|_| Event::default().data("{}"))));
                }
                out.push(Ok(Event::default().event("response.output_text.delta").json_data(&response).unwrap_or_else(|_| Event::default().data("{}"))));
            }
            Err(err) => {
                out.push(Ok(Event::default().event("error").data(err.as_json().to_string())));
            }
        }
        futures::stream::iter(out)
    });
    let terminator = futures::stream::iter(vec![
        Ok(Event::default().event("response.done").data("{}")),
        Ok(Event::default().data("[DONE]")),
    ]);
    Sse::new(events.chain(terminator))
}

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = RequestContext::new();
    let data = state.list_models(&ctx).await;
    Json(ultrafast_models_sdk::models::ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

pub async fn embeddings(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<ultrafast_models_sdk::models::EmbeddingResponse>, ApiError> {
    let ctx = RequestContext::new();
    let response = state.embeddings(&ctx, request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub model: String,
}

pub async fn create_batch(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<ultrafast_models_sdk::models::BatchResponse>, ApiError> {
    let ctx = RequestContext::new();
    let response = state.create_batch(&ctx, &query.model, request).await?;
    Ok(Json(response))
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<Vec<ultrafast_models_sdk::models::BatchResponse>>, ApiError> {
    let ctx = RequestContext::new();
    let batches = state.list_batches(&ctx, &query.model).await?;
    Ok(Json(batches))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<ultrafast_models_sdk::models::BatchResponse>, ApiError> {
    let ctx = RequestContext::new();
    let response = state.get_batch(&ctx, &query.model, &batch_id).await?;
    Ok(Json(response))
}

pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<StatusCode, ApiError> {
    let ctx = RequestContext::new();
    state.cancel_batch(&ctx, &query.model, &batch_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn batch_results(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<Vec<ultrafast_models_sdk::models::BatchResultItem>>, ApiError> {
    let ctx = RequestContext::new();
    let results = state.batch_results(&ctx, &query.model, &batch_id).await?;
    Ok(Json(results))
}

pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    mut multipart: Multipart,
) -> Result<Json<ultrafast_models_sdk::models::FileObject>, ApiError> {
    let ctx = RequestContext::new();
    let mut filename = String::new();
    let mut purpose = String::new();
    let mut content = bytes::Bytes::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ultrafast_models_sdk::error::GatewayError::invalid_request(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "purpose" => {
                purpose = field
                    .text()
                    .await
                    .map_err(|e| ultrafast_models_sdk::error::GatewayError::invalid_request(e.to_string()))?;
            }
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                content = field
                    .bytes()
                    .await
                    .map_err(|e| ultrafast_models_sdk::error::GatewayError::invalid_request(e.to_string()))?;
            }
            _ => {}
        }
    }

    let file = state.upload_file(&ctx, &query.model, &filename, &purpose, content).await?;
    Ok(Json(file))
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<Vec<ultrafast_models_sdk::models::FileObject>>, ApiError> {
    let ctx = RequestContext::new();
    let files = state.list_files(&ctx, &query.model).await?;
    Ok(Json(files))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<ultrafast_models_sdk::models::FileObject>, ApiError> {
    let ctx = RequestContext::new();
    let file = state.get_file(&ctx, &query.model, &file_id).await?;
    Ok(Json(file))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<StatusCode, ApiError> {
    let ctx = RequestContext::new();
    state.delete_file(&ctx, &query.model, &file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_file_content(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<bytes::Bytes, ApiError> {
    let ctx = RequestContext::new();
    let content = state.get_file_content(&ctx, &query.model, &file_id).await?;
    Ok(content)
}
