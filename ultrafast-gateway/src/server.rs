//! # HTTP Server
//!
//! Builds the axum [`Router`] from a loaded [`Config`]: constructs one
//! provider adapter per `[providers.*]` entry, registers them into a
//! [`ModelRegistry`] (optionally metadata-enriched), assembles the
//! guardrails [`Pipeline`], and wraps everything in a [`GuardedProvider`]
//! shared across every route handler.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use ultrafast_models_sdk::circuit_breaker::CircuitBreakerConfig;
use ultrafast_models_sdk::context::RequestContext;
use ultrafast_models_sdk::error::GatewayError;
use ultrafast_models_sdk::guarded::GuardedProvider;
use ultrafast_models_sdk::guardrails::pii::{AnonymizeGuardrail, Anonymizer, DetectorConfig, TokenStrategy};
use ultrafast_models_sdk::guardrails::system_prompt::{Mode, SystemPromptGuardrail};
use ultrafast_models_sdk::guardrails::Pipeline;
use ultrafast_models_sdk::metadata::MetadataRegistry;
use ultrafast_models_sdk::provider::Provider;
use ultrafast_models_sdk::providers::anthropic::{AnthropicConfig, AnthropicProvider};
use ultrafast_models_sdk::providers::ollama::{OllamaConfig, OllamaProvider};
use ultrafast_models_sdk::providers::openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
use ultrafast_models_sdk::registry::ModelRegistry;

use crate::config::{Config, ProviderConfig};
use crate::handlers;

/// Guardrail registration order: the system-prompt rewrite runs first so
/// that anonymization (order 1) sees the final message set, including any
/// injected/overridden system content.
const ORDER_SYSTEM_PROMPT: i32 = 0;
const ORDER_PII: i32 = 1;

pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let mut registry = ModelRegistry::new();
    for (name, provider_config) in &config.providers {
        let provider = build_provider(name, provider_config)?;
        registry.register(provider);
    }

    if let Some(url) = config.metadata.url.clone() {
        let metadata = Arc::new(MetadataRegistry::new(url)?);
        let ctx = RequestContext::new();
        if let Err(err) = metadata.refresh(&ctx).await {
            tracing::warn!(error = %err, "initial model metadata refresh failed, serving unenriched models");
        }
        registry = registry.with_metadata_registry(metadata);
    }

    let pipeline = build_pipeline(&config)?;
    let guard_inline_batch = config
        .guardrails
        .pii
        .as_ref()
        .map(|p| p.guard_inline_batch_items)
        .unwrap_or(false);

    let guarded = Arc::new(
        GuardedProvider::new(Arc::new(registry), Arc::new(pipeline)).with_inline_batch_guarding(guard_inline_batch),
    );

    let cors = if config.server.cors.enabled {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/batches", post(handlers::create_batch).get(handlers::list_batches))
        .route(
            "/v1/batches/{id}",
            get(handlers::get_batch).delete(handlers::cancel_batch),
        )
        .route("/v1/batches/{id}/results", get(handlers::batch_results))
        .route("/v1/files", post(handlers::upload_file).get(handlers::list_files))
        .route("/v1/files/{id}", get(handlers::get_file).delete(handlers::delete_file))
        .route("/v1/files/{id}/content", get(handlers::get_file_content))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.server.timeout))
        .layer(cors)
        .with_state(guarded);

    Ok(app)
}

fn build_provider(name: &str, config: &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config {
        ProviderConfig::OpenAiCompatible {
            base_url,
            api_key,
            max_retries,
            circuit_breaker,
            request_timeout,
            known_models,
        } => {
            let mut cfg = OpenAiCompatibleConfig::new(name.to_string(), base_url.clone());
            if let Some(key) = api_key {
                cfg = cfg.with_api_key(key.clone());
            }
            cfg.max_retries = *max_retries;
            cfg.request_timeout = *request_timeout;
            cfg.known_models = known_models.clone();
            cfg.circuit_breaker = if *circuit_breaker {
                Some(CircuitBreakerConfig::default())
            } else {
                None
            };
            Arc::new(OpenAiCompatibleProvider::new(cfg)?)
        }
        ProviderConfig::Ollama {
            base_url,
            request_timeout,
            known_models,
        } => {
            let mut cfg = OllamaConfig {
                base_url: base_url.clone(),
                request_timeout: *request_timeout,
                ..OllamaConfig::default()
            };
            if !known_models.is_empty() {
                cfg.known_models = known_models.clone();
            }
            Arc::new(OllamaProvider::new(cfg)?)
        }
        ProviderConfig::Anthropic {
            base_url,
            api_key,
            request_timeout,
            known_models,
        } => {
            let mut cfg = AnthropicConfig::new(api_key.clone());
            cfg.base_url = base_url.clone();
            cfg.request_timeout = *request_timeout;
            if !known_models.is_empty() {
                cfg.known_models = known_models.clone();
            }
            Arc::new(AnthropicProvider::new(cfg)?)
        }
    };
    Ok(provider)
}

fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let mut pipeline = Pipeline::new();

    if let Some(system_prompt) = &config.guardrails.system_prompt {
        let mode = match system_prompt.mode.as_str() {
            "inject" => Mode::Inject,
            "override" => Mode::Override,
            "decorator" => Mode::Decorator,
            other => anyhow::bail!("unknown system prompt mode '{other}'"),
        };
        let guardrail = SystemPromptGuardrail::new(mode, system_prompt.content.clone())
            .map_err(|e: GatewayError| anyhow::anyhow!(e.as_json().to_string()))?;
        pipeline = pipeline.add(ORDER_SYSTEM_PROMPT, guardrail);
    }

    if let Some(pii) = &config.guardrails.pii {
        if pii.enabled {
            let strategy = match pii.strategy.as_str() {
                "token" => TokenStrategy::Token,
                "hash" => TokenStrategy::Hash,
                "mask" => TokenStrategy::Mask,
                other => anyhow::bail!("unknown PII token strategy '{other}'"),
            };
            let detectors = DetectorConfig {
                email: pii.detectors.email,
                phone: pii.detectors.phone,
                ssn: pii.detectors.ssn,
                cc: pii.detectors.cc,
                ip: pii.detectors.ip,
            };
            let mut anonymizer = Anonymizer::new(detectors, strategy);
            if !pii.model_allowlist.is_empty() {
                anonymizer = anonymizer.with_model_allowlist(pii.model_allowlist.clone());
            }
            let guardrail = AnonymizeGuardrail::new(Arc::new(anonymizer));
            pipeline = pipeline.add(ORDER_PII, guardrail);
        }
    }

    Ok(pipeline)
}
