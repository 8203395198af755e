//! # Model Registry
//!
//! Maps a model selector to the provider that owns it. This is
//! deliberately not a load balancer: exactly one provider serves any given
//! model at any time, chosen by the first provider (in registration order)
//! whose [`Provider::supports`] returns `true`, or by an explicit
//! `provider/model` selector. Resolved mappings are cached so repeat calls
//! for the same model skip the scan.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ultrafast_models_sdk::registry::ModelRegistry;
//! use ultrafast_models_sdk::selector::ModelSelector;
//!
//! # async fn example(registry: &ModelRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let selector = ModelSelector::parse("gpt-4o", "")?;
//! let provider = registry.resolve(&selector)?;
//! println!("resolved to provider {}", provider.name());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use dashmap::DashMap;

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::metadata::MetadataRegistry;
use crate::models::Model;
use crate::provider::Provider;
use crate::selector::ModelSelector;

pub struct ModelRegistry {
    providers: Vec<(String, Arc<dyn Provider>)>,
    model_index: DashMap<String, usize>,
    metadata: Option<Arc<MetadataRegistry>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            model_index: DashMap::new(),
            metadata: None,
        }
    }

    pub fn with_metadata_registry(mut self, metadata: Arc<MetadataRegistry>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Registers a provider. Registration order is the tie-break when two
    /// providers both claim the same model and no explicit provider was
    /// named in the selector.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push((provider.name().to_string(), provider));
    }

    fn find_by_name(&self, name: &str) -> Option<(usize, &Arc<dyn Provider>)> {
        self.providers
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == name)
            .map(|(i, (_, p))| (i, p))
    }

    /// Resolves a selector to its owning provider. An explicit provider
    /// name in the selector is looked up directly; otherwise providers are
    /// scanned in registration order and the first match is cached.
    pub fn resolve(&self, selector: &ModelSelector) -> Result<Arc<dyn Provider>, GatewayError> {
        if let Some(name) = &selector.provider {
            return self
                .find_by_name(name)
                .map(|(_, p)| p.clone())
                .ok_or_else(|| GatewayError::not_found(format!("unknown provider '{name}'")));
        }

        if let Some(index) = self.model_index.get(&selector.model) {
            if let Some((_, provider)) = self.providers.get(*index) {
                return Ok(provider.clone());
            }
        }

        for (index, (_, provider)) in self.providers.iter().enumerate() {
            if provider.supports(&selector.model) {
                self.model_index.insert(selector.model.clone(), index);
                return Ok(provider.clone());
            }
        }

        Err(GatewayError::not_found(format!(
            "no provider serves model '{}'",
            selector.model
        )))
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Short stable identifier of the provider serving `model` (its
    /// `Provider::name()`), or an empty string if none claims it. Unlike
    /// [`ModelRegistry::resolve`] this never errors — callers use it for
    /// display/attribution, not dispatch.
    pub fn provider_type(&self, model: &str) -> String {
        let selector = match ModelSelector::parse(model, "") {
            Ok(selector) => selector,
            Err(_) => return String::new(),
        };
        self.resolve(&selector).map(|p| p.name().to_string()).unwrap_or_default()
    }

    /// Lists models across every registered provider, enriching each with
    /// metadata-registry data (§4.G) when one is configured. Failures from
    /// an individual provider's `list_models` call are logged and skipped
    /// rather than failing the whole aggregate listing.
    pub async fn list_models(&self, ctx: &RequestContext) -> Vec<Model> {
        let mut all = Vec::new();
        for (name, provider) in &self.providers {
            match provider.list_models(ctx).await {
                Ok(models) => all.extend(models),
                Err(err) => {
                    tracing::warn!(provider = %name, error = %err, "failed to list models");
                }
            }
        }

        if let Some(metadata) = &self.metadata {
            for model in &mut all {
                if let Some(enriched) = metadata.lookup(&model.id, Some(&model.owned_by)) {
                    model.metadata = Some(enriched);
                }
            }
        }

        all
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatRequest, ChatResponse, Choice, Message, Usage};
    use crate::provider::ChatStream;
    use async_trait::async_trait;
    use std::any::Any;

    struct StubProvider {
        name: String,
        models: Vec<String>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports(&self, model: &str) -> bool {
            self.models.iter().any(|m| m == model)
        }

        async fn chat(&self, _ctx: &RequestContext, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
            Ok(ChatResponse {
                id: "1".into(),
                object: "chat.completion".into(),
                created: 0,
                model: request.model,
                provider: self.name.clone(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant("hi"),
                    finish_reason: Some("stop".into()),
                }],
                usage: Some(Usage::default()),
            })
        }

        async fn stream_chat(&self, _ctx: &RequestContext, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            Err(GatewayError::invalid_request("n/a"))
        }

        async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<Model>, GatewayError> {
            Ok(self
                .models
                .iter()
                .map(|m| Model {
                    id: m.clone(),
                    object: "model".into(),
                    owned_by: self.name.clone(),
                    created: 0,
                    metadata: None,
                })
                .collect())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn provider(name: &str, models: &[&str]) -> Arc<dyn Provider> {
        Arc::new(StubProvider {
            name: name.to_string(),
            models: models.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn resolves_by_explicit_provider_name() {
        let mut registry = ModelRegistry::new();
        registry.register(provider("openai", &["gpt-4o"]));
        registry.register(provider("anthropic", &["claude-3"]));

        let selector = ModelSelector::parse("claude-3", "anthropic").unwrap();
        let resolved = registry.resolve(&selector).unwrap();
        assert_eq!(resolved.name(), "anthropic");
    }

    #[test]
    fn resolves_by_scanning_in_registration_order() {
        let mut registry = ModelRegistry::new();
        registry.register(provider("first", &["shared-model"]));
        registry.register(provider("second", &["shared-model"]));

        let selector = ModelSelector::parse("shared-model", "").unwrap();
        let resolved = registry.resolve(&selector).unwrap();
        assert_eq!(resolved.name(), "first");
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let registry = ModelRegistry::new();
        let selector = ModelSelector::parse("m", "ghost").unwrap();
        let err = registry.resolve(&selector).unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let mut registry = ModelRegistry::new();
        registry.register(provider("openai", &["gpt-4o"]));
        let selector = ModelSelector::parse("unknown-model", "").unwrap();
        let err = registry.resolve(&selector).unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn provider_type_reports_owning_provider_or_empty() {
        let mut registry = ModelRegistry::new();
        registry.register(provider("openai", &["gpt-4o"]));
        assert_eq!(registry.provider_type("gpt-4o"), "openai");
        assert_eq!(registry.provider_type("unknown-model"), "");
    }

    #[tokio::test]
    async fn list_models_aggregates_across_providers() {
        let mut registry = ModelRegistry::new();
        registry.register(provider("openai", &["gpt-4o"]));
        registry.register(provider("anthropic", &["claude-3"]));

        let ctx = RequestContext::new();
        let models = registry.list_models(&ctx).await;
        assert_eq!(models.len(), 2);
    }
}
