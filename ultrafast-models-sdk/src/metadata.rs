//! # Model Metadata Registry
//!
//! Fetches an external `ModelList` document (JSON, capped at 10 MiB) and
//! builds an in-memory index the model registry (§4.F) consults to enrich
//! each `Model` it returns from `list_models()`. The registry is a pure
//! lookup structure: it never calls back into provider adapters and a
//! failed or malformed fetch simply leaves models unenriched rather than
//! failing the caller.
//!
//! ## Resolution
//!
//! For a `(providerType, modelID)` pair:
//!
//! 1. Look up the composite key `providerType/modelID` in `provider_models`.
//!    If present, its `model_ref` names the base entry in `models`.
//! 2. Otherwise look up `modelID` directly in `models`.
//! 3. Otherwise consult the reverse alias index (built from every
//!    `provider_models` entry that declares a `custom_model_id`) and, on a
//!    hit, recurse with the canonical key.
//! 4. Otherwise the model is simply not enriched.
//!
//! Fields present on a matching `provider_models` entry (context window,
//! max output tokens, pricing, capabilities) override the base model's
//! fields; everything else is inherited.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::GatewayError;
use crate::http_client::{HeaderInjector, ResilientClient, ResilientClientConfig};
use crate::models::{ModelCategory, ModelMetadata, Pricing, PricingTier};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelList {
    pub version: i64,
    pub updated_at: String,
    #[serde(default)]
    pub providers: serde_json::Value,
    #[serde(default)]
    pub models: HashMap<String, RegistryModel>,
    #[serde(default)]
    pub provider_models: HashMap<String, RegistryProviderModel>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryModel {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    #[serde(default)]
    pub pricing: Option<RegistryPricing>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryProviderModel {
    /// Composite key's model portion this entry is an override for, e.g.
    /// the `models` key to use as the base when this entry itself doesn't
    /// fully describe the model.
    #[serde(default)]
    pub model_ref: Option<String>,
    /// The provider's own advertised model id, when it differs from the
    /// composite key's model portion. Feeds the reverse alias index.
    #[serde(default)]
    pub custom_model_id: Option<String>,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    #[serde(default)]
    pub pricing: Option<RegistryPricing>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryPricing {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub input_per_mtok: Option<f64>,
    #[serde(default)]
    pub output_per_mtok: Option<f64>,
    #[serde(default)]
    pub cached_input_per_mtok: Option<f64>,
    #[serde(default)]
    pub cache_write_per_mtok: Option<f64>,
    #[serde(default)]
    pub reasoning_output_per_mtok: Option<f64>,
    #[serde(default)]
    pub batch_input_per_mtok: Option<f64>,
    #[serde(default)]
    pub batch_output_per_mtok: Option<f64>,
    #[serde(default)]
    pub audio_input_per_mtok: Option<f64>,
    #[serde(default)]
    pub audio_output_per_mtok: Option<f64>,
    #[serde(default)]
    pub per_image: Option<f64>,
    #[serde(default)]
    pub per_request: Option<f64>,
    #[serde(default)]
    pub per_page: Option<f64>,
    #[serde(default)]
    pub per_second: Option<f64>,
    #[serde(default)]
    pub input_per_char: Option<f64>,
    #[serde(default)]
    pub tiers: Vec<RegistryPricingTier>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryPricingTier {
    pub up_to_mtok: f64,
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl From<RegistryPricing> for Pricing {
    fn from(p: RegistryPricing) -> Self {
        Pricing {
            currency: p.currency,
            input_per_mtok: p.input_per_mtok,
            output_per_mtok: p.output_per_mtok,
            cached_input_per_mtok: p.cached_input_per_mtok,
            cache_write_per_mtok: p.cache_write_per_mtok,
            reasoning_output_per_mtok: p.reasoning_output_per_mtok,
            batch_input_per_mtok: p.batch_input_per_mtok,
            batch_output_per_mtok: p.batch_output_per_mtok,
            audio_input_per_mtok: p.audio_input_per_mtok,
            audio_output_per_mtok: p.audio_output_per_mtok,
            per_image: p.per_image,
            per_request: p.per_request,
            per_page: p.per_page,
            per_second: p.per_second,
            input_per_char: p.input_per_char,
            tiers: p
                .tiers
                .into_iter()
                .map(|t| PricingTier {
                    up_to_mtok: t.up_to_mtok,
                    input_per_mtok: t.input_per_mtok,
                    output_per_mtok: t.output_per_mtok,
                })
                .collect(),
        }
    }
}

/// Maps a registry `modes` string into the closed `ModelCategory` set.
/// Unknown modes are dropped (return `None`).
pub fn category_for(mode: &str) -> Option<ModelCategory> {
    match mode {
        "all" => Some(ModelCategory::All),
        "text_generation" | "chat" | "completion" => Some(ModelCategory::TextGeneration),
        "embedding" | "embeddings" => Some(ModelCategory::Embedding),
        "image" | "image_generation" => Some(ModelCategory::Image),
        "audio" | "speech" => Some(ModelCategory::Audio),
        "video" => Some(ModelCategory::Video),
        "utility" | "moderation" => Some(ModelCategory::Utility),
        _ => None,
    }
}

/// Maps a list of registry modes into deduplicated categories, preserving
/// order of first occurrence and skipping unknown modes.
pub fn categories_for(modes: &[String]) -> Vec<ModelCategory> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for mode in modes {
        if let Some(category) = category_for(mode) {
            if seen.insert(category) {
                out.push(category);
            }
        }
    }
    out
}

struct Index {
    list: ModelList,
    /// `providerType/actual_model_id` -> composite key in `provider_models`.
    reverse_alias: HashMap<String, String>,
}

fn build_reverse_alias(list: &ModelList) -> HashMap<String, String> {
    let mut reverse = HashMap::new();
    for (composite_key, entry) in &list.provider_models {
        if let Some(custom_id) = &entry.custom_model_id {
            if let Some((provider_type, model_part)) = composite_key.split_once('/') {
                if custom_id != model_part {
                    reverse.insert(format!("{provider_type}/{custom_id}"), composite_key.clone());
                }
            }
        }
    }
    reverse
}

/// Fetches, parses, and serves lookups against an external model-metadata
/// document. A registry with no successful fetch yet simply returns `None`
/// from every lookup; models remain usable without enrichment.
pub struct MetadataRegistry {
    client: ResilientClient,
    url: String,
    index: RwLock<Option<Index>>,
}

impl MetadataRegistry {
    /// `url` is the full URL of the registry document; the resilient
    /// client is configured with an empty base so absolute URLs pass
    /// through `build_url` untouched.
    pub fn new(url: impl Into<String>) -> Result<Self, GatewayError> {
        let config = ResilientClientConfig {
            provider: "model-metadata-registry".to_string(),
            base_url: String::new(),
            circuit_breaker: None,
            ..Default::default()
        };
        let accept_json: HeaderInjector =
            std::sync::Arc::new(|req| req.header("Accept", "application/json"));
        Ok(Self {
            client: ResilientClient::new(config, accept_json)?,
            url: url.into(),
            index: RwLock::new(None),
        })
    }

    /// Fetches the registry document and (re)builds the index. A non-200
    /// response or a body over the 10 MiB cap is an error; callers may
    /// retry later but the registry keeps serving its previous index (if
    /// any) until a fetch succeeds.
    pub async fn refresh(&self, ctx: &RequestContext) -> Result<(), GatewayError> {
        let (status, body) = self.fetch_raw(ctx).await?;
        if status != 200 {
            return Err(GatewayError::provider_error(format!(
                "model metadata fetch returned status {status}"
            ))
            .with_provider("model-metadata-registry"));
        }
        if body.len() > MAX_BODY_BYTES {
            return Err(GatewayError::invalid_request(format!(
                "model metadata body exceeds {MAX_BODY_BYTES} byte cap"
            )));
        }
        let list: ModelList = serde_json::from_slice(&body)?;
        let reverse_alias = build_reverse_alias(&list);
        *self.index.write().unwrap() = Some(Index { list, reverse_alias });
        Ok(())
    }

    async fn fetch_raw(&self, ctx: &RequestContext) -> Result<(u16, Bytes), GatewayError> {
        self.client.do_raw(ctx, Method::GET, &self.url, None).await
    }

    /// Resolves metadata for `(providerType, modelId)` per the four-step
    /// algorithm in the module doc. Returns `None` when nothing matches —
    /// this is not an error, the caller serves the model unenriched.
    pub fn lookup(&self, model_id: &str, provider_type: Option<&str>) -> Option<ModelMetadata> {
        let guard = self.index.read().unwrap();
        let index = guard.as_ref()?;
        self.resolve(index, model_id, provider_type, 0)
    }

    fn resolve(
        &self,
        index: &Index,
        model_id: &str,
        provider_type: Option<&str>,
        depth: u8,
    ) -> Option<ModelMetadata> {
        // Guard against a reverse-alias cycle in malformed registry data.
        if depth > 4 {
            return None;
        }

        if let Some(provider_type) = provider_type {
            let composite = format!("{provider_type}/{model_id}");
            if let Some(entry) = index.list.provider_models.get(&composite) {
                let base = entry
                    .model_ref
                    .as_ref()
                    .and_then(|r| index.list.models.get(r));
                return Some(merge(base, Some(entry)));
            }
        }

        if let Some(base) = index.list.models.get(model_id) {
            return Some(merge(Some(base), None));
        }

        if let Some(provider_type) = provider_type {
            let alias_key = format!("{provider_type}/{model_id}");
            if let Some(canonical) = index.reverse_alias.get(&alias_key) {
                if let Some((canonical_provider, canonical_model)) = canonical.split_once('/') {
                    return self.resolve(index, canonical_model, Some(canonical_provider), depth + 1);
                }
            }
        }

        None
    }
}

fn merge(base: Option<&RegistryModel>, over: Option<&RegistryProviderModel>) -> ModelMetadata {
    let mut metadata = ModelMetadata::default();

    if let Some(base) = base {
        metadata.display_name = base.display_name.clone();
        metadata.family = base.family.clone();
        metadata.modes = base.modes.clone();
        metadata.categories = categories_for(&base.modes);
        metadata.tags = base.tags.clone();
        metadata.context_window = base.context_window;
        metadata.max_output_tokens = base.max_output_tokens;
        metadata.capabilities = base.capabilities.clone();
        metadata.pricing = base.pricing.clone().map(Pricing::from);
    }

    if let Some(over) = over {
        if over.context_window.is_some() {
            metadata.context_window = over.context_window;
        }
        if over.max_output_tokens.is_some() {
            metadata.max_output_tokens = over.max_output_tokens;
        }
        for (k, v) in &over.capabilities {
            metadata.capabilities.insert(k.clone(), *v);
        }
        if let Some(pricing) = &over.pricing {
            metadata.pricing = Some(Pricing::from(pricing.clone()));
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_list() -> ModelList {
        let mut models = HashMap::new();
        models.insert(
            "gpt-4o".to_string(),
            RegistryModel {
                display_name: Some("GPT-4o".to_string()),
                family: Some("gpt-4".to_string()),
                modes: vec!["text_generation".to_string(), "image".to_string()],
                context_window: Some(128_000),
                max_output_tokens: Some(4096),
                pricing: Some(RegistryPricing {
                    input_per_mtok: Some(2.5),
                    output_per_mtok: Some(10.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let mut provider_models = HashMap::new();
        provider_models.insert(
            "openai/gpt-4o".to_string(),
            RegistryProviderModel {
                model_ref: Some("gpt-4o".to_string()),
                context_window: Some(200_000),
                ..Default::default()
            },
        );
        provider_models.insert(
            "azure/gpt4o-deployment".to_string(),
            RegistryProviderModel {
                model_ref: Some("gpt-4o".to_string()),
                custom_model_id: Some("gpt-4o".to_string()),
                ..Default::default()
            },
        );

        ModelList {
            version: 1,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            providers: serde_json::Value::Null,
            models,
            provider_models,
        }
    }

    fn index_for(list: ModelList) -> Index {
        let reverse_alias = build_reverse_alias(&list);
        Index { list, reverse_alias }
    }

    #[test]
    fn resolves_via_composite_key_and_overrides_context_window() {
        let index = index_for(sample_list());
        let registry = MetadataRegistry::new("http://example.invalid").unwrap();
        let metadata = registry
            .resolve(&index, "gpt-4o", Some("openai"), 0)
            .unwrap();
        assert_eq!(metadata.context_window, Some(200_000));
        assert_eq!(metadata.display_name.as_deref(), Some("GPT-4o"));
    }

    #[test]
    fn resolves_via_direct_model_lookup_when_no_composite_entry() {
        let index = index_for(sample_list());
        let registry = MetadataRegistry::new("http://example.invalid").unwrap();
        let metadata = registry.resolve(&index, "gpt-4o", Some("ollama"), 0).unwrap();
        assert_eq!(metadata.context_window, Some(128_000));
    }

    #[test]
    fn reverse_alias_redirects_unknown_direct_id() {
        let mut list = sample_list();
        list.models.remove("gpt-4o");
        list.models.insert(
            "gpt-4o-canonical".to_string(),
            RegistryModel {
                display_name: Some("GPT-4o".to_string()),
                ..Default::default()
            },
        );
        list.provider_models.insert(
            "azure/gpt4o-deployment".to_string(),
            RegistryProviderModel {
                model_ref: Some("gpt-4o-canonical".to_string()),
                custom_model_id: Some("gpt-4o-actual-id".to_string()),
                ..Default::default()
            },
        );
        let index = index_for(list);
        let registry = MetadataRegistry::new("http://example.invalid").unwrap();
        let metadata = registry
            .resolve(&index, "gpt-4o-actual-id", Some("azure"), 0)
            .unwrap();
        assert_eq!(metadata.display_name.as_deref(), Some("GPT-4o"));
    }

    #[test]
    fn no_match_returns_none() {
        let index = index_for(sample_list());
        let registry = MetadataRegistry::new("http://example.invalid").unwrap();
        assert!(registry.resolve(&index, "unknown-model", Some("openai"), 0).is_none());
    }

    #[test]
    fn categories_for_dedupes_and_skips_unknown_modes() {
        let modes = vec![
            "text_generation".to_string(),
            "unknown_mode".to_string(),
            "text_generation".to_string(),
            "embedding".to_string(),
        ];
        let categories = categories_for(&modes);
        assert_eq!(
            categories,
            vec![ModelCategory::TextGeneration, ModelCategory::Embedding]
        );
    }
}
