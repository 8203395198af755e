//! # Configuration
//!
//! Loads and validates the gateway's TOML configuration: the HTTP server,
//! the set of upstream providers to register, the guardrails pipeline, and
//! the model metadata registry. Environment variables layer on top of the
//! file so deployments can override secrets (API keys) without baking them
//! into a checked-in file.
//!
//! ## Configuration file example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! timeout = "30s"
//! max_body_size = 10485760
//!
//! [providers.openai]
//! type = "openai_compatible"
//! base_url = "https://api.openai.com/v1"
//! api_key = "your-openai-key"
//! known_models = ["gpt-4o", "gpt-4o-mini"]
//!
//! [providers.local]
//! type = "ollama"
//! base_url = "http://localhost:11434"
//!
//! [guardrails.system_prompt]
//! mode = "inject"
//! content = "Be concise."
//!
//! [guardrails.pii]
//! enabled = true
//! strategy = "mask"
//! ```

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "ultrafast_models_sdk::common::duration_serde")]
    pub timeout: Duration,
    pub max_body_size: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// One configured upstream. The `type` tag selects which adapter
/// (`crate::providers::{openai_compatible, ollama, anthropic}` in the SDK
/// crate) the value is turned into by `server::build_provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenAiCompatible {
        base_url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default = "default_true")]
        circuit_breaker: bool,
        #[serde(with = "ultrafast_models_sdk::common::duration_serde", default = "default_request_timeout")]
        request_timeout: Duration,
        #[serde(default)]
        known_models: Vec<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_base_url")]
        base_url: String,
        #[serde(with = "ultrafast_models_sdk::common::duration_serde", default = "default_ollama_timeout")]
        request_timeout: Duration,
        #[serde(default)]
        known_models: Vec<String>,
    },
    Anthropic {
        #[serde(default = "default_anthropic_base_url")]
        base_url: String,
        api_key: String,
        #[serde(with = "ultrafast_models_sdk::common::duration_serde", default = "default_anthropic_timeout")]
        request_timeout: Duration,
        #[serde(default)]
        known_models: Vec<String>,
    },
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_timeout() -> Duration {
    Duration::from_secs(120)
}

/// External `ModelList` registry (§6), fetched once at startup to enrich
/// `GET /v1/models` entries. Absent means models are served unenriched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    pub system_prompt: Option<SystemPromptConfig>,
    pub pii: Option<PiiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPromptConfig {
    /// One of `"inject"`, `"override"`, `"decorator"`.
    pub mode: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub detectors: PiiDetectorsConfig,
    /// One of `"token"`, `"hash"`, `"mask"`.
    #[serde(default = "default_pii_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub model_allowlist: Vec<String>,
    /// Whether inline chat/responses items inside a batch body are also
    /// anonymized (§4.K leaves this off by default).
    #[serde(default)]
    pub guard_inline_batch_items: bool,
}

fn default_pii_strategy() -> String {
    "mask".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiDetectorsConfig {
    #[serde(default = "default_true")]
    pub email: bool,
    #[serde(default = "default_true")]
    pub phone: bool,
    #[serde(default = "default_true")]
    pub ssn: bool,
    #[serde(default = "default_true")]
    pub cc: bool,
    #[serde(default = "default_true")]
    pub ip: bool,
}

impl Default for PiiDetectorsConfig {
    fn default() -> Self {
        Self {
            email: true,
            phone: true,
            ssn: true,
            cc: true,
            ip: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: HashMap::new(),
            metadata: MetadataConfig::default(),
            guardrails: GuardrailsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, applies environment
    /// overrides, then validates the result.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file '{path}': {e}"))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides select fields from the process environment. Only the
    /// values an operator would reasonably need to inject at deploy time
    /// (host/port/timeout, log level, and per-provider API keys) are
    /// covered; structural config (which providers exist, guardrail
    /// composition) stays in the file.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("GATEWAY_PORT") {
            self.server.port = port.parse().map_err(|e| anyhow::anyhow!("invalid GATEWAY_PORT: {e}"))?;
        }
        if let Ok(timeout) = env::var("GATEWAY_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout)?;
        }
        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        for (name, provider) in self.providers.iter_mut() {
            let env_key = format!("{}_API_KEY", name.to_uppercase().replace('-', "_"));
            if let Ok(key) = env::var(&env_key) {
                match provider {
                    ProviderConfig::OpenAiCompatible { api_key, .. } => *api_key = Some(key),
                    ProviderConfig::Anthropic { api_key, .. } => *api_key = key,
                    ProviderConfig::Ollama { .. } => {}
                }
            }
        }

        Ok(())
    }

    /// Validates the configuration, returning the first violation found.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_providers()?;
        self.validate_guardrails()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.server.max_body_size == 0 {
            anyhow::bail!("server.max_body_size must be non-zero");
        }
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        for (name, provider) in &self.providers {
            if let ProviderConfig::OpenAiCompatible { base_url, .. }
            | ProviderConfig::Ollama { base_url, .. }
            | ProviderConfig::Anthropic { base_url, .. } = provider
            {
                if base_url.trim().is_empty() {
                    anyhow::bail!("provider '{name}' has an empty base_url");
                }
            }
            if let ProviderConfig::Anthropic { api_key, .. } = provider {
                if api_key.trim().is_empty() {
                    anyhow::bail!("provider '{name}' (anthropic) requires an api_key");
                }
            }
        }
        Ok(())
    }

    fn validate_guardrails(&self) -> anyhow::Result<()> {
        if let Some(system_prompt) = &self.guardrails.system_prompt {
            match system_prompt.mode.as_str() {
                "inject" | "override" | "decorator" => {}
                other => anyhow::bail!("guardrails.system_prompt.mode '{other}' is not one of inject/override/decorator"),
            }
            if system_prompt.content.trim().is_empty() {
                anyhow::bail!("guardrails.system_prompt.content must not be empty");
            }
        }
        if let Some(pii) = &self.guardrails.pii {
            match pii.strategy.as_str() {
                "token" | "hash" | "mask" => {}
                other => anyhow::bail!("guardrails.pii.strategy '{other}' is not one of token/hash/mask"),
            }
        }
        Ok(())
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    ultrafast_models_sdk::common::duration_serde::parse_duration(s).map_err(|e| anyhow::anyhow!(e))
}
