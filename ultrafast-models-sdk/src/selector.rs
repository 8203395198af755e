//! Model selector parsing.
//!
//! A `ModelSelector` names which model to call and, optionally, which
//! provider owns it. Callers may spell this as a bare model id, a
//! `provider/model` string, or an explicit `(model, provider)` pair; all
//! three forms normalize to the same selector.

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelector {
    pub model: String,
    pub provider: Option<String>,
}

impl ModelSelector {
    /// Parses `model` (which may itself be `"provider/model"`) together
    /// with an optional explicit `provider`. If both a prefix and an
    /// explicit provider are present they must agree, otherwise this is a
    /// conflict error. `model` must be non-empty after trimming.
    pub fn parse(model: &str, provider: &str) -> Result<Self, GatewayError> {
        let model = model.trim();
        let explicit_provider = provider.trim();

        if model.is_empty() {
            return Err(GatewayError::invalid_request("model must not be empty"));
        }

        if let Some((prefix, rest)) = model.split_once('/') {
            let prefix = prefix.trim();
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(GatewayError::invalid_request("model must not be empty"));
            }
            if !explicit_provider.is_empty() && explicit_provider != prefix {
                return Err(GatewayError::invalid_request(format!(
                    "conflict: model prefix '{prefix}' does not match explicit provider '{explicit_provider}'"
                )));
            }
            return Ok(Self {
                model: rest.to_string(),
                provider: Some(prefix.to_string()),
            });
        }

        let provider = if explicit_provider.is_empty() {
            None
        } else {
            Some(explicit_provider.to_string())
        };

        Ok(Self {
            model: model.to_string(),
            provider,
        })
    }

    /// `provider/model` when a provider is set, else just `model`.
    pub fn qualified(&self) -> String {
        match &self.provider {
            Some(p) => format!("{p}/{}", self.model),
            None => self.model.clone(),
        }
    }
}
