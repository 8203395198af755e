//! System-prompt guardrail: inject, override, or decorate the leading
//! system message (or, for Responses requests handled outside the
//! pipeline, the `instructions` string).

use async_trait::async_trait;

use super::{Guardrail, GuardrailContext};
use crate::error::GatewayError;
use crate::models::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Prepend `content` as a system message only if none exists yet.
    Inject,
    /// Remove every existing system message and prepend a fresh one.
    Override,
    /// Prefix the first system message's content with `content + "\n"`;
    /// later system messages are untouched. No system message behaves
    /// like `Inject`.
    Decorator,
}

pub struct SystemPromptGuardrail {
    mode: Mode,
    content: String,
}

impl SystemPromptGuardrail {
    pub fn new(mode: Mode, content: impl Into<String>) -> Result<Self, GatewayError> {
        let content = content.into();
        if content.is_empty() {
            return Err(GatewayError::invalid_request(
                "system prompt guardrail content must not be empty",
            ));
        }
        Ok(Self { mode, content })
    }

    /// Applies the configured mode directly to a message list, without
    /// going through the pipeline's `Guardrail` trait. Used both by the
    /// pipeline adapter and by direct Responses-request handling.
    pub fn transform(&self, messages: &[Message]) -> Vec<Message> {
        let mut messages = messages.to_vec();
        match self.mode {
            Mode::Inject => {
                if !messages.iter().any(|m| m.role.is_system()) {
                    messages.insert(0, Message::system(self.content.clone()));
                }
            }
            Mode::Override => {
                messages.retain(|m| !m.role.is_system());
                messages.insert(0, Message::system(self.content.clone()));
            }
            Mode::Decorator => {
                if let Some(first_system) = messages.iter_mut().find(|m| m.role.is_system()) {
                    first_system.content = format!("{}\n{}", self.content, first_system.content);
                } else {
                    messages.insert(0, Message::system(self.content.clone()));
                }
            }
        }
        messages
    }

    /// Applies the same semantics directly to a Responses request's
    /// `instructions` string, treating an absent or empty instructions as
    /// "no system message present" (§4.I).
    pub fn transform_instructions(&self, instructions: Option<&str>) -> String {
        let instructions = instructions.unwrap_or("");
        match self.mode {
            Mode::Inject => {
                if instructions.is_empty() {
                    self.content.clone()
                } else {
                    instructions.to_string()
                }
            }
            Mode::Override => self.content.clone(),
            Mode::Decorator => {
                if instructions.is_empty() {
                    self.content.clone()
                } else {
                    format!("{}\n{}", self.content, instructions)
                }
            }
        }
    }
}

#[async_trait]
impl Guardrail for SystemPromptGuardrail {
    fn name(&self) -> &str {
        "system_prompt"
    }

    async fn apply(
        &self,
        messages: Vec<Message>,
        _ctx: &GuardrailContext,
    ) -> Result<Vec<Message>, GatewayError> {
        Ok(self.transform(&messages))
    }
}
