//! # Guardrails Pipeline
//!
//! An ordered list of guardrails that transform a neutral `Message`
//! sequence before a request is dispatched to a provider. Guardrails
//! sharing an `order` value form a group; groups run sequentially from
//! lowest to highest order, and the output of group *i* feeds group *i+1*.
//! Within a group of size one the guardrail runs inline; within a group of
//! size two or more every guardrail in the group runs concurrently on the
//! exact same input, and the group's output is whichever guardrail was
//! registered last (last-write-wins over the combined list).
//!
//! Concrete request shapes (chat, responses) are adapted to and from this
//! neutral list by [`adapt`] / the reassembly helpers; the pipeline itself
//! never sees a `ChatRequest` or `ResponsesRequest` directly.

pub mod pii;
pub mod system_prompt;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{Message, Role};
use pii::TokenMap;

/// Per-request state threaded through a single `Pipeline::run` call. A
/// fresh, empty token map is created for every request so that tokens never
/// leak or collide across requests (§3 — token maps are request-scoped).
/// `model` is the request's target model, which guardrails that scope
/// themselves by model (e.g. the PII anonymizer's allowlist, §4.J) consult.
#[derive(Clone)]
pub struct GuardrailContext {
    pub token_map: Arc<Mutex<TokenMap>>,
    pub model: String,
}

impl GuardrailContext {
    pub fn new() -> Self {
        Self {
            token_map: Arc::new(Mutex::new(TokenMap::default())),
            model: String::new(),
        }
    }

    /// Same as [`GuardrailContext::new`], but scoped to the given model.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::new()
        }
    }
}

impl Default for GuardrailContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A transformer from one message list to another. May reject the whole
/// pipeline by returning an error.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(
        &self,
        messages: Vec<Message>,
        ctx: &GuardrailContext,
    ) -> Result<Vec<Message>, GatewayError>;
}

struct Entry {
    guardrail: Box<dyn Guardrail>,
    order: i32,
}

/// Ordered, grouped list of guardrails. Built once at startup and treated
/// as immutable afterward; entries are only ever appended during
/// construction via [`Pipeline::add`].
#[derive(Default)]
pub struct Pipeline {
    entries: Vec<Entry>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers a guardrail at the given order. Registration order among
    /// guardrails sharing the same order is preserved and is what decides
    /// "last-registered" for a parallel group's last-write-wins output.
    pub fn add(mut self, order: i32, guardrail: impl Guardrail + 'static) -> Self {
        self.entries.push(Entry {
            guardrail: Box::new(guardrail),
            order,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every group in ascending order, feeding each group's output
    /// into the next, against a fresh per-request [`GuardrailContext`].
    pub async fn run(&self, messages: Vec<Message>) -> Result<Vec<Message>, GatewayError> {
        let ctx = GuardrailContext::new();
        self.run_with_context(messages, &ctx).await
    }

    /// Same as [`Pipeline::run`], but against a caller-supplied context —
    /// used when the caller needs to inspect the token map the PII
    /// guardrail populated afterward (e.g. to de-anonymize the response).
    pub async fn run_with_context(
        &self,
        mut messages: Vec<Message>,
        ctx: &GuardrailContext,
    ) -> Result<Vec<Message>, GatewayError> {
        for group in self.groups() {
            messages = self.run_group(group, messages, ctx).await?;
        }
        Ok(messages)
    }

    /// Stable-sorts entries by `order` and returns index ranges that share
    /// an order value, in ascending order.
    fn groups(&self) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.entries.len()).collect();
        indices.sort_by_key(|&i| self.entries[i].order);

        let mut groups: Vec<Vec<usize>> = Vec::new();
        for idx in indices {
            match groups.last_mut() {
                Some(last) if self.entries[*last.last().unwrap()].order == self.entries[idx].order => {
                    last.push(idx);
                }
                _ => groups.push(vec![idx]),
            }
        }
        groups
    }

    async fn run_group(
        &self,
        group: Vec<usize>,
        input: Vec<Message>,
        ctx: &GuardrailContext,
    ) -> Result<Vec<Message>, GatewayError> {
        if group.len() == 1 {
            return self.entries[group[0]].guardrail.apply(input, ctx).await;
        }

        let futures = group
            .iter()
            .map(|&idx| self.entries[idx].guardrail.apply(input.clone(), ctx));
        let results = futures::future::join_all(futures).await;

        // Last-registered guardrail in the group wins; any error aborts
        // the whole group (and thus the pipeline).
        let mut output = None;
        for result in results {
            output = Some(result?);
        }
        Ok(output.expect("group is non-empty"))
    }
}

/// Converts a chat request's message list into the pipeline's neutral
/// shape. Chat already uses `Message`, so this is the identity.
pub fn from_chat_messages(messages: Vec<Message>) -> Vec<Message> {
    messages
}

pub fn to_chat_messages(messages: Vec<Message>) -> Vec<Message> {
    messages
}

/// Converts a responses-style `instructions` string into a neutral message
/// list: one system message (if instructions is non-empty) prepended to
/// the caller-supplied messages already extracted from `input`.
pub fn from_responses(instructions: Option<&str>, mut input_messages: Vec<Message>) -> Vec<Message> {
    if let Some(instructions) = instructions {
        if !instructions.is_empty() {
            let mut out = vec![Message::system(instructions)];
            out.append(&mut input_messages);
            return out;
        }
    }
    input_messages
}

/// Splits a pipeline-processed message list back into `(instructions,
/// non_system_messages)`: every system-role message's content is
/// concatenated with `"\n"` to reassemble `instructions`; everything else
/// passes through unchanged and in order.
pub fn to_responses(messages: Vec<Message>) -> (Option<String>, Vec<Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        if message.role.is_system() {
            system_parts.push(message.content);
        } else {
            rest.push(message);
        }
    }
    let instructions = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (instructions, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Replace {
        name: &'static str,
        content: String,
    }

    #[async_trait]
    impl Guardrail for Replace {
        fn name(&self) -> &str {
            self.name
        }

        async fn apply(
            &self,
            _messages: Vec<Message>,
            _ctx: &GuardrailContext,
        ) -> Result<Vec<Message>, GatewayError> {
            Ok(vec![Message::user(self.content.clone())])
        }
    }

    struct Append {
        name: &'static str,
        content: String,
    }

    #[async_trait]
    impl Guardrail for Append {
        fn name(&self) -> &str {
            self.name
        }

        async fn apply(
            &self,
            mut messages: Vec<Message>,
            _ctx: &GuardrailContext,
        ) -> Result<Vec<Message>, GatewayError> {
            messages.push(Message::system(self.content.clone()));
            Ok(messages)
        }
    }

    struct Failing;

    #[async_trait]
    impl Guardrail for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn apply(
            &self,
            _messages: Vec<Message>,
            _ctx: &GuardrailContext,
        ) -> Result<Vec<Message>, GatewayError> {
            Err(GatewayError::invalid_request("guardrail rejected"))
        }
    }

    #[tokio::test]
    async fn groups_execute_in_ascending_order() {
        let pipeline = Pipeline::new()
            .add(1, Append { name: "b", content: "B".into() })
            .add(0, Append { name: "a", content: "A".into() });

        let out = pipeline.run(vec![Message::user("hi")]).await.unwrap();
        // order=0 (Append "A") runs before order=1 (Append "B").
        assert_eq!(out[1].content, "A");
        assert_eq!(out[2].content, "B");
    }

    #[tokio::test]
    async fn parallel_group_last_registered_wins() {
        // S4: gA and gB share order=0 and each replace the input with a
        // different single message; gC at order=1 appends a system
        // message. Final output equals gC(gB(input)).
        let pipeline = Pipeline::new()
            .add(0, Replace { name: "gA", content: "from-a".into() })
            .add(0, Replace { name: "gB", content: "from-b".into() })
            .add(1, Append { name: "gC", content: "tag".into() });

        let out = pipeline.run(vec![Message::user("original")]).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "from-b");
        assert_eq!(out[1].content, "tag");
    }

    #[tokio::test]
    async fn parallel_group_members_all_see_same_input() {
        let seen_lengths = Arc::new(AtomicU32::new(0));

        struct RecordLen {
            counter: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Guardrail for RecordLen {
            fn name(&self) -> &str {
                "record-len"
            }

            async fn apply(
                &self,
                messages: Vec<Message>,
                _ctx: &GuardrailContext,
            ) -> Result<Vec<Message>, GatewayError> {
                self.counter.store(messages.len() as u32, Ordering::SeqCst);
                Ok(messages)
            }
        }

        let pipeline = Pipeline::new()
            .add(0, RecordLen { counter: seen_lengths.clone() })
            .add(0, Replace { name: "gB", content: "x".into() });

        let input = vec![Message::user("a"), Message::user("b"), Message::user("c")];
        pipeline.run(input).await.unwrap();
        assert_eq!(seen_lengths.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn group_error_aborts_pipeline() {
        let pipeline = Pipeline::new()
            .add(0, Failing)
            .add(0, Append { name: "never-seen", content: "x".into() });

        let err = pipeline.run(vec![Message::user("hi")]).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn single_member_group_runs_inline() {
        let pipeline = Pipeline::new().add(0, Append { name: "only", content: "tag".into() });
        let out = pipeline.run(vec![Message::user("hi")]).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn responses_round_trip_concatenates_system_messages_with_newline() {
        let messages = from_responses(Some("be nice"), vec![Message::user("hi")]);
        assert_eq!(messages[0].role, Role::System);

        let with_extra_system = vec![
            Message::system("be nice"),
            Message::user("hi"),
            Message::system("also this"),
        ];
        let (instructions, rest) = to_responses(with_extra_system);
        assert_eq!(instructions.as_deref(), Some("be nice\nalso this"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn empty_instructions_produce_no_system_message() {
        let messages = from_responses(Some(""), vec![Message::user("hi")]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
