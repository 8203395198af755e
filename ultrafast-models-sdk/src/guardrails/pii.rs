//! PII anonymizer: detects email/phone/SSN/credit-card/IPv4 values,
//! reversibly tokenizes them into `[TYPE_<id>]` placeholders, and restores
//! them on the way back — both for a complete response body and for a
//! byte stream whose chunk boundaries may land in the middle of a token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::{Guardrail, GuardrailContext};
use crate::error::GatewayError;
use crate::models::{
    Message, ResponsesContent, ResponsesContentPart, ResponsesInput, ResponsesInputItem, StreamChunk,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
    Cc,
    Ip,
}

impl PiiKind {
    fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Phone => "PHONE",
            PiiKind::Ssn => "SSN",
            PiiKind::Cc => "CC",
            PiiKind::Ip => "IP",
        }
    }
}

/// Detector ordering is fixed and load-bearing: it determines the
/// insertion order of first-seen values within one `tokenize` pass (§4.J
/// invariant — "tokenization is order-stable across detector ordering").
const DETECTOR_ORDER: [PiiKind; 5] = [
    PiiKind::Email,
    PiiKind::Phone,
    PiiKind::Ssn,
    PiiKind::Cc,
    PiiKind::Ip,
];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b").unwrap()
});

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}[- ]?\d{2}[- ]?\d{4}\b").unwrap());

static CC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){15}\d\b").unwrap());

static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap()
});

fn regex_for(kind: PiiKind) -> &'static Regex {
    match kind {
        PiiKind::Email => &EMAIL_RE,
        PiiKind::Phone => &PHONE_RE,
        PiiKind::Ssn => &SSN_RE,
        PiiKind::Cc => &CC_RE,
        PiiKind::Ip => &IP_RE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStrategy {
    /// Monotonically increasing integer id rendered as hex.
    Token,
    /// First 8 hex chars of SHA-256(value).
    Hash,
    /// `[TYPE_***]` for `len <= 2`, else `[TYPE_<first>***<last>]`.
    Mask,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorConfig {
    pub email: bool,
    pub phone: bool,
    pub ssn: bool,
    pub cc: bool,
    pub ip: bool,
}

impl DetectorConfig {
    pub fn all_enabled() -> Self {
        Self {
            email: true,
            phone: true,
            ssn: true,
            cc: true,
            ip: true,
        }
    }

    fn enabled(&self, kind: PiiKind) -> bool {
        match kind {
            PiiKind::Email => self.email,
            PiiKind::Phone => self.phone,
            PiiKind::Ssn => self.ssn,
            PiiKind::Cc => self.cc,
            PiiKind::Ip => self.ip,
        }
    }
}

/// Per-request mapping from placeholder token to original value, in
/// insertion (first-detection) order.
#[derive(Debug, Clone, Default)]
pub struct TokenMap {
    forward: HashMap<String, String>,
    order: Vec<String>,
}

impl TokenMap {
    pub fn insert(&mut self, token: String, original: String) {
        if !self.forward.contains_key(&token) {
            self.order.push(token.clone());
        }
        self.forward.insert(token, original);
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.forward.get(token).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn tokens_in_insertion_order(&self) -> &[String] {
        &self.order
    }

    pub fn max_token_len(&self) -> usize {
        self.order.iter().map(|t| t.len()).max().unwrap_or(0)
    }
}

/// Generates the monotonic counter used by the `token` strategy. Process
/// scoped by default; a fresh instance per request gives request scoping.
#[derive(Default)]
pub struct TokenCounter(AtomicU64);

impl TokenCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

pub struct Anonymizer {
    detectors: DetectorConfig,
    strategy: TokenStrategy,
    counter: Arc<TokenCounter>,
    model_allowlist: Vec<String>,
}

impl Anonymizer {
    pub fn new(detectors: DetectorConfig, strategy: TokenStrategy) -> Self {
        Self {
            detectors,
            strategy,
            counter: Arc::new(TokenCounter::new()),
            model_allowlist: Vec::new(),
        }
    }

    /// A non-empty allowlist scopes anonymization to just those models;
    /// an empty one (the default) anonymizes every model.
    pub fn with_model_allowlist(mut self, models: Vec<String>) -> Self {
        self.model_allowlist = models;
        self
    }

    pub fn applies_to_model(&self, model: &str) -> bool {
        self.model_allowlist.is_empty() || self.model_allowlist.iter().any(|m| m == model)
    }

    fn token_for(&self, kind: PiiKind, value: &str) -> String {
        match self.strategy {
            TokenStrategy::Token => {
                let id = self.counter.next();
                format!("[{}_{:x}]", kind.as_str(), id)
            }
            TokenStrategy::Hash => {
                let mut hasher = Sha256::new();
                hasher.update(value.as_bytes());
                let digest = hasher.finalize();
                let hex = hex_encode(&digest[..4]);
                format!("[{}_{}]", kind.as_str(), hex)
            }
            TokenStrategy::Mask => {
                let masked = if value.chars().count() <= 2 {
                    "***".to_string()
                } else {
                    let chars: Vec<char> = value.chars().collect();
                    format!("{}***{}", chars[0], chars[chars.len() - 1])
                };
                format!("[{}_{}]", kind.as_str(), masked)
            }
        }
    }

    /// Finds every occurrence of every enabled PII kind in `text`, in
    /// detector order, and replaces them with (stable, per-pass) tokens.
    /// The same original value always maps to the same token within one
    /// call.
    pub fn tokenize(&self, text: &str, map: &mut TokenMap) -> String {
        let mut value_to_token: HashMap<String, String> = HashMap::new();
        // Re-seed from the map so repeated calls within one request (e.g.
        // across several message fields) keep reusing the same token for
        // a value already seen earlier in the request.
        for token in map.tokens_in_insertion_order() {
            if let Some(original) = map.get(token) {
                value_to_token.entry(original.to_string()).or_insert_with(|| token.clone());
            }
        }

        #[derive(Clone)]
        struct Match {
            start: usize,
            end: usize,
            kind: PiiKind,
        }

        let mut matches = Vec::new();
        for kind in DETECTOR_ORDER {
            if !self.detectors.enabled(kind) {
                continue;
            }
            for m in regex_for(kind).find_iter(text) {
                matches.push(Match {
                    start: m.start(),
                    end: m.end(),
                    kind,
                });
            }
        }
        matches.sort_by_key(|m| m.start);

        // Drop overlapping matches from lower-priority detectors (earlier
        // detector order wins any overlap), keeping detector-order stable.
        let mut kept: Vec<Match> = Vec::new();
        for m in matches {
            if kept.last().map(|last| m.start < last.end).unwrap_or(false) {
                continue;
            }
            kept.push(m);
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in kept {
            out.push_str(&text[cursor..m.start]);
            let value = &text[m.start..m.end];
            let token = value_to_token
                .entry(value.to_string())
                .or_insert_with(|| self.token_for(m.kind, value))
                .clone();
            map.insert(token.clone(), value.to_string());
            out.push_str(&token);
            cursor = m.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Restores every token in `text` back to its original value.
    pub fn deanonymize_text(&self, text: &str, map: &TokenMap) -> String {
        deanonymize_text(text, map)
    }

    /// Anonymizes every chat message's content in place (returns a fresh
    /// copy; the input is not mutated).
    pub fn anonymize_chat_messages(&self, messages: &[Message], map: &mut TokenMap) -> Vec<Message> {
        messages
            .iter()
            .map(|m| {
                let mut m = m.clone();
                m.content = self.tokenize(&m.content, map);
                m
            })
            .collect()
    }

    pub fn deanonymize_chat_messages(&self, messages: &[Message], map: &TokenMap) -> Vec<Message> {
        deanonymize_messages(messages, map)
    }

    /// Anonymizes a Responses request's `instructions` and polymorphic
    /// `input`, deep-cloning as it goes.
    pub fn anonymize_instructions(&self, instructions: &str, map: &mut TokenMap) -> String {
        self.tokenize(instructions, map)
    }

    pub fn anonymize_input(&self, input: &ResponsesInput, map: &mut TokenMap) -> ResponsesInput {
        match input {
            ResponsesInput::Text(text) => ResponsesInput::Text(self.tokenize(text, map)),
            ResponsesInput::Items(items) => ResponsesInput::Items(
                items
                    .iter()
                    .map(|item| self.anonymize_input_item(item, map))
                    .collect(),
            ),
        }
    }

    fn anonymize_input_item(&self, item: &ResponsesInputItem, map: &mut TokenMap) -> ResponsesInputItem {
        let content = match &item.content {
            ResponsesContent::Text(text) => ResponsesContent::Text(self.tokenize(text, map)),
            ResponsesContent::Parts(parts) => ResponsesContent::Parts(
                parts
                    .iter()
                    .map(|part| ResponsesContentPart {
                        part_type: part.part_type.clone(),
                        text: part.text.as_ref().map(|t| self.tokenize(t, map)),
                    })
                    .collect(),
            ),
        };
        ResponsesInputItem {
            role: item.role,
            content,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Restores every token in `text` back to its original value. Free
/// function (doesn't need an `Anonymizer` instance, only the map produced
/// by one) so callers that only have the token map — like the guarded
/// wrapper de-anonymizing a response — don't need to hold an `Anonymizer`.
pub fn deanonymize_text(text: &str, map: &TokenMap) -> String {
    let mut out = text.to_string();
    for token in map.tokens_in_insertion_order() {
        if let Some(original) = map.get(token) {
            out = out.replace(token.as_str(), original);
        }
    }
    out
}

pub fn deanonymize_messages(messages: &[Message], map: &TokenMap) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            let mut m = m.clone();
            m.content = deanonymize_text(&m.content, map);
            m
        })
        .collect()
}

/// Adapts the anonymizer to the pipeline's `Guardrail` trait: anonymizes
/// every message's content into the per-request token map carried on the
/// `GuardrailContext`. The guarded wrapper reads that same map back out
/// after the pipeline finishes to de-anonymize the eventual response
/// (§4.K) — a fresh map per request means tokens never leak or collide
/// across requests (§3).
pub struct AnonymizeGuardrail {
    pub anonymizer: Arc<Anonymizer>,
}

impl AnonymizeGuardrail {
    pub fn new(anonymizer: Arc<Anonymizer>) -> Self {
        Self { anonymizer }
    }
}

#[async_trait]
impl Guardrail for AnonymizeGuardrail {
    fn name(&self) -> &str {
        "pii_anonymizer"
    }

    async fn apply(&self, messages: Vec<Message>, ctx: &GuardrailContext) -> Result<Vec<Message>, GatewayError> {
        if !self.anonymizer.applies_to_model(&ctx.model) {
            return Ok(messages);
        }
        let mut map = ctx.token_map.lock().unwrap();
        Ok(self.anonymizer.anonymize_chat_messages(&messages, &mut map))
    }
}

/// Wraps a byte stream, replacing PII tokens as they appear while never
/// reordering bytes. Tail bytes that might contain the start of an
/// unclosed token (`[` with no matching `]` yet) are withheld from the
/// current read and prefixed onto the next chunk; on stream end, any
/// withheld remainder is flushed as-is (no more matches are possible).
pub struct DeanonymizingStream<S> {
    inner: S,
    map: Arc<TokenMap>,
    buffer: BytesMut,
    done: bool,
}

impl<S> DeanonymizingStream<S> {
    pub fn new(inner: S, map: Arc<TokenMap>) -> Self {
        Self {
            inner,
            map,
            buffer: BytesMut::new(),
            done: false,
        }
    }
}

impl<S> Stream for DeanonymizingStream<S>
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Unpin,
{
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use futures::StreamExt;
        use std::task::Poll;

        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match std::pin::Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    let (safe, held) = split_safe_suffix(&this.buffer, this.map.max_token_len());
                    if safe.is_empty() && held.len() == this.buffer.len() {
                        // Not enough to emit anything yet; poll again for more input.
                        continue;
                    }
                    let replaced = replace_tokens(&safe, &this.map);
                    this.buffer = BytesMut::from(&held[..]);
                    return Poll::Ready(Some(Ok(Bytes::from(replaced))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    let remainder = replace_tokens(&this.buffer, &this.map);
                    this.buffer.clear();
                    return Poll::Ready(Some(Ok(Bytes::from(remainder))));
                }
            }
        }
    }
}

/// De-anonymizes a stream of already-decoded chat stream chunks, one
/// per choice index. Unlike [`DeanonymizingStream`] (which wraps raw SSE
/// bytes), this crate's providers already parse each chunk into a
/// `StreamChunk` before the guarded wrapper sees it, so the boundary a
/// token can straddle is a chunk's `delta.content` field, not an arbitrary
/// byte offset. The same withhold-the-unclosed-`[`-suffix rule applies,
/// buffered independently per `choices[].index` since providers may
/// stream more than one choice concurrently.
pub struct DeanonymizingChatStream<S> {
    inner: S,
    map: Arc<TokenMap>,
    buffers: HashMap<u32, BytesMut>,
    pending_flush: std::collections::VecDeque<(u32, Vec<u8>)>,
    done: bool,
}

impl<S> DeanonymizingChatStream<S> {
    pub fn new(inner: S, map: Arc<TokenMap>) -> Self {
        Self {
            inner,
            map,
            buffers: HashMap::new(),
            pending_flush: std::collections::VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for DeanonymizingChatStream<S>
where
    S: Stream<Item = Result<StreamChunk, GatewayError>> + Unpin,
{
    type Item = Result<StreamChunk, GatewayError>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        let this = self.get_mut();

        if this.done {
            if let Some((index, remaining)) = this.pending_flush.pop_front() {
                return Poll::Ready(Some(Ok(flush_chunk(index, remaining, &this.map))));
            }
            return Poll::Ready(None);
        }

        match std::pin::Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(Some(Ok(mut chunk))) => {
                for choice in &mut chunk.choices {
                    let Some(content) = choice.delta.content.take() else {
                        continue;
                    };
                    let buffer = this.buffers.entry(choice.index).or_default();
                    buffer.extend_from_slice(content.as_bytes());
                    let (safe, held) = split_safe_suffix(&buffer[..], this.map.max_token_len());
                    *buffer = BytesMut::from(&held[..]);
                    if !safe.is_empty() {
                        let replaced = replace_tokens(&safe, &this.map);
                        choice.delta.content = Some(String::from_utf8_lossy(&replaced).into_owned());
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.done = true;
                this.pending_flush = this
                    .buffers
                    .drain()
                    .filter(|(_, buf)| !buf.is_empty())
                    .map(|(index, buf)| (index, buf.to_vec()))
                    .collect();
                if let Some((index, remaining)) = this.pending_flush.pop_front() {
                    return Poll::Ready(Some(Ok(flush_chunk(index, remaining, &this.map))));
                }
                Poll::Ready(None)
            }
        }
    }
}

/// Builds a synthetic terminal chunk carrying only the de-anonymized
/// remainder withheld from the last real chunk for `index` — there is no
/// more input after which a split token could complete, so whatever is
/// buffered is flushed as-is.
fn flush_chunk(index: u32, remaining: Vec<u8>, map: &TokenMap) -> StreamChunk {
    let replaced = replace_tokens(&remaining, map);
    StreamChunk {
        id: String::new(),
        object: "chat.completion.chunk".to_string(),
        created: 0,
        model: String::new(),
        choices: vec![crate::models::StreamChoice {
            index,
            delta: crate::models::Delta {
                role: None,
                content: Some(String::from_utf8_lossy(&replaced).into_owned()),
            },
            finish_reason: None,
        }],
    }
}

/// Splits `buffer` into `(safe_prefix, held_suffix)`: the suffix is
/// withheld when it contains an unclosed `[` (no `]` after it) within the
/// last `max_token_len` bytes, since that prefix byte range might be the
/// start of a token straddling the chunk boundary.
fn split_safe_suffix(buffer: &[u8], max_token_len: usize) -> (Vec<u8>, Vec<u8>) {
    if max_token_len == 0 {
        return (buffer.to_vec(), Vec::new());
    }
    let scan_from = buffer.len().saturating_sub(max_token_len);
    if let Some(rel_pos) = buffer[scan_from..].iter().rposition(|&b| b == b'[') {
        let open_pos = scan_from + rel_pos;
        if !buffer[open_pos..].contains(&b']') {
            return (buffer[..open_pos].to_vec(), buffer[open_pos..].to_vec());
        }
    }
    (buffer.to_vec(), Vec::new())
}

fn replace_tokens(bytes: &[u8], map: &TokenMap) -> Vec<u8> {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let mut out = text;
    for token in map.tokens_in_insertion_order() {
        if let Some(original) = map.get(token) {
            out = out.replace(token.as_str(), original);
        }
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn anonymizer() -> Anonymizer {
        Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Token)
    }

    #[test]
    fn round_trip_restores_original_text() {
        // S6
        let a = anonymizer();
        let mut map = TokenMap::default();
        let text = "mail test@example.com twice test@example.com";
        let tokenized = a.tokenize(text, &mut map);
        assert!(!tokenized.contains("test@example.com"));
        let restored = a.deanonymize_text(&tokenized, &map);
        assert_eq!(restored, text);
    }

    #[test]
    fn same_value_maps_to_same_token_within_one_pass() {
        let a = anonymizer();
        let mut map = TokenMap::default();
        let tokenized = a.tokenize("a@b.com and a@b.com again", &mut map);
        let tokens: Vec<&str> = tokenized.split_whitespace().filter(|w| w.starts_with('[')).collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], tokens[1]);
    }

    #[test]
    fn disabled_detector_does_not_tokenize_its_kind() {
        let mut detectors = DetectorConfig::all_enabled();
        detectors.email = false;
        let a = Anonymizer::new(detectors, TokenStrategy::Token);
        let mut map = TokenMap::default();
        let out = a.tokenize("contact test@example.com", &mut map);
        assert!(out.contains("test@example.com"));
    }

    #[test]
    fn hash_strategy_is_deterministic_per_value() {
        let a = Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Hash);
        let mut map1 = TokenMap::default();
        let mut map2 = TokenMap::default();
        let out1 = a.tokenize("test@example.com", &mut map1);
        let out2 = a.tokenize("test@example.com", &mut map2);
        assert_eq!(out1, out2);
    }

    #[test]
    fn mask_strategy_short_value_is_fully_masked() {
        let a = Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Mask);
        assert_eq!(a.token_for(PiiKind::Ssn, "12"), "[SSN_***]");
    }

    #[test]
    fn mask_strategy_long_value_keeps_first_and_last_char() {
        let a = Anonymizer::new(DetectorConfig::all_enabled(), TokenStrategy::Mask);
        let token = a.token_for(PiiKind::Email, "test@example.com");
        assert_eq!(token, "[EMAIL_t***m]");
    }

    #[test]
    fn detects_phone_ssn_cc_ip() {
        let a = anonymizer();
        let mut map = TokenMap::default();
        let text = "call 555-123-4567, ssn 123-45-6789, cc 4111111111111111, ip 10.0.0.1";
        let out = a.tokenize(text, &mut map);
        assert!(out.contains("[PHONE_"));
        assert!(out.contains("[SSN_"));
        assert!(out.contains("[CC_"));
        assert!(out.contains("[IP_"));
    }

    #[test]
    fn model_allowlist_scopes_anonymization() {
        let a = anonymizer().with_model_allowlist(vec!["gpt-4o".to_string()]);
        assert!(a.applies_to_model("gpt-4o"));
        assert!(!a.applies_to_model("claude-3"));

        let unscoped = anonymizer();
        assert!(unscoped.applies_to_model("anything"));
    }

    #[tokio::test]
    async fn guardrail_apply_skips_models_outside_the_allowlist() {
        let anonymizer = Arc::new(anonymizer().with_model_allowlist(vec!["gpt-4o".to_string()]));
        let guardrail = AnonymizeGuardrail::new(anonymizer);

        let messages = vec![Message::user("email me at test@example.com")];

        let ctx = GuardrailContext::for_model("claude-3");
        let out = guardrail.apply(messages.clone(), &ctx).await.unwrap();
        assert_eq!(out[0].content, "email me at test@example.com");
        assert!(ctx.token_map.lock().unwrap().is_empty());

        let ctx = GuardrailContext::for_model("gpt-4o");
        let out = guardrail.apply(messages, &ctx).await.unwrap();
        assert!(out[0].content.contains("[EMAIL_"));
    }

    #[tokio::test]
    async fn streaming_deanonymization_handles_token_split_across_chunks() {
        // S7
        let mut map = TokenMap::default();
        map.insert("[EMAIL_1]".to_string(), "test@example.com".to_string());
        let map = Arc::new(map);

        let chunks: Vec<Result<Bytes, GatewayError>> = vec![
            Ok(Bytes::from_static(b"...[EMAI")),
            Ok(Bytes::from_static(b"L_1] done")),
        ];
        let inner = stream::iter(chunks);
        let wrapped = DeanonymizingStream::new(inner, map);

        let collected: Vec<Bytes> = futures::StreamExt::collect::<Vec<_>>(wrapped)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let total: Vec<u8> = collected.into_iter().flat_map(|b| b.to_vec()).collect();
        let total = String::from_utf8(total).unwrap();
        assert_eq!(total, "...test@example.com done");
        assert!(!total.contains("[EMAIL_1]"));
    }

    #[tokio::test]
    async fn streaming_deanonymization_preserves_output_without_tokens() {
        let mut map = TokenMap::default();
        map.insert("[EMAIL_1]".to_string(), "a@b.com".to_string());
        let map = Arc::new(map);

        let chunks: Vec<Result<Bytes, GatewayError>> =
            vec![Ok(Bytes::from_static(b"hello")), Ok(Bytes::from_static(b" world"))];
        let inner = stream::iter(chunks);
        let wrapped = DeanonymizingStream::new(inner, map);
        let collected: Vec<Bytes> = futures::StreamExt::collect::<Vec<_>>(wrapped)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let total: Vec<u8> = collected.into_iter().flat_map(|b| b.to_vec()).collect();
        assert_eq!(String::from_utf8(total).unwrap(), "hello world");
    }

    #[test]
    fn anonymize_chat_messages_does_not_mutate_input() {
        let a = anonymizer();
        let mut map = TokenMap::default();
        let input = vec![Message::user("email me at test@example.com")];
        let original = input.clone();
        let _ = a.anonymize_chat_messages(&input, &mut map);
        assert_eq!(input, original);
    }
}
