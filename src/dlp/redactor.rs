//! Redaction of sensitive spans
//!
//! Spans are substituted by position, so every occurrence of a repeated
//! value is rewritten independently. When spans from different patterns
//! overlap, the earliest start wins, then the longest span, then registry
//! order; the losing spans are dropped.

use super::patterns::{Pattern, PatternRegistry};
use super::policy::{Action, PolicyResolver};
use super::scanner::{default_context, Scanner, DEFAULT_CONTEXT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroize;

/// Number of hex digits kept from the digest in `hash` style
const HASH_PREFIX_LEN: usize = 8;

/// Transformation applied to a matched span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionStyle {
    /// Replace with `*` (format-preserving) or a `[TYPE_REDACTED]` tag
    #[default]
    Mask,
    /// Delete the span
    Remove,
    /// Replace with a short, stable digest tagged with the type
    Hash,
    /// Replace with an opaque token; the mapping stays in memory
    Tokenize,
}

impl std::str::FromStr for RedactionStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mask" => Ok(Self::Mask),
            "remove" => Ok(Self::Remove),
            "hash" => Ok(Self::Hash),
            "tokenize" => Ok(Self::Tokenize),
            other => Err(format!("unknown redaction style '{}'", other)),
        }
    }
}

/// Options for a single redaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactOptions {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default)]
    pub style: RedactionStyle,
    /// Keep punctuation and length when masking
    #[serde(default)]
    pub preserve_format: bool,
    /// Record raw values in the ledger (trusted callers only)
    #[serde(default)]
    pub include_matches: bool,
}

impl RedactOptions {
    pub fn new(context: impl Into<String>, style: RedactionStyle) -> Self {
        Self {
            context: context.into(),
            style,
            preserve_format: false,
            include_matches: false,
        }
    }

    pub fn preserve_format(mut self, preserve: bool) -> Self {
        self.preserve_format = preserve;
        self
    }

    pub fn include_matches(mut self, include: bool) -> Self {
        self.include_matches = include;
        self
    }
}

impl Default for RedactOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT, RedactionStyle::Mask)
    }
}

/// One substituted span in the redaction ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionEntry {
    #[serde(rename = "type")]
    pub pattern_type: String,
    /// Raw value when requested, otherwise a `[TYPE]` placeholder
    pub original: String,
    pub replacement: String,
    pub action: Action,
}

/// Token → original value map produced by `tokenize`.
///
/// Never serialized; values are zeroized when the map is dropped.
#[derive(Clone, Default)]
pub struct TokenMap {
    tokens: HashMap<String, String>,
}

impl TokenMap {
    pub fn get(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Replace every known token in `text` with its original value
    pub fn restore(&self, text: &str) -> String {
        let mut restored = text.to_string();
        for (token, original) in &self.tokens {
            restored = restored.replace(token.as_str(), original);
        }
        restored
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn insert(&mut self, token: String, original: &str) {
        self.tokens.insert(token, original.to_string());
    }
}

impl std::fmt::Debug for TokenMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMap")
            .field("len", &self.tokens.len())
            .finish()
    }
}

impl Drop for TokenMap {
    fn drop(&mut self) {
        for value in self.tokens.values_mut() {
            value.zeroize();
        }
    }
}

/// Result of redacting a piece of text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionResult {
    /// Sanitized text
    pub text: String,
    /// Ledger of substituted spans, in text order
    pub redactions: Vec<RedactionEntry>,
    pub timestamp: DateTime<Utc>,
    /// In-memory token map (tokenize style only)
    #[serde(skip)]
    pub tokens: TokenMap,
}

impl RedactionResult {
    fn unchanged(text: String) -> Self {
        Self {
            text,
            redactions: Vec::new(),
            timestamp: Utc::now(),
            tokens: TokenMap::default(),
        }
    }

    pub fn has_redactions(&self) -> bool {
        !self.redactions.is_empty()
    }

    pub fn redaction_count(&self) -> usize {
        self.redactions.len()
    }
}

struct Span<'a> {
    start: usize,
    end: usize,
    order: usize,
    pattern: &'a Pattern,
    action: Action,
}

/// Rewrites sensitive spans according to policy and a redaction style
#[derive(Debug, Clone)]
pub struct Redactor {
    scanner: Scanner,
}

impl Redactor {
    /// Create a redactor over an injected registry and policy
    pub fn new(registry: Arc<PatternRegistry>, policy: Arc<PolicyResolver>) -> Self {
        Self {
            scanner: Scanner::new(registry, policy),
        }
    }

    /// Create a redactor sharing a scanner's registry, policy and strict flag
    pub fn from_scanner(scanner: Scanner) -> Self {
        Self { scanner }
    }

    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.scanner = self.scanner.with_strict_mode(strict_mode);
        self
    }

    /// Redact every span whose resolved action is BLOCK or REDACT
    pub fn redact(&self, text: &str, options: &RedactOptions) -> RedactionResult {
        let spans = self.collect_spans(text, &options.context);
        if spans.is_empty() {
            return RedactionResult::unchanged(text.to_string());
        }

        let mut output = String::with_capacity(text.len());
        let mut redactions = Vec::new();
        let mut tokens = TokenMap::default();
        let mut issued: HashMap<(&str, &str), String> = HashMap::new();
        let mut cursor = 0;

        for span in spans {
            let value = &text[span.start..span.end];
            let tag = span.pattern.id().to_uppercase();

            let replacement = match options.style {
                RedactionStyle::Mask if options.preserve_format => mask_preserving(value),
                RedactionStyle::Mask => format!("[{}_REDACTED]", tag),
                RedactionStyle::Remove => String::new(),
                RedactionStyle::Hash => format!("[{}:{}]", tag, short_digest(value)),
                RedactionStyle::Tokenize => issued
                    .entry((span.pattern.id(), value))
                    .or_insert_with(|| {
                        let token = format!("TOK_{}_{}", tag, uuid::Uuid::new_v4().simple());
                        tokens.insert(token.clone(), value);
                        token
                    })
                    .clone(),
            };

            output.push_str(&text[cursor..span.start]);
            output.push_str(&replacement);
            cursor = span.end;

            redactions.push(RedactionEntry {
                pattern_type: span.pattern.id().to_string(),
                original: if options.include_matches {
                    value.to_string()
                } else {
                    format!("[{}]", tag)
                },
                replacement,
                action: span.action,
            });
        }
        output.push_str(&text[cursor..]);

        tracing::debug!(
            context = %options.context,
            style = ?options.style,
            redactions = redactions.len(),
            "Redacted text"
        );

        RedactionResult {
            text: output,
            redactions,
            timestamp: Utc::now(),
            tokens,
        }
    }

    /// Redact an arbitrary JSON value; anything but a string yields an empty result
    pub fn redact_value(&self, value: &serde_json::Value, options: &RedactOptions) -> RedactionResult {
        match value.as_str() {
            Some(text) => self.redact(text, options),
            None => RedactionResult::unchanged(String::new()),
        }
    }

    fn collect_spans<'a>(&'a self, text: &str, context: &str) -> Vec<Span<'a>> {
        let mut spans = Vec::new();
        for (order, pattern) in self.scanner.registry().iter().enumerate() {
            let (_, action) = self.scanner.resolve(pattern, context);
            if !action.requires_redaction() {
                continue;
            }
            spans.extend(
                pattern
                    .matcher()
                    .find_iter(text)
                    .filter(|m| m.start() < m.end())
                    .map(|m| Span {
                        start: m.start(),
                        end: m.end(),
                        order,
                        pattern,
                        action,
                    }),
            );
        }

        spans.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(a.order.cmp(&b.order))
        });

        // Overlapping matches collapse into one region typed by the first
        // span; the region covers every byte any of them matched.
        let mut regions: Vec<Span<'a>> = Vec::with_capacity(spans.len());
        for span in spans {
            match regions.last_mut() {
                Some(region) if span.start < region.end => {
                    region.end = region.end.max(span.end);
                    if span.action == Action::Block {
                        region.action = Action::Block;
                    }
                }
                _ => regions.push(span),
            }
        }
        regions
    }
}

/// Replace ASCII letters and digits with `*`, keeping every other character
fn mask_preserving(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { '*' } else { c })
        .collect()
}

fn short_digest(value: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(value.as_bytes()));
    digest[..HASH_PREFIX_LEN].to_string()
}
