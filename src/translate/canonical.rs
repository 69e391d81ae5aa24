//! Provider-neutral canonical form used as the pivot for all conversions,
//! plus the per-call [`ConversionContext`].

use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Per-call accumulator. Exclusively owned by one translation call and
/// embedded in its result afterwards; never shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionContext {
    pub request_id: String,
    pub from: Provider,
    pub to: Provider,
    #[serde(default)]
    pub model_map: HashMap<String, String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub preserve_extensions: bool,
    /// Messages without a tool mention before the definitions are reinjected.
    #[serde(default = "default_reinjection_interval")]
    pub reinjection_interval: usize,
    /// Token budget the reinforcement reminder must fit within.
    #[serde(default = "default_reminder_token_budget")]
    pub reminder_token_budget: usize,
}

fn default_reinjection_interval() -> usize {
    crate::tools::DEFAULT_REINJECTION_INTERVAL
}

fn default_reminder_token_budget() -> usize {
    crate::tools::DEFAULT_REMINDER_TOKEN_BUDGET
}

impl ConversionContext {
    #[must_use]
    pub fn new(from: Provider, to: Provider) -> Self {
        Self {
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            from,
            to,
            model_map: HashMap::new(),
            strict: false,
            preserve_extensions: false,
            reinjection_interval: default_reinjection_interval(),
            reminder_token_budget: default_reminder_token_budget(),
        }
    }

    /// Map a source model name to the target's, passing unmapped names through.
    #[must_use]
    pub fn map_model(&self, model: &str) -> String {
        self.model_map
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: MessageRole,
    pub content: String,
    /// Base64 or data-URI image payloads attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<CanonicalToolCall>,
    /// Set on tool-role messages: the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema object describing the parameters.
    pub parameters: Value,
}

/// Sampling parameters in the union of both providers' vocabularies.
/// Converters drop what the target cannot express and record the drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// OpenAI `tool_choice` directive; carried only to tool-capable targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    /// Unknown source fields, kept when `preserve_extensions` is set.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub model: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<CanonicalToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

/// One decoded SSE event in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    ContentDelta {
        text: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        extensions: Map<String, Value>,
    },
    ToolCallDelta {
        index: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<CanonicalUsage>,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        extensions: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

/// A malformed sub-field that was coerced to a safe default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

/// Side channel filled by converters: coercion issues (fatal under strict)
/// and degradations applied (always reported, never silently lost).
#[derive(Debug, Clone, Default)]
pub struct ConversionNotes {
    pub issues: Vec<FieldIssue>,
    pub degradations: Vec<String>,
}

impl ConversionNotes {
    pub fn issue(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn degraded(&mut self, description: impl Into<String>) {
        self.degradations.push(description.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_model_mapping() {
        let mut ctx = ConversionContext::new(Provider::OpenAi, Provider::Ollama);
        ctx.model_map
            .insert("gpt-4o".to_string(), "llama3.1".to_string());

        assert_eq!(ctx.map_model("gpt-4o"), "llama3.1");
        assert_eq!(ctx.map_model("unmapped"), "unmapped");
        assert!(ctx.request_id.starts_with("req_"));
    }

    #[test]
    fn test_fresh_contexts_get_distinct_ids() {
        let a = ConversionContext::new(Provider::OpenAi, Provider::Ollama);
        let b = ConversionContext::new(Provider::OpenAi, Provider::Ollama);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_stream_chunk_serialization_tags() {
        let chunk = StreamChunk::ContentDelta {
            text: "hi".to_string(),
            extensions: Map::new(),
        };
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["type"], "content_delta");
        assert_eq!(v["text"], "hi");
    }
}
