//! Compatibility checker: reports the feature losses a (from, to) provider
//! pair implies for a concrete request.

use crate::providers::Provider;
use crate::translate::canonical::{CanonicalRequest, MessageRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    ToolCalling,
    SystemMessages,
    MultimodalContent,
    Logprobs,
    NBestSampling,
    StopSequences,
}

impl Feature {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCalling => "tool_calling",
            Self::SystemMessages => "system_messages",
            Self::MultimodalContent => "multimodal_content",
            Self::Logprobs => "logprobs",
            Self::NBestSampling => "n_best_sampling",
            Self::StopSequences => "stop_sequences",
        }
    }
}

/// info: dropped with no behavior change. warn: degraded. error: unserviceable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityEntry {
    pub feature: Feature,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub entries: Vec<CompatibilityEntry>,
}

impl CompatibilityResult {
    pub fn push(&mut self, feature: Feature, severity: Severity, reason: impl Into<String>) {
        self.entries.push(CompatibilityEntry {
            feature,
            severity,
            reason: reason.into(),
        });
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    #[must_use]
    pub fn first_error(&self) -> Option<&CompatibilityEntry> {
        self.entries.iter().find(|e| e.severity == Severity::Error)
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which checkable features a request actually uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFeatures {
    pub tool_calling: bool,
    pub system_messages: bool,
    pub multimodal_content: bool,
    pub logprobs: bool,
    pub n_best_sampling: bool,
    pub stop_sequences: bool,
}

impl RequestFeatures {
    #[must_use]
    pub fn of(req: &CanonicalRequest) -> Self {
        Self {
            tool_calling: !req.tools.is_empty()
                || req.messages.iter().any(|m| !m.tool_calls.is_empty()),
            system_messages: req.messages.iter().any(|m| m.role == MessageRole::System),
            multimodal_content: req.messages.iter().any(|m| !m.images.is_empty()),
            logprobs: req.sampling.logprobs,
            n_best_sampling: req.sampling.n.is_some_and(|n| n > 1),
            stop_sequences: !req.sampling.stop.is_empty(),
        }
    }
}

/// Report, per feature present in the request, whether the target provider
/// cannot express it natively. Strict mode escalates tool-calling emulation
/// to an error: strictness treats emulation as unacceptable feature loss.
#[must_use]
pub fn check_compatibility(
    from: Provider,
    to: Provider,
    features: &RequestFeatures,
    strict: bool,
) -> CompatibilityResult {
    let caps = to.capabilities();
    let mut result = CompatibilityResult::default();
    let _ = from; // symmetry with the call surface; losses depend on the target

    if features.tool_calling && !caps.tool_calling {
        let severity = if strict { Severity::Error } else { Severity::Warn };
        result.push(
            Feature::ToolCalling,
            severity,
            format!("{to} has no native tool calling; definitions are folded into the prompt"),
        );
    }

    if features.system_messages && !caps.system_messages {
        result.push(
            Feature::SystemMessages,
            Severity::Warn,
            format!("{to} has no system role; content is merged into the first user turn"),
        );
    }

    if features.multimodal_content && !caps.multimodal {
        result.push(
            Feature::MultimodalContent,
            Severity::Error,
            format!("{to} cannot accept image content"),
        );
    }

    if features.logprobs && !caps.logprobs {
        result.push(
            Feature::Logprobs,
            Severity::Info,
            format!("{to} does not return logprobs; the field is dropped"),
        );
    }

    if features.n_best_sampling && !caps.n_sampling {
        result.push(
            Feature::NBestSampling,
            Severity::Warn,
            format!("{to} returns a single candidate; n is collapsed to 1"),
        );
    }

    if features.stop_sequences && !caps.stop_sequences {
        result.push(
            Feature::StopSequences,
            Severity::Warn,
            format!("{to} ignores stop sequences"),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical::{CanonicalMessage, SamplingParams, ToolDefinition};

    fn request_with_tools() -> CanonicalRequest {
        CanonicalRequest {
            model: "gpt-4o".to_string(),
            messages: vec![CanonicalMessage::text(MessageRole::User, "hi")],
            sampling: SamplingParams::default(),
            tools: vec![ToolDefinition {
                name: "search".to_string(),
                description: None,
                parameters: serde_json::json!({}),
            }],
            tool_choice: None,
            stream: false,
            extensions: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_tools_to_ollama_warns() {
        let features = RequestFeatures::of(&request_with_tools());
        let result = check_compatibility(Provider::OpenAi, Provider::Ollama, &features, false);

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].feature, Feature::ToolCalling);
        assert_eq!(result.entries[0].severity, Severity::Warn);
        assert!(!result.has_errors());
    }

    #[test]
    fn test_strict_escalates_tool_emulation() {
        let features = RequestFeatures::of(&request_with_tools());
        let result = check_compatibility(Provider::OpenAi, Provider::Ollama, &features, true);

        assert!(result.has_errors());
        assert_eq!(result.first_error().unwrap().feature, Feature::ToolCalling);
    }

    #[test]
    fn test_tools_to_openai_is_clean() {
        let features = RequestFeatures::of(&request_with_tools());
        let result = check_compatibility(Provider::Ollama, Provider::OpenAi, &features, true);
        assert!(result.is_clean());
    }

    #[test]
    fn test_logprobs_dropped_as_info() {
        let mut req = request_with_tools();
        req.tools.clear();
        req.sampling.logprobs = true;

        let features = RequestFeatures::of(&req);
        let result = check_compatibility(Provider::OpenAi, Provider::Ollama, &features, false);

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].feature, Feature::Logprobs);
        assert_eq!(result.entries[0].severity, Severity::Info);
    }

    #[test]
    fn test_images_to_generic_is_unserviceable() {
        let mut req = request_with_tools();
        req.tools.clear();
        req.messages[0].images.push("aGVsbG8=".to_string());

        let features = RequestFeatures::of(&req);
        let result = check_compatibility(Provider::OpenAi, Provider::Generic, &features, false);

        assert!(result.has_errors());
        assert_eq!(
            result.first_error().unwrap().feature,
            Feature::MultimodalContent
        );
    }

    #[test]
    fn test_n_best_collapse_warns() {
        let mut req = request_with_tools();
        req.tools.clear();
        req.sampling.n = Some(3);

        let features = RequestFeatures::of(&req);
        let result = check_compatibility(Provider::OpenAi, Provider::Ollama, &features, false);
        assert_eq!(result.entries[0].feature, Feature::NBestSampling);
        assert_eq!(result.entries[0].severity, Severity::Warn);
    }
}
