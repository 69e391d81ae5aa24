//! Format detection: classify an arbitrary JSON payload as a provider's
//! request or response shape.
//!
//! Detectors are field-presence heuristics, not schema validation. They are
//! total (never panic), O(1) field lookups, and non-object input never
//! matches. The resolver scores each provider by how many of its signature
//! fields are present; the most specific match wins, ties break by
//! declaration order (OpenAI before Ollama).

use crate::providers::Provider;
use serde_json::Value;

/// True if the payload looks like an Ollama request or response:
/// `prompt`/`response` as a string, a boolean `done`, or a `model` string
/// paired with `created_at`.
#[must_use]
pub fn is_ollama_format(payload: &Value) -> bool {
    ollama_score(payload) > 0
}

/// True if the payload looks like an OpenAI chat-completion request,
/// response, or streaming chunk.
#[must_use]
pub fn is_openai_format(payload: &Value) -> bool {
    openai_score(payload) > 0
}

/// Resolve a payload to a provider. `None` means Unknown.
#[must_use]
pub fn detect_provider(payload: &Value) -> Option<Provider> {
    let openai = openai_score(payload);
    let ollama = ollama_score(payload);

    if openai == 0 && ollama == 0 {
        return None;
    }
    if openai >= ollama {
        Some(Provider::OpenAi)
    } else {
        Some(Provider::Ollama)
    }
}

fn openai_score(payload: &Value) -> u32 {
    let Some(obj) = payload.as_object() else {
        return 0;
    };

    let mut score = 0;
    if obj.get("messages").is_some_and(Value::is_array) {
        score += 1;
    }
    if obj.get("choices").is_some_and(Value::is_array) {
        score += 1;
    }
    if let Some(object) = obj.get("object").and_then(Value::as_str) {
        if object == "chat.completion.chunk" && obj.get("choices").is_some_and(Value::is_array) {
            score += 1;
        } else if object == "chat.completion" {
            score += 1;
        }
    }
    score
}

fn ollama_score(payload: &Value) -> u32 {
    let Some(obj) = payload.as_object() else {
        return 0;
    };

    let mut score = 0;
    if obj.get("prompt").is_some_and(Value::is_string) {
        score += 1;
    }
    if obj.get("response").is_some_and(Value::is_string) {
        score += 1;
    }
    if obj.get("done").is_some_and(Value::is_boolean) {
        score += 1;
    }
    if obj.get("model").is_some_and(Value::is_string)
        && obj
            .get("created_at")
            .is_some_and(|v| v.is_string() || v.is_number())
    {
        score += 1;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_object_never_matches() {
        for payload in [json!(null), json!(42), json!("text"), json!([1, 2])] {
            assert!(!is_openai_format(&payload));
            assert!(!is_ollama_format(&payload));
            assert_eq!(detect_provider(&payload), None);
        }
    }

    #[test]
    fn test_openai_request_detected() {
        let payload = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        });
        assert!(is_openai_format(&payload));
        assert_eq!(detect_provider(&payload), Some(Provider::OpenAi));
    }

    #[test]
    fn test_openai_chunk_detected() {
        let payload = json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": "x"}}]
        });
        assert!(is_openai_format(&payload));
        assert_eq!(detect_provider(&payload), Some(Provider::OpenAi));
    }

    #[test]
    fn test_ollama_generate_detected() {
        let payload = json!({"model": "llama3", "prompt": "hello", "stream": true});
        assert!(is_ollama_format(&payload));
        assert_eq!(detect_provider(&payload), Some(Provider::Ollama));
    }

    #[test]
    fn test_ollama_response_detected() {
        let payload = json!({
            "model": "llama3",
            "created_at": "2024-07-01T12:00:00Z",
            "response": "hi there",
            "done": true
        });
        assert!(is_ollama_format(&payload));
        assert_eq!(detect_provider(&payload), Some(Provider::Ollama));
    }

    #[test]
    fn test_detection_matches_predicates() {
        // For all P where is_openai_format(P) and not is_ollama_format(P),
        // detect_provider(P) == OpenAi, and symmetrically.
        let openai_only = json!({"messages": [], "choices": []});
        assert_eq!(detect_provider(&openai_only), Some(Provider::OpenAi));

        let ollama_only = json!({"done": false, "response": "x"});
        assert_eq!(detect_provider(&ollama_only), Some(Provider::Ollama));
    }

    #[test]
    fn test_ambiguous_payload_most_specific_wins() {
        // One OpenAI marker vs. two Ollama markers: Ollama is more specific.
        let payload = json!({
            "messages": [],
            "prompt": "hi",
            "done": false
        });
        assert_eq!(detect_provider(&payload), Some(Provider::Ollama));
    }

    #[test]
    fn test_ambiguous_tie_goes_to_openai() {
        let payload = json!({"messages": [], "prompt": "hi"});
        assert_eq!(detect_provider(&payload), Some(Provider::OpenAi));
    }

    #[test]
    fn test_malformed_fields_do_not_match() {
        // prompt must be a string, done must be a bool
        let payload = json!({"prompt": 42, "done": "yes"});
        assert_eq!(detect_provider(&payload), None);
    }
}
