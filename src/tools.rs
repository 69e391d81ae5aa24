//! Tool-use compatibility layer.
//!
//! When the target backend has no native tool calling, tool definitions are
//! serialized into an XML-tagged instruction block appended to the system
//! prompt. Long conversations drift: the layer decides when the definitions
//! need to be reinforced with a short reminder before the final user turn.

use crate::translate::canonical::{CanonicalMessage, MessageRole, ToolDefinition};
use serde_json::Value;

/// Reinject tool definitions after this many messages without a mention.
pub const DEFAULT_REINJECTION_INTERVAL: usize = 6;

/// Default token budget below which the reinforcement reminder is skipped.
pub const DEFAULT_REMINDER_TOKEN_BUDGET: usize = 256;

const TOOLS_HEADER: &str = "You have access to the following tools:";

const INVOCATION_HINT: &str = "To call a tool, respond with a single JSON object \
on its own line: {\"tool\": \"<name>\", \"arguments\": { ... }}. \
Do not call tools that are not listed above.";

/// Serialize tool definitions into a deterministic XML block: one tag per
/// tool named after the tool, input order preserved. An empty set yields an
/// empty string.
#[must_use]
pub fn format_tools_xml(tools: &[ToolDefinition]) -> String {
    let mut out = String::new();
    for tool in tools {
        out.push('<');
        out.push_str(&tool.name);
        out.push_str(">\n");
        if let Some(ref desc) = tool.description {
            out.push_str("  <description>");
            out.push_str(&xml_escape(desc));
            out.push_str("</description>\n");
        }
        out.push_str("  <parameters>");
        out.push_str(&xml_escape(&tool.parameters.to_string()));
        out.push_str("</parameters>\n");
        out.push_str("</");
        out.push_str(&tool.name);
        out.push_str(">\n");
    }
    out
}

/// Full instruction block appended to the system prompt when emulating
/// tool calling.
#[must_use]
pub fn tool_system_prompt(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    format!(
        "{TOOLS_HEADER}\n\n{}\n{INVOCATION_HINT}",
        format_tools_xml(tools)
    )
}

/// Short reminder inserted before the final user turn.
#[must_use]
pub fn reinforcement_message(tools: &[ToolDefinition]) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    format!(
        "Reminder: the tools {} are still available. Use the JSON invocation \
format when one of them applies.",
        names.join(", ")
    )
}

/// Normalize a provider-agnostic tool descriptor. Accepts both the OpenAI
/// nesting (`{"type": "function", "function": {...}}`) and a flat
/// `{name, description, parameters}` object. A descriptor missing a name is
/// skipped with a warning, never a hard failure.
#[must_use]
pub fn normalize_tool(descriptor: &Value) -> Option<ToolDefinition> {
    let body = descriptor.get("function").unwrap_or(descriptor);

    let Some(name) = body.get("name").and_then(Value::as_str) else {
        tracing::warn!("skipping tool descriptor without a name");
        return None;
    };
    if name.is_empty() {
        tracing::warn!("skipping tool descriptor with an empty name");
        return None;
    }

    let description = body
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    let parameters = body
        .get("parameters")
        .or_else(|| body.get("input_schema"))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));

    Some(ToolDefinition {
        name: name.to_string(),
        description,
        parameters,
    })
}

/// Normalize a whole descriptor list, dropping the unusable ones.
#[must_use]
pub fn normalize_tools(descriptors: &[Value]) -> Vec<ToolDefinition> {
    descriptors.iter().filter_map(normalize_tool).collect()
}

/// Decide whether the tool definitions must be reinjected into the prompt.
///
/// True when more than `interval` messages have elapsed since a tool
/// definition last appeared in the transcript, or when the last assistant
/// turn invoked a tool name absent from the declared set (drift signal).
/// False immediately after a turn containing the definitions.
#[must_use]
pub fn needs_tool_reinjection(
    messages: &[CanonicalMessage],
    tools: &[ToolDefinition],
    interval: usize,
) -> bool {
    if tools.is_empty() {
        return false;
    }

    if let Some(last_assistant) = messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant)
    {
        let drifted = last_assistant
            .tool_calls
            .iter()
            .any(|call| !tools.iter().any(|t| t.name == call.name));
        if drifted {
            return true;
        }
    }

    let last_mention = messages
        .iter()
        .rposition(|m| mentions_tool_definitions(&m.content, tools));

    match last_mention {
        Some(idx) => messages.len() - 1 - idx > interval,
        None => true,
    }
}

/// Insert the reinforcement reminder before the final user turn, if the
/// approximate token budget allows it. Returns whether it was inserted.
pub fn inject_reinforcement(
    messages: &mut Vec<CanonicalMessage>,
    tools: &[ToolDefinition],
    token_budget: usize,
) -> bool {
    if tools.is_empty() {
        return false;
    }

    let reminder = reinforcement_message(tools);
    if estimate_tokens(&reminder) > token_budget {
        return false;
    }

    let insert_at = messages
        .iter()
        .rposition(|m| m.role == MessageRole::User)
        .unwrap_or(messages.len());

    messages.insert(insert_at, CanonicalMessage::text(MessageRole::System, reminder));
    true
}

/// Approximate token count for budget heuristics: roughly one token per four
/// characters of text. Error bound is on the order of ±20%; never use this
/// for billing.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn mentions_tool_definitions(content: &str, tools: &[ToolDefinition]) -> bool {
    if content.contains(TOOLS_HEADER) {
        return true;
    }
    tools
        .iter()
        .any(|t| content.contains(&format!("<{}>", t.name)))
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical::CanonicalToolCall;
    use serde_json::json;

    fn weather_tool() -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: Some("Get current weather for a city".to_string()),
            parameters: json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        }
    }

    #[test]
    fn test_empty_tools_yield_empty_string() {
        assert_eq!(format_tools_xml(&[]), "");
        assert_eq!(tool_system_prompt(&[]), "");
    }

    #[test]
    fn test_single_tool_yields_tag_named_after_tool() {
        let xml = format_tools_xml(&[weather_tool()]);
        assert!(xml.starts_with("<get_weather>"));
        assert!(xml.trim_end().ends_with("</get_weather>"));
        assert_eq!(xml.matches("<get_weather>").count(), 1);
        assert!(xml.contains("<description>Get current weather for a city</description>"));
        assert!(xml.contains("<parameters>"));
    }

    #[test]
    fn test_tool_order_preserved() {
        let mut second = weather_tool();
        second.name = "get_time".to_string();
        let xml = format_tools_xml(&[weather_tool(), second]);

        let weather_pos = xml.find("<get_weather>").unwrap();
        let time_pos = xml.find("<get_time>").unwrap();
        assert!(weather_pos < time_pos);
    }

    #[test]
    fn test_description_is_escaped() {
        let tool = ToolDefinition {
            name: "cmp".to_string(),
            description: Some("returns a < b && b > c".to_string()),
            parameters: json!({}),
        };
        let xml = format_tools_xml(&[tool]);
        assert!(xml.contains("a &lt; b &amp;&amp; b &gt; c"));
    }

    #[test]
    fn test_normalize_openai_descriptor() {
        let descriptor = json!({
            "type": "function",
            "function": {
                "name": "search",
                "description": "Search the web",
                "parameters": {"type": "object"}
            }
        });
        let tool = normalize_tool(&descriptor).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.description.as_deref(), Some("Search the web"));
    }

    #[test]
    fn test_nameless_descriptor_skipped() {
        let descriptors = vec![
            json!({"description": "no name here"}),
            json!({"name": "ok", "parameters": {}}),
        ];
        let tools = normalize_tools(&descriptors);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ok");
    }

    #[test]
    fn test_no_reinjection_right_after_definitions() {
        let tools = vec![weather_tool()];
        let messages = vec![
            CanonicalMessage::text(MessageRole::System, tool_system_prompt(&tools)),
            CanonicalMessage::text(MessageRole::User, "what's the weather?"),
        ];
        assert!(!needs_tool_reinjection(&messages, &tools, 4));
    }

    #[test]
    fn test_reinjection_after_interval_elapses() {
        let tools = vec![weather_tool()];
        let mut messages = vec![CanonicalMessage::text(
            MessageRole::System,
            tool_system_prompt(&tools),
        )];
        for i in 0..5 {
            messages.push(CanonicalMessage::text(MessageRole::User, format!("q{i}")));
            messages.push(CanonicalMessage::text(MessageRole::Assistant, format!("a{i}")));
        }

        // 10 messages since the definitions with interval 4: reinject.
        assert!(needs_tool_reinjection(&messages, &tools, 4));
        // A generous interval still covers it.
        assert!(!needs_tool_reinjection(&messages, &tools, 20));
    }

    #[test]
    fn test_drift_triggers_reinjection() {
        let tools = vec![weather_tool()];
        let messages = vec![
            CanonicalMessage::text(MessageRole::System, tool_system_prompt(&tools)),
            CanonicalMessage::text(MessageRole::User, "hm"),
            CanonicalMessage {
                role: MessageRole::Assistant,
                content: String::new(),
                images: Vec::new(),
                tool_calls: vec![CanonicalToolCall {
                    id: "call_1".to_string(),
                    name: "made_up_tool".to_string(),
                    arguments: json!({}),
                }],
                tool_call_id: None,
            },
        ];
        assert!(needs_tool_reinjection(&messages, &tools, 10));
    }

    #[test]
    fn test_reinforcement_inserted_before_final_user_turn() {
        let tools = vec![weather_tool()];
        let mut messages = vec![
            CanonicalMessage::text(MessageRole::User, "first"),
            CanonicalMessage::text(MessageRole::Assistant, "reply"),
            CanonicalMessage::text(MessageRole::User, "last question"),
        ];

        assert!(inject_reinforcement(&mut messages, &tools, 512));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, MessageRole::System);
        assert!(messages[2].content.contains("get_weather"));
        assert_eq!(messages[3].content, "last question");
    }

    #[test]
    fn test_reinforcement_skipped_when_over_budget() {
        let tools = vec![weather_tool()];
        let mut messages = vec![CanonicalMessage::text(MessageRole::User, "q")];
        assert!(!inject_reinforcement(&mut messages, &tools, 1));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_token_estimate_tracks_length() {
        assert_eq!(estimate_tokens(""), 0);
        let text = "a".repeat(400);
        let est = estimate_tokens(&text);
        assert!((80..=120).contains(&est), "estimate {est} outside ±20%");
    }
}
