//! Response converters: provider wire shapes ⇄ the canonical form, plus
//! finish-reason mapping shared with the streaming transcoder.

use super::canonical::{
    CanonicalResponse, CanonicalToolCall, CanonicalUsage, ConversionContext, ConversionNotes,
};
use super::coerce;
use super::ollama_types;
use super::openai_types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
};
use serde_json::{Map, Value};

/// Known top-level response keys per wire shape.
const OPENAI_RESPONSE_KEYS: &[&str] = &["id", "object", "created", "model", "choices", "usage"];

const OLLAMA_RESPONSE_KEYS: &[&str] = &[
    "model",
    "created_at",
    "message",
    "response",
    "done",
    "done_reason",
    "prompt_eval_count",
    "eval_count",
];

/// Parse a provider-native response payload into canonical form.
pub fn response_to_canonical(
    payload: &Value,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> CanonicalResponse {
    if ctx.from.openai_wire() {
        openai_response_to_canonical(payload, ctx, notes)
    } else {
        ollama_response_to_canonical(payload, ctx, notes)
    }
}

/// Encode a canonical response into the target provider's native shape.
pub fn canonical_to_response(
    resp: &CanonicalResponse,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> Value {
    if ctx.to.openai_wire() {
        canonical_to_openai_response(resp, ctx)
    } else {
        canonical_to_ollama_response(resp, ctx, notes)
    }
}

fn openai_response_to_canonical(
    payload: &Value,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> CanonicalResponse {
    let model = coerce::str_or(payload, "model", "", "", notes);
    let choices = coerce::arr_or_empty(payload, "choices", "", notes);
    let choice = choices.first().cloned().unwrap_or(Value::Null);
    if choices.len() > 1 {
        notes.degraded(format!(
            "{} extra candidate(s) dropped: canonical form carries one",
            choices.len() - 1
        ));
    }

    let message = choice.get("message").cloned().unwrap_or(Value::Null);
    let content = coerce::str_or(&message, "content", "", "choices[0].message", notes);

    let mut tool_calls = Vec::new();
    for (i, call) in coerce::arr_or_empty(&message, "tool_calls", "choices[0].message", notes)
        .iter()
        .enumerate()
    {
        let path = format!("choices[0].message.tool_calls[{i}]");
        let function = call.get("function").cloned().unwrap_or(Value::Null);
        let name = coerce::str_or(&function, "name", "", &path, notes);
        if name.is_empty() {
            notes.issue(path, "tool call without a function name");
            continue;
        }
        let arguments = function
            .get("arguments")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| Value::Object(Map::new()));

        tool_calls.push(CanonicalToolCall {
            id: coerce::str_or(call, "id", &format!("call_{i}"), &path, notes),
            name,
            arguments,
        });
    }

    let usage = payload.get("usage").map(|u| CanonicalUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        completion_tokens: u
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });

    CanonicalResponse {
        model,
        content,
        tool_calls,
        finish_reason: coerce::opt_str(&choice, "finish_reason", "choices[0]", notes),
        usage,
        extensions: super::request_extensions(payload, OPENAI_RESPONSE_KEYS, ctx),
    }
}

fn ollama_response_to_canonical(
    payload: &Value,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> CanonicalResponse {
    // Chat replies nest content under `message`; generate replies use
    // a top-level `response` string.
    let content = match payload.get("message") {
        Some(message) => coerce::str_or(message, "content", "", "message", notes),
        None => coerce::str_or(payload, "response", "", "", notes),
    };

    let usage = match (
        payload.get("prompt_eval_count").and_then(Value::as_u64),
        payload.get("eval_count").and_then(Value::as_u64),
    ) {
        (None, None) => None,
        (p, c) => Some(CanonicalUsage {
            prompt_tokens: p.unwrap_or(0),
            completion_tokens: c.unwrap_or(0),
        }),
    };

    CanonicalResponse {
        model: coerce::str_or(payload, "model", "", "", notes),
        content,
        tool_calls: Vec::new(),
        finish_reason: coerce::opt_str(payload, "done_reason", "", notes)
            .map(|r| done_reason_to_finish(&r)),
        usage,
        extensions: super::request_extensions(payload, OLLAMA_RESPONSE_KEYS, ctx),
    }
}

fn canonical_to_openai_response(resp: &CanonicalResponse, ctx: &ConversionContext) -> Value {
    let tool_calls = if resp.tool_calls.is_empty() {
        None
    } else {
        Some(
            resp.tool_calls
                .iter()
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
        )
    };

    let finish_reason = resp.finish_reason.clone().or_else(|| {
        Some(if resp.tool_calls.is_empty() {
            "stop".to_string()
        } else {
            "tool_calls".to_string()
        })
    });

    let wire = ChatCompletionResponse {
        id: format!("chatcmpl-{}", ctx.request_id.trim_start_matches("req_")),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp().max(0) as u64,
        model: ctx.map_model(&resp.model),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(resp.content.clone()),
                tool_calls,
            },
            finish_reason,
        }],
        usage: resp.usage.map(|u| ChatUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.prompt_tokens + u.completion_tokens,
        }),
    };

    let mut value = serde_json::to_value(wire).unwrap_or(Value::Null);
    merge_extensions(&mut value, resp, ctx);
    value
}

fn canonical_to_ollama_response(
    resp: &CanonicalResponse,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> Value {
    let mut content = resp.content.clone();
    for call in &resp.tool_calls {
        if !content.is_empty() {
            content.push('\n');
        }
        content
            .push_str(&serde_json::json!({"tool": call.name, "arguments": call.arguments}).to_string());
    }
    if !resp.tool_calls.is_empty() {
        notes.degraded("tool calls inlined as JSON text in the reply".to_string());
    }

    let wire = ollama_types::ChatResponse {
        model: ctx.map_model(&resp.model),
        created_at: chrono::Utc::now().to_rfc3339(),
        message: ollama_types::ChatMessage {
            role: "assistant".to_string(),
            content,
            images: None,
        },
        done: true,
        done_reason: resp
            .finish_reason
            .as_deref()
            .map(finish_to_done_reason)
            .or(Some("stop".to_string())),
        prompt_eval_count: resp.usage.map(|u| u.prompt_tokens),
        eval_count: resp.usage.map(|u| u.completion_tokens),
    };

    let mut value = serde_json::to_value(wire).unwrap_or(Value::Null);
    merge_extensions(&mut value, resp, ctx);
    value
}

fn merge_extensions(value: &mut Value, resp: &CanonicalResponse, ctx: &ConversionContext) {
    if !ctx.preserve_extensions || resp.extensions.is_empty() {
        return;
    }
    if let Some(obj) = value.as_object_mut() {
        for (k, v) in &resp.extensions {
            obj.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Map an Ollama `done_reason` to the OpenAI `finish_reason` vocabulary.
#[must_use]
pub fn done_reason_to_finish(reason: &str) -> String {
    match reason {
        "stop" => "stop".to_string(),
        "length" => "length".to_string(),
        other => other.to_string(),
    }
}

/// Map an OpenAI `finish_reason` to the Ollama `done_reason` vocabulary.
#[must_use]
pub fn finish_to_done_reason(reason: &str) -> String {
    match reason {
        "stop" | "content_filter" => "stop".to_string(),
        "length" => "length".to_string(),
        // No native tool calling on this side; the call text ends the turn.
        "tool_calls" | "function_call" => "stop".to_string(),
        other => other.to_string(),
    }
}
