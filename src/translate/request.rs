//! Request converters: provider wire shapes ⇄ the canonical form.
//!
//! Parsing is lenient field extraction (see [`coerce`]): malformed sub-fields
//! coerce to safe defaults and are recorded, so conversion stays total for
//! any payload the matching detector accepts. Encoding routes features the
//! target cannot express natively through the tool compatibility layer or
//! drops them with a degradation note — never silently.

use super::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalToolCall, ConversionContext, ConversionNotes,
    MessageRole, SamplingParams,
};
use super::coerce;
use super::ollama_types;
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ContentPart, ImageUrlDetail,
};
use crate::tools;
use serde_json::{Map, Value};

/// Known top-level request keys per wire shape; everything else is an
/// extension candidate.
const OPENAI_REQUEST_KEYS: &[&str] = &[
    "model",
    "messages",
    "max_tokens",
    "max_completion_tokens",
    "temperature",
    "top_p",
    "n",
    "logprobs",
    "seed",
    "stream",
    "tools",
    "tool_choice",
    "stop",
];

const OLLAMA_REQUEST_KEYS: &[&str] = &[
    "model", "messages", "prompt", "system", "stream", "options", "format",
];

/// Parse a provider-native request payload into canonical form.
pub fn request_to_canonical(
    payload: &Value,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> CanonicalRequest {
    if ctx.from.openai_wire() {
        openai_request_to_canonical(payload, ctx, notes)
    } else {
        ollama_request_to_canonical(payload, ctx, notes)
    }
}

/// Encode a canonical request into the target provider's native shape.
pub fn canonical_to_request(
    req: &CanonicalRequest,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> Value {
    if ctx.to.openai_wire() {
        canonical_to_openai_request(req, ctx, notes)
    } else {
        canonical_to_ollama_request(req, ctx, notes)
    }
}

// ---------------------------------------------------------------------------
// OpenAI shape → canonical
// ---------------------------------------------------------------------------

fn openai_request_to_canonical(
    payload: &Value,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> CanonicalRequest {
    let model = coerce::str_or(payload, "model", "", "", notes);

    let mut messages = Vec::new();
    for (i, raw) in coerce::arr_or_empty(payload, "messages", "", notes)
        .iter()
        .enumerate()
    {
        let path = format!("messages[{i}]");
        messages.push(parse_openai_message(raw, &path, notes));
    }

    let max_tokens = coerce::opt_u64(payload, "max_tokens", "", notes)
        .or_else(|| coerce::opt_u64(payload, "max_completion_tokens", "", notes));

    let sampling = SamplingParams {
        temperature: coerce::opt_f64(payload, "temperature", "", notes),
        top_p: coerce::opt_f64(payload, "top_p", "", notes),
        top_k: None,
        max_tokens,
        stop: coerce::string_list(payload, "stop", "", notes),
        n: coerce::opt_u64(payload, "n", "", notes),
        logprobs: coerce::opt_bool(payload, "logprobs", "", notes).unwrap_or(false),
        seed: coerce::opt_u64(payload, "seed", "", notes),
    };

    let tool_descriptors = coerce::arr_or_empty(payload, "tools", "", notes).to_vec();
    let tools = tools::normalize_tools(&tool_descriptors);

    CanonicalRequest {
        model,
        messages,
        sampling,
        tools,
        tool_choice: payload.get("tool_choice").cloned(),
        stream: coerce::opt_bool(payload, "stream", "", notes).unwrap_or(false),
        extensions: super::request_extensions(payload, OPENAI_REQUEST_KEYS, ctx),
    }
}

fn parse_openai_message(
    raw: &Value,
    path: &str,
    notes: &mut ConversionNotes,
) -> CanonicalMessage {
    let role = match coerce::str_or(raw, "role", "user", path, notes).as_str() {
        "system" | "developer" => MessageRole::System,
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        "tool" | "function" => MessageRole::Tool,
        other => {
            notes.issue(
                coerce::join(path, "role"),
                format!("unknown role '{other}', treated as user"),
            );
            MessageRole::User
        }
    };

    let mut content = String::new();
    let mut images = Vec::new();
    match raw.get("content") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) => content = s.clone(),
        Some(Value::Array(parts)) => {
            for (j, part) in parts.iter().enumerate() {
                let part_path = format!("{path}.content[{j}]");
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        content.push_str(&coerce::str_or(part, "text", "", &part_path, notes));
                    }
                    Some("image_url") => {
                        if let Some(url) = part
                            .get("image_url")
                            .and_then(|d| d.get("url"))
                            .and_then(Value::as_str)
                        {
                            images.push(strip_data_uri(url));
                        } else {
                            notes.issue(part_path, "image_url part without a url");
                        }
                    }
                    other => {
                        notes.issue(
                            part_path,
                            format!("unsupported content part type {other:?}"),
                        );
                    }
                }
            }
        }
        Some(other) => {
            notes.issue(
                coerce::join(path, "content"),
                format!("expected string or array, got {}", coerce::type_name(other)),
            );
        }
    }

    let mut tool_calls = Vec::new();
    for (j, call) in coerce::arr_or_empty(raw, "tool_calls", path, notes)
        .iter()
        .enumerate()
    {
        let call_path = format!("{path}.tool_calls[{j}]");
        let function = call.get("function").cloned().unwrap_or(Value::Null);
        let name = coerce::str_or(&function, "name", "", &call_path, notes);
        if name.is_empty() {
            notes.issue(call_path, "tool call without a function name");
            continue;
        }

        let arguments = match function.get("arguments") {
            Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| {
                notes.issue(
                    format!("{call_path}.function.arguments"),
                    "arguments are not valid JSON",
                );
                Value::Object(Map::new())
            }),
            Some(v @ Value::Object(_)) => v.clone(),
            _ => Value::Object(Map::new()),
        };

        tool_calls.push(CanonicalToolCall {
            id: coerce::str_or(call, "id", &format!("call_{j}"), &call_path, notes),
            name,
            arguments,
        });
    }

    CanonicalMessage {
        role,
        content,
        images,
        tool_calls,
        tool_call_id: coerce::opt_str(raw, "tool_call_id", path, notes),
    }
}

// ---------------------------------------------------------------------------
// Ollama shape → canonical
// ---------------------------------------------------------------------------

fn ollama_request_to_canonical(
    payload: &Value,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> CanonicalRequest {
    let model = coerce::str_or(payload, "model", "", "", notes);
    let mut messages = Vec::new();

    if payload.get("messages").is_some() {
        for (i, raw) in coerce::arr_or_empty(payload, "messages", "", notes)
            .iter()
            .enumerate()
        {
            let path = format!("messages[{i}]");
            let role = match coerce::str_or(raw, "role", "user", &path, notes).as_str() {
                "system" => MessageRole::System,
                "assistant" => MessageRole::Assistant,
                "user" => MessageRole::User,
                other => {
                    notes.issue(
                        coerce::join(&path, "role"),
                        format!("unknown role '{other}', treated as user"),
                    );
                    MessageRole::User
                }
            };
            messages.push(CanonicalMessage {
                role,
                content: coerce::str_or(raw, "content", "", &path, notes),
                images: coerce::string_list(raw, "images", &path, notes),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
    } else {
        // Generate-style request: optional system plus a single prompt turn.
        if let Some(system) = coerce::opt_str(payload, "system", "", notes) {
            messages.push(CanonicalMessage::text(MessageRole::System, system));
        }
        let prompt = coerce::str_or(payload, "prompt", "", "", notes);
        messages.push(CanonicalMessage {
            role: MessageRole::User,
            content: prompt,
            images: coerce::string_list(payload, "images", "", notes),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }

    let options = payload.get("options").cloned().unwrap_or(Value::Null);
    let sampling = SamplingParams {
        temperature: coerce::opt_f64(&options, "temperature", "options", notes),
        top_p: coerce::opt_f64(&options, "top_p", "options", notes),
        top_k: coerce::opt_u64(&options, "top_k", "options", notes),
        max_tokens: coerce::opt_u64(&options, "num_predict", "options", notes),
        stop: coerce::string_list(&options, "stop", "options", notes),
        n: None,
        logprobs: false,
        seed: coerce::opt_u64(&options, "seed", "options", notes),
    };

    CanonicalRequest {
        model,
        messages,
        sampling,
        tools: Vec::new(),
        tool_choice: None,
        // Ollama streams by default unless the request opts out.
        stream: coerce::opt_bool(payload, "stream", "", notes).unwrap_or(true),
        extensions: super::request_extensions(payload, OLLAMA_REQUEST_KEYS, ctx),
    }
}

// ---------------------------------------------------------------------------
// Canonical → OpenAI shape
// ---------------------------------------------------------------------------

fn canonical_to_openai_request(
    req: &CanonicalRequest,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> Value {
    let caps = ctx.to.capabilities();
    let native_tools = caps.tool_calling && !req.tools.is_empty();

    let mut canonical_messages = req.messages.clone();
    if !caps.multimodal {
        let dropped: usize = canonical_messages.iter().map(|m| m.images.len()).sum();
        if dropped > 0 {
            for msg in &mut canonical_messages {
                msg.images.clear();
            }
            notes.degraded(format!(
                "{dropped} image attachment(s) dropped: {} is text-only",
                ctx.to
            ));
        }
    }
    if !native_tools && !req.tools.is_empty() {
        fold_tools_into_system(&mut canonical_messages, &req.tools, ctx, notes);
    }

    let messages: Vec<ChatMessage> = canonical_messages
        .iter()
        .map(|msg| encode_openai_message(msg))
        .collect();

    let tools = native_tools.then(|| {
        req.tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    });

    let n = match req.sampling.n {
        Some(n) if n > 1 && !caps.n_sampling => {
            notes.degraded(format!("n={n} collapsed to 1: target returns one candidate"));
            None
        }
        other => other,
    };

    let logprobs = if req.sampling.logprobs && !caps.logprobs {
        notes.degraded("logprobs dropped: not supported by target".to_string());
        None
    } else if req.sampling.logprobs {
        Some(true)
    } else {
        None
    };

    let tool_choice = match &req.tool_choice {
        Some(choice) if caps.tool_calling => Some(choice.clone()),
        Some(_) => {
            notes.degraded(format!(
                "tool_choice dropped: {} has no native tool calling",
                ctx.to
            ));
            None
        }
        None => None,
    };

    let wire = ChatCompletionRequest {
        model: ctx.map_model(&req.model),
        messages,
        max_tokens: req.sampling.max_tokens,
        temperature: req.sampling.temperature,
        top_p: req.sampling.top_p,
        n,
        logprobs,
        seed: req.sampling.seed,
        stream: req.stream.then_some(true),
        tools,
        tool_choice,
        stop: if req.sampling.stop.is_empty() {
            None
        } else {
            Some(req.sampling.stop.clone())
        },
        extra: if ctx.preserve_extensions {
            req.extensions.clone()
        } else {
            Map::new()
        },
    };

    if req.sampling.top_k.is_some() {
        notes.degraded("top_k dropped: absent from the OpenAI schema".to_string());
    }

    serde_json::to_value(wire).unwrap_or(Value::Null)
}

fn encode_openai_message(msg: &CanonicalMessage) -> ChatMessage {
    let content = if msg.images.is_empty() {
        if msg.content.is_empty() && !msg.tool_calls.is_empty() {
            None
        } else {
            Some(ChatContent::Text(msg.content.clone()))
        }
    } else {
        let mut parts = Vec::new();
        if !msg.content.is_empty() {
            parts.push(ContentPart::Text {
                text: msg.content.clone(),
            });
        }
        for image in &msg.images {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: to_data_uri(image),
                    detail: None,
                },
            });
        }
        Some(ChatContent::Parts(parts))
    };

    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
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

    ChatMessage {
        role: msg.role.as_str().to_string(),
        content,
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

// ---------------------------------------------------------------------------
// Canonical → Ollama shape
// ---------------------------------------------------------------------------

fn canonical_to_ollama_request(
    req: &CanonicalRequest,
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) -> Value {
    let mut canonical_messages: Vec<CanonicalMessage> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            MessageRole::Tool => {
                // Nearest supported role: a user turn carrying the result.
                let call_ref = msg
                    .tool_call_id
                    .as_deref()
                    .map(|id| format!(" for {id}"))
                    .unwrap_or_default();
                canonical_messages.push(CanonicalMessage::text(
                    MessageRole::User,
                    format!("[tool result{call_ref}] {}", msg.content),
                ));
                notes.degraded(format!(
                    "tool-role message degraded to user turn{call_ref}"
                ));
            }
            MessageRole::Assistant if !msg.tool_calls.is_empty() => {
                // Native calls become inline JSON invocations in the text.
                let mut content = msg.content.clone();
                for call in &msg.tool_calls {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(
                        &serde_json::json!({"tool": call.name, "arguments": call.arguments})
                            .to_string(),
                    );
                }
                canonical_messages.push(CanonicalMessage::text(MessageRole::Assistant, content));
                notes.degraded("assistant tool calls inlined as JSON text".to_string());
            }
            _ => canonical_messages.push(msg.clone()),
        }
    }

    if !req.tools.is_empty() {
        fold_tools_into_system(&mut canonical_messages, &req.tools, ctx, notes);
    }
    if req.tool_choice.is_some() {
        notes.degraded("tool_choice dropped: Ollama has no native tool calling".to_string());
    }

    let messages = canonical_messages
        .iter()
        .map(|m| ollama_types::ChatMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
            images: if m.images.is_empty() {
                None
            } else {
                Some(m.images.clone())
            },
        })
        .collect();

    if let Some(n) = req.sampling.n.filter(|n| *n > 1) {
        notes.degraded(format!("n={n} dropped: Ollama returns one candidate"));
    }
    if req.sampling.logprobs {
        notes.degraded("logprobs dropped: absent from the Ollama schema".to_string());
    }

    let options = ollama_types::ModelOptions {
        temperature: req.sampling.temperature,
        top_p: req.sampling.top_p,
        top_k: req.sampling.top_k,
        num_predict: req.sampling.max_tokens,
        stop: if req.sampling.stop.is_empty() {
            None
        } else {
            Some(req.sampling.stop.clone())
        },
        seed: req.sampling.seed,
    };

    let wire = ollama_types::ChatRequest {
        model: ctx.map_model(&req.model),
        messages,
        stream: Some(req.stream),
        options: if options.is_empty() {
            None
        } else {
            Some(options)
        },
        extra: if ctx.preserve_extensions {
            req.extensions.clone()
        } else {
            Map::new()
        },
    };

    serde_json::to_value(wire).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Append the XML tool block to the last system message, creating one at the
/// front if the transcript has none, and reinforce before the final user
/// turn when the conversation has drifted.
fn fold_tools_into_system(
    messages: &mut Vec<CanonicalMessage>,
    tool_defs: &[crate::translate::canonical::ToolDefinition],
    ctx: &ConversionContext,
    notes: &mut ConversionNotes,
) {
    let block = tools::tool_system_prompt(tool_defs);

    match messages
        .iter_mut()
        .filter(|m| m.role == MessageRole::System)
        .last()
    {
        Some(system) => {
            if !system.content.is_empty() {
                system.content.push_str("\n\n");
            }
            system.content.push_str(&block);
        }
        None => messages.insert(0, CanonicalMessage::text(MessageRole::System, block)),
    }

    notes.degraded(format!(
        "{} tool definition(s) folded into the system prompt",
        tool_defs.len()
    ));

    if tools::needs_tool_reinjection(messages, tool_defs, ctx.reinjection_interval)
        && tools::inject_reinforcement(messages, tool_defs, ctx.reminder_token_budget)
    {
        notes.degraded("tool reminder reinjected before the final user turn".to_string());
    }
}

fn strip_data_uri(url: &str) -> String {
    match url.split_once(";base64,") {
        Some((_, data)) => data.to_string(),
        None => url.to_string(),
    }
}

fn to_data_uri(image: &str) -> String {
    if image.starts_with("http://") || image.starts_with("https://") || image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/png;base64,{image}")
    }
}
