//! Streaming transcoder: decode an SSE byte stream of one provider's chunks
//! into canonical [`StreamChunk`]s and re-encode them in the target
//! provider's chunk shape, preserving order.
//!
//! All decode state (a partial multi-byte sequence, a partial line) lives in
//! one owned transcoder per stream. A line that fails to JSON-parse is
//! dropped and counted; the stream never aborts on an isolated bad event.

use super::canonical::{CanonicalUsage, ConversionContext, StreamChunk};
use super::ollama_types;
use super::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use super::response::{done_reason_to_finish, finish_to_done_reason};
use crate::providers::Provider;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};

pub const DONE_SENTINEL: &str = "[DONE]";

const OPENAI_CHUNK_KEYS: &[&str] = &["id", "object", "created", "model", "choices", "usage"];
const OLLAMA_CHUNK_KEYS: &[&str] = &[
    "model",
    "created_at",
    "message",
    "response",
    "done",
    "done_reason",
    "prompt_eval_count",
    "eval_count",
];

/// Incremental UTF-8 decode. A multi-byte sequence split across reads is
/// held until the rest arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Reader {
    pending: Vec<u8>,
}

impl Utf8Reader {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or(""));
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete trailing sequence: keep for the next read.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

/// One transcoder per stream, owning all decode and framing state.
#[derive(Debug)]
pub struct StreamTranscoder {
    from: Provider,
    to: Provider,
    preserve_extensions: bool,
    utf8: Utf8Reader,
    lines: LineBuffer,
    chunk_id: String,
    model: String,
    created: u64,
    started: bool,
    decoded_done: bool,
    emitted_done: bool,
    dropped_lines: u64,
}

impl StreamTranscoder {
    #[must_use]
    pub fn new(ctx: &ConversionContext, model: &str) -> Self {
        Self {
            from: ctx.from,
            to: ctx.to,
            preserve_extensions: ctx.preserve_extensions,
            utf8: Utf8Reader::default(),
            lines: LineBuffer::default(),
            chunk_id: format!("chatcmpl-{}", ctx.request_id.trim_start_matches("req_")),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp().max(0) as u64,
            started: false,
            decoded_done: false,
            emitted_done: false,
            dropped_lines: 0,
        }
    }

    /// Whether the upstream signalled completion.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.decoded_done
    }

    /// Lines that failed to parse and were dropped so far.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    /// Decode a raw byte read into zero or more canonical chunks.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let text = self.utf8.push(bytes);
        let mut chunks = Vec::new();
        for line in self.lines.push(&text) {
            chunks.extend(self.decode_line(&line));
        }
        chunks
    }

    /// Decode a single SSE line. Comments, keep-alives, and non-`data:`
    /// fields yield nothing; a malformed payload drops that line only.
    pub fn decode_line(&mut self, line: &str) -> Vec<StreamChunk> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        // SSE `data:` lines and bare NDJSON lines (Ollama's stream framing)
        // both carry payloads; other SSE fields and comments do not.
        let data = match line.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            None if line.starts_with(':')
                || line.starts_with("event:")
                || line.starts_with("id:")
                || line.starts_with("retry:") =>
            {
                return Vec::new();
            }
            None => line,
        };

        if data == DONE_SENTINEL {
            let first_done = !self.decoded_done;
            self.decoded_done = true;
            return if first_done {
                vec![StreamChunk::Done {
                    finish_reason: None,
                    usage: None,
                    extensions: Map::new(),
                }]
            } else {
                Vec::new()
            };
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                self.dropped_lines += 1;
                tracing::debug!(error = %e, "dropping unparseable stream line");
                return Vec::new();
            }
        };

        if self.from.openai_wire() {
            self.decode_openai_payload(&payload)
        } else {
            self.decode_ollama_payload(&payload)
        }
    }

    fn decode_openai_payload(&mut self, payload: &Value) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        let extensions = self.chunk_extensions(payload, OPENAI_CHUNK_KEYS);

        let usage = payload.get("usage").and_then(|u| {
            u.as_object().map(|_| CanonicalUsage {
                prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                completion_tokens: u
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            })
        });

        let Some(choice) = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            if let Some(usage) = usage {
                // Usage-only trailer chunk.
                chunks.push(StreamChunk::Done {
                    finish_reason: None,
                    usage: Some(usage),
                    extensions,
                });
                self.decoded_done = true;
            }
            return chunks;
        };

        let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                chunks.push(StreamChunk::ContentDelta {
                    text: text.to_string(),
                    extensions: extensions.clone(),
                });
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let function = call.get("function").cloned().unwrap_or(Value::Null);
                chunks.push(StreamChunk::ToolCallDelta {
                    index: call.get("index").and_then(Value::as_u64).unwrap_or(0),
                    id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    name: function
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    arguments: function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                });
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.decoded_done = true;
            chunks.push(StreamChunk::Done {
                finish_reason: Some(reason.to_string()),
                usage,
                extensions,
            });
        }

        chunks
    }

    fn decode_ollama_payload(&mut self, payload: &Value) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        let extensions = self.chunk_extensions(payload, OLLAMA_CHUNK_KEYS);

        let text = payload
            .get("message")
            .and_then(|m| m.get("content"))
            .or_else(|| payload.get("response"))
            .and_then(Value::as_str)
            .unwrap_or("");

        if !text.is_empty() {
            chunks.push(StreamChunk::ContentDelta {
                text: text.to_string(),
                extensions: extensions.clone(),
            });
        }

        if payload.get("done").and_then(Value::as_bool) == Some(true) {
            self.decoded_done = true;
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
            chunks.push(StreamChunk::Done {
                finish_reason: payload
                    .get("done_reason")
                    .and_then(Value::as_str)
                    .map(done_reason_to_finish),
                usage,
                extensions,
            });
        }

        chunks
    }

    /// Re-encode a canonical chunk as one or more `data: <json>\n\n` frames
    /// in the target's chunk shape. `Done` also emits the terminator.
    pub fn encode(&mut self, chunk: &StreamChunk) -> Option<String> {
        if self.emitted_done {
            return None;
        }
        if self.to.openai_wire() {
            self.encode_openai(chunk)
        } else {
            self.encode_ollama(chunk)
        }
    }

    fn encode_openai(&mut self, chunk: &StreamChunk) -> Option<String> {
        let frame = match chunk {
            StreamChunk::ContentDelta { text, extensions } => {
                let delta = ChunkDelta {
                    role: (!self.started).then(|| "assistant".to_string()),
                    content: Some(text.clone()),
                    tool_calls: None,
                };
                let mut payload = self.openai_chunk_frame(delta, None, None);
                self.merge(&mut payload, extensions);
                frame_of(&payload)
            }
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let delta = ChunkDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ChunkToolCall {
                        index: *index,
                        id: id.clone(),
                        call_type: id.is_some().then(|| "function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: name.clone(),
                            arguments: Some(arguments.clone()),
                        }),
                    }]),
                };
                let payload = self.openai_chunk_frame(delta, None, None);
                frame_of(&payload)
            }
            StreamChunk::Done {
                finish_reason,
                usage,
                extensions,
            } => {
                self.emitted_done = true;
                let reason = finish_reason.clone().unwrap_or_else(|| "stop".to_string());
                let usage = usage.map(|u| ChatUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.prompt_tokens + u.completion_tokens,
                });
                let mut payload =
                    self.openai_chunk_frame(ChunkDelta::default(), Some(reason), usage);
                self.merge(&mut payload, extensions);
                format!("{}data: {DONE_SENTINEL}\n\n", frame_of(&payload))
            }
            StreamChunk::Error { .. } => return None,
        };
        self.started = true;
        Some(frame)
    }

    fn encode_ollama(&mut self, chunk: &StreamChunk) -> Option<String> {
        let frame = match chunk {
            StreamChunk::ContentDelta { text, extensions } => {
                let mut payload = self.ollama_chunk_frame(text, false, None, None);
                self.merge(&mut payload, extensions);
                frame_of(&payload)
            }
            // No native tool calls on this wire: argument fragments flow
            // through as message text.
            StreamChunk::ToolCallDelta { name, arguments, .. } => {
                let mut text = String::new();
                if let Some(name) = name {
                    text.push_str(&format!("{{\"tool\": \"{name}\", \"arguments\": "));
                }
                text.push_str(arguments);
                if text.is_empty() {
                    return None;
                }
                let payload = self.ollama_chunk_frame(&text, false, None, None);
                frame_of(&payload)
            }
            StreamChunk::Done {
                finish_reason,
                usage,
                extensions,
            } => {
                self.emitted_done = true;
                let reason = finish_reason
                    .as_deref()
                    .map(finish_to_done_reason)
                    .unwrap_or_else(|| "stop".to_string());
                let mut payload = self.ollama_chunk_frame("", true, Some(reason), *usage);
                self.merge(&mut payload, extensions);
                format!("{}data: {DONE_SENTINEL}\n\n", frame_of(&payload))
            }
            StreamChunk::Error { .. } => return None,
        };
        self.started = true;
        Some(frame)
    }

    /// Decode a byte read and re-encode everything it completes.
    pub fn transcode(&mut self, bytes: &[u8]) -> Vec<String> {
        self.decode(bytes)
            .iter()
            .filter_map(|chunk| self.encode(chunk))
            .collect()
    }

    /// Flush at end of input: guarantees the final frame and terminator even
    /// when the upstream never sent its own completion event.
    pub fn finish(&mut self) -> Option<String> {
        if self.emitted_done {
            return None;
        }
        self.encode(&StreamChunk::Done {
            finish_reason: None,
            usage: None,
            extensions: Map::new(),
        })
    }

    fn openai_chunk_frame(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<ChatUsage>,
    ) -> Value {
        let chunk = ChatCompletionChunk {
            id: self.chunk_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };
        serde_json::to_value(chunk).unwrap_or(Value::Null)
    }

    fn ollama_chunk_frame(
        &self,
        content: &str,
        done: bool,
        done_reason: Option<String>,
        usage: Option<CanonicalUsage>,
    ) -> Value {
        let reply = ollama_types::ChatResponse {
            model: self.model.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            message: ollama_types::ChatMessage {
                role: "assistant".to_string(),
                content: content.to_string(),
                images: None,
            },
            done,
            done_reason,
            prompt_eval_count: usage.map(|u| u.prompt_tokens),
            eval_count: usage.map(|u| u.completion_tokens),
        };
        serde_json::to_value(reply).unwrap_or(Value::Null)
    }

    fn chunk_extensions(&self, payload: &Value, known: &[&str]) -> Map<String, Value> {
        if !self.preserve_extensions {
            return Map::new();
        }
        payload
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !known.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn merge(&self, payload: &mut Value, extensions: &Map<String, Value>) {
        if !self.preserve_extensions || extensions.is_empty() {
            return;
        }
        if let Some(obj) = payload.as_object_mut() {
            for (k, v) in extensions {
                obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
}

fn frame_of(payload: &Value) -> String {
    format!("data: {payload}\n\n")
}

/// Drive a transcoder over an upstream byte source. The output stream pulls
/// one upstream read at a time (no read-ahead past the sink), and dropping
/// it releases the upstream handle on every exit path.
pub fn transcode_stream<S, E>(
    source: S,
    mut transcoder: StreamTranscoder,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        tokio::pin!(source);

        while let Some(read) = source.next().await {
            match read {
                Ok(bytes) => {
                    for frame in transcoder.transcode(&bytes) {
                        yield Ok(Bytes::from(frame));
                    }
                    if transcoder.finished() && transcoder.emitted_done {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upstream byte stream failed");
                    break;
                }
            }
        }

        if let Some(frame) = transcoder.finish() {
            yield Ok(Bytes::from(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transcoder(from: Provider, to: Provider) -> StreamTranscoder {
        let ctx = ConversionContext::new(from, to);
        StreamTranscoder::new(&ctx, "test-model")
    }

    fn openai_data_line(content: &str) -> String {
        format!(
            "data: {}\n",
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 0,
                "model": "gpt-4o",
                "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
            })
        )
    }

    #[test]
    fn test_order_preserved_across_chunks() {
        let mut t = transcoder(Provider::OpenAi, Provider::Ollama);
        let mut input = String::new();
        for word in ["alpha", "beta", "gamma"] {
            input.push_str(&openai_data_line(word));
        }
        input.push_str("data: [DONE]\n");

        let frames = t.transcode(input.as_bytes());

        // three content frames, then the final done frame + terminator
        assert_eq!(frames.len(), 4);
        assert!(frames[0].contains("alpha"));
        assert!(frames[1].contains("beta"));
        assert!(frames[2].contains("gamma"));
        assert!(frames[3].contains("\"done\":true"));
        assert!(frames[3].ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn test_malformed_line_dropped_only() {
        let mut t = transcoder(Provider::OpenAi, Provider::Ollama);
        let mut input = openai_data_line("one");
        input.push_str("data: {not json at all\n");
        input.push_str(&openai_data_line("two"));
        input.push_str("data: [DONE]\n");

        let frames = t.transcode(input.as_bytes());

        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("one"));
        assert!(frames[1].contains("two"));
        assert_eq!(t.dropped_lines(), 1);
    }

    #[test]
    fn test_comments_and_keepalives_ignored() {
        let mut t = transcoder(Provider::OpenAi, Provider::Ollama);
        let input = format!(": keep-alive\nevent: message\n{}", openai_data_line("hi"));

        let frames = t.transcode(input.as_bytes());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("hi"));
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut t = transcoder(Provider::OpenAi, Provider::Ollama);
        let line = openai_data_line("héllo ☃");
        let bytes = line.as_bytes();

        // Split inside the snowman's three-byte sequence.
        let split = line.find('☃').unwrap() + 1;
        let mut frames = t.transcode(&bytes[..split]);
        frames.extend(t.transcode(&bytes[split..]));

        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("héllo ☃"));
    }

    #[test]
    fn test_utf8_reader_replaces_invalid_bytes() {
        let mut reader = Utf8Reader::default();
        let out = reader.push(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_ollama_to_openai_stream() {
        let mut t = transcoder(Provider::Ollama, Provider::OpenAi);
        let input = concat!(
            "data: {\"model\":\"llama3\",\"created_at\":\"x\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "data: {\"model\":\"llama3\",\"created_at\":\"x\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "data: {\"model\":\"llama3\",\"created_at\":\"x\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":4,\"eval_count\":2}\n",
        );

        let frames = t.transcode(input.as_bytes());

        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("chat.completion.chunk"));
        assert!(frames[0].contains("Hel"));
        assert!(frames[0].contains("\"role\":\"assistant\""));
        assert!(frames[2].contains("\"finish_reason\":\"stop\""));
        assert!(frames[2].contains("\"total_tokens\":6"));
        assert!(frames[2].ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn test_done_terminator_emitted_once() {
        let mut t = transcoder(Provider::Ollama, Provider::OpenAi);
        let input = concat!(
            "data: {\"model\":\"m\",\"created_at\":\"x\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
            "data: [DONE]\n",
        );

        let frames = t.transcode(input.as_bytes());
        let all: String = frames.concat();
        assert_eq!(all.matches(DONE_SENTINEL).count(), 1);
        assert!(t.finish().is_none());
    }

    #[test]
    fn test_finish_flushes_when_upstream_never_completed() {
        let mut t = transcoder(Provider::OpenAi, Provider::Ollama);
        let frames = t.transcode(openai_data_line("partial").as_bytes());
        assert_eq!(frames.len(), 1);

        let tail = t.finish().expect("final frame");
        assert!(tail.contains("\"done\":true"));
        assert!(tail.ends_with("data: [DONE]\n\n"));
        assert!(t.finish().is_none());
    }

    #[test]
    fn test_tool_call_delta_passthrough_openai_to_openai() {
        let mut t = transcoder(Provider::OpenAi, Provider::OpenAi);
        let line = format!(
            "data: {}\n",
            json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
                "choices": [{"index": 0, "delta": {"tool_calls": [{
                    "index": 0, "id": "call_7", "type": "function",
                    "function": {"name": "search", "arguments": "{\"q\""}
                }]}, "finish_reason": null}]
            })
        );

        let frames = t.transcode(line.as_bytes());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("call_7"));
        assert!(frames[0].contains("search"));
    }

    #[test]
    fn test_extensions_preserved_on_chunks() {
        let mut ctx = ConversionContext::new(Provider::OpenAi, Provider::OpenAi);
        ctx.preserve_extensions = true;
        let mut t = StreamTranscoder::new(&ctx, "m");

        let line = format!(
            "data: {}\n",
            json!({
                "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
                "choices": [{"index": 0, "delta": {"content": "x"}, "finish_reason": null}],
                "vendor_trace": {"hop": 3}
            })
        );

        let frames = t.transcode(line.as_bytes());
        assert!(frames[0].contains("vendor_trace"));
    }

    #[tokio::test]
    async fn test_transcode_stream_end_to_end() {
        let reads: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(openai_data_line("str"))),
            Ok(Bytes::from(openai_data_line("eam"))),
            Ok(Bytes::from("data: [DONE]\n")),
        ];
        let source = futures::stream::iter(reads);

        let ctx = ConversionContext::new(Provider::OpenAi, Provider::Ollama);
        let transcoder = StreamTranscoder::new(&ctx, "m");

        let frames: Vec<_> = transcode_stream(source, transcoder)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| String::from_utf8(r.unwrap().to_vec()).unwrap())
            .collect();

        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("str"));
        assert!(frames[1].contains("eam"));
        assert!(frames[2].ends_with("data: [DONE]\n\n"));
    }
}
