//! Forwarding proxy: run a request through the full translation pipeline,
//! send it to the configured backend over reqwest, and translate the answer
//! (complete or streamed) back into the caller's format.

use crate::config::BridgeConfig;
use crate::engine::{translate, translate_response, TranslationOptions, TranslationResult};
use crate::error::{BridgeError, Result};
use crate::logging::SharedLogger;
use crate::providers::Provider;
use crate::translate::canonical::ConversionContext;
use crate::translate::openai_types::ChatErrorResponse;
use crate::translate::streaming::{transcode_stream, StreamTranscoder};

use bytes::Bytes;
use futures::Stream;
use serde_json::{json, Value};
use std::pin::Pin;

/// Outcome of forwarding a non-streaming request.
pub enum ForwardResult {
    /// Backend answered; the body is translated back to the caller's format.
    Success(Value),
    /// Translation refused the request before any network call.
    Rejected(Box<TranslationResult>),
    /// Backend returned an error status; body passed through as-is.
    UpstreamError(Value, u16),
}

/// Transcoded SSE frames flowing back to the caller.
pub type FrameStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

fn forward_options(payload: &Value, source: Provider, config: &BridgeConfig) -> TranslationOptions {
    let mut options = TranslationOptions::new(config.backend.provider, payload.clone());
    options.from = Some(source);
    options.model_map = config.models.clone();
    options.strict = config.defaults.strict;
    options.preserve_extensions = config.defaults.preserve_extensions;
    options.reinjection_interval = Some(config.tools.reinjection_interval);
    options.reminder_token_budget = Some(config.tools.reminder_token_budget);
    options
}

fn apply_auth(
    builder: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => builder.header("Authorization", format!("Bearer {key}")),
        None => builder,
    }
}

/// Forward a non-streaming request through the configured backend.
pub async fn forward_non_streaming(
    payload: &Value,
    source: Provider,
    config: &BridgeConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<ForwardResult> {
    let api_key = config.resolve_api_key()?;
    let url = config.chat_url();

    let options = forward_options(payload, source, config);
    let result = translate(&options);
    if !result.success {
        return Ok(ForwardResult::Rejected(Box::new(result)));
    }
    let mut outgoing = result.data.clone().unwrap_or(Value::Null);
    set_stream_flag(&mut outgoing, config.backend.provider, false);

    logger.info(
        "upstream",
        format!(
            "POST {} model={} id={}",
            url,
            outgoing.get("model").and_then(Value::as_str).unwrap_or("?"),
            result.context.request_id
        ),
    );

    let response = apply_auth(client.post(&url), api_key.as_deref())
        .header("Content-Type", "application/json")
        .json(&outgoing)
        .send()
        .await
        .map_err(|e| BridgeError::upstream(format!("Request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| BridgeError::upstream(format!("Failed to read response body: {e}")))?;

    logger.log_with_context(
        crate::logging::LogLevel::Debug,
        "upstream",
        format!("Response status={} body_len={}", status, body.len()),
        json!({"request_id": result.context.request_id}),
    );

    if status >= 400 {
        if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(&body) {
            logger.warn("upstream", format!("Backend error: {}", err.error.message));
            return Ok(ForwardResult::UpstreamError(
                serde_json::to_value(&err).unwrap_or(Value::Null),
                status,
            ));
        }
        logger.warn("upstream", format!("Backend error status={status}"));
        let error_body = json!({"error": {"message": format!(
            "Backend returned status {}: {}", status, truncate(&body, 500)
        )}});
        return Ok(ForwardResult::UpstreamError(error_body, status));
    }

    let backend_response: Value = serde_json::from_str(&body).map_err(|e| {
        BridgeError::upstream(format!(
            "Failed to parse backend response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    // Translate the answer back into the caller's format.
    let mut back = TranslationOptions::new(source, backend_response);
    back.from = Some(config.backend.provider);
    back.preserve_extensions = config.defaults.preserve_extensions;
    back.request_id = Some(result.context.request_id.clone());
    let response_result = translate_response(&back);

    match response_result.data {
        Some(data) => {
            logger.info(
                "upstream",
                format!("Completed id={}", result.context.request_id),
            );
            Ok(ForwardResult::Success(data))
        }
        None => Ok(ForwardResult::Rejected(Box::new(response_result))),
    }
}

/// Forward a streaming request, returning transcoded frames in the
/// caller's chunk format.
pub async fn forward_streaming(
    payload: &Value,
    source: Provider,
    config: &BridgeConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<std::result::Result<FrameStream, Box<TranslationResult>>> {
    let api_key = config.resolve_api_key()?;
    let url = config.chat_url();

    let options = forward_options(payload, source, config);
    let result = translate(&options);
    if !result.success {
        return Ok(Err(Box::new(result)));
    }
    let mut outgoing = result.data.clone().unwrap_or(Value::Null);
    set_stream_flag(&mut outgoing, config.backend.provider, true);

    let model = outgoing
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    logger.info(
        "upstream",
        format!(
            "POST {url} model={model} id={} (streaming)",
            result.context.request_id
        ),
    );

    let response = apply_auth(client.post(&url), api_key.as_deref())
        .header("Content-Type", "application/json")
        .json(&outgoing)
        .send()
        .await
        .map_err(|e| BridgeError::upstream(format!("Streaming request failed: {e}")))?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        logger.warn(
            "upstream",
            format!("Streaming error status={}: {}", status, truncate(&body, 300)),
        );
        return Err(BridgeError::upstream(format!(
            "Backend returned status {status}"
        )));
    }

    // Chunks flow backend -> caller, so the transcoder runs to->from
    // relative to the request context.
    let mut ctx = ConversionContext::new(config.backend.provider, source);
    ctx.request_id = result.context.request_id.clone();
    ctx.preserve_extensions = config.defaults.preserve_extensions;
    let transcoder = StreamTranscoder::new(&ctx, &model);

    let frames = transcode_stream(response.bytes_stream(), transcoder);
    Ok(Ok(Box::pin(frames)))
}

fn set_stream_flag(payload: &mut Value, target: Provider, streaming: bool) {
    if let Some(obj) = payload.as_object_mut() {
        // Ollama streams by default; only an explicit false suppresses it.
        if streaming && target == Provider::Ollama {
            obj.remove("stream");
        } else {
            obj.insert("stream".to_string(), Value::Bool(streaming));
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_flag_set_for_openai() {
        let mut payload = json!({"model": "gpt-4o"});
        set_stream_flag(&mut payload, Provider::OpenAi, true);
        assert_eq!(payload["stream"], true);

        set_stream_flag(&mut payload, Provider::OpenAi, false);
        assert_eq!(payload["stream"], false);
    }

    #[test]
    fn test_ollama_streams_by_default() {
        let mut payload = json!({"model": "llama3", "stream": true});
        set_stream_flag(&mut payload, Provider::Ollama, true);
        assert!(payload.get("stream").is_none());

        set_stream_flag(&mut payload, Provider::Ollama, false);
        assert_eq!(payload["stream"], false);
    }

    #[test]
    fn test_forward_options_carry_tool_settings() {
        let mut config = BridgeConfig::for_backend(Provider::Ollama);
        config.tools.reinjection_interval = 3;
        config.tools.reminder_token_budget = 64;

        let options = forward_options(&json!({"model": "m"}), Provider::OpenAi, &config);
        assert_eq!(options.reinjection_interval, Some(3));
        assert_eq!(options.reminder_token_budget, Some(64));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ab☃cd";
        let cut = truncate(s, 3);
        assert!(cut.len() <= 3);
        assert!(s.starts_with(cut));
    }
}
