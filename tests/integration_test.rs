use futures::StreamExt;
use llm_bridge::config::{BackendConfig, BridgeConfig};
use llm_bridge::engine::{self, TranslationOptions};
use llm_bridge::logging::SharedLogger;
use llm_bridge::providers::Provider;
use serde_json::{json, Value};

fn openai_tool_request() -> Value {
    json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "You are a weather assistant."},
            {"role": "user", "content": "What's the weather in London?"}
        ],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Get current weather for a city",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "city": {"type": "string", "description": "City name"}
                    },
                    "required": ["city"]
                }
            }
        }],
        "temperature": 0.0
    })
}

fn local_ollama_config() -> BridgeConfig {
    let mut config = BridgeConfig::for_backend(Provider::Ollama);
    config.backend = BackendConfig {
        provider: Provider::Ollama,
        base_url: None,
        api_key_env: None,
    };
    config
        .models
        .insert("gpt-4o".to_string(), "llama3.1".to_string());
    config
}

// ────────────────────────────────────────────────────────────────
// Engine tests (no network needed)
// ────────────────────────────────────────────────────────────────

#[test]
fn test_tool_request_folds_into_prompt_for_ollama() {
    let options = TranslationOptions::new(Provider::Ollama, openai_tool_request());
    let result = engine::translate(&options);

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.context.from, Provider::OpenAi);

    let data = result.data.unwrap();
    assert!(data.get("tools").is_none());

    let system = data["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("You are a weather assistant."));
    assert!(system.contains("You have access to the following tools:"));
    assert!(system.contains("<get_weather>"));
    assert!(system.contains("Get current weather for a city"));

    // The compatibility report names the degradation.
    assert!(!result.compatibility.is_clean());
    assert!(!result.compatibility.has_errors());
}

#[test]
fn test_strict_mode_rejects_tool_emulation() {
    let mut options = TranslationOptions::new(Provider::Ollama, openai_tool_request());
    options.strict = true;

    let result = engine::translate(&options);

    assert!(!result.success);
    assert!(result.data.is_none());
    assert_eq!(result.error.unwrap().kind, "incompatible_feature");
}

#[test]
fn test_unrecognized_format_is_terminal() {
    let options = TranslationOptions::new(Provider::Ollama, json!({"query": "not a chat payload"}));
    let result = engine::translate(&options);

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, "unrecognized_format");
    assert!(result.transformations.is_empty());
}

#[test]
fn test_ollama_generate_request_to_openai() {
    let payload = json!({
        "model": "llama3.1",
        "prompt": "Why is the sky blue?",
        "system": "Answer like a physicist.",
        "options": {"temperature": 0.3, "num_predict": 200}
    });
    let mut options = TranslationOptions::new(Provider::OpenAi, payload);
    options.from = Some(Provider::Ollama);

    let result = engine::translate(&options);
    assert!(result.success);

    let data = result.data.unwrap();
    assert_eq!(data["messages"][0]["role"], "system");
    assert_eq!(data["messages"][1]["content"], "Why is the sky blue?");
    assert_eq!(data["temperature"], 0.3);
    assert_eq!(data["max_tokens"], 200);
}

#[test]
fn test_response_roundtrip_keeps_usage() {
    let payload = json!({
        "model": "llama3.1",
        "created_at": "2024-05-01T00:00:00Z",
        "message": {"role": "assistant", "content": "Rayleigh scattering."},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 21,
        "eval_count": 7
    });
    let mut options = TranslationOptions::new(Provider::OpenAi, payload);
    options.from = Some(Provider::Ollama);

    let result = engine::translate_response(&options);
    let data = result.data.unwrap();

    assert_eq!(data["object"], "chat.completion");
    assert_eq!(data["choices"][0]["finish_reason"], "stop");
    assert_eq!(data["usage"]["prompt_tokens"], 21);
    assert_eq!(data["usage"]["completion_tokens"], 7);
    assert_eq!(data["usage"]["total_tokens"], 28);
}

// ────────────────────────────────────────────────────────────────
// Streaming over an in-memory byte source
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_translation_over_in_memory_source() {
    let ndjson = concat!(
        "{\"model\":\"llama3.1\",\"created_at\":\"t\",\"message\":{\"role\":\"assistant\",\"content\":\"Blue \"},\"done\":false}\n",
        "{\"model\":\"llama3.1\",\"created_at\":\"t\",\"message\":{\"role\":\"assistant\",\"content\":\"light scatters.\"},\"done\":false}\n",
        "{\"model\":\"llama3.1\",\"created_at\":\"t\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":9,\"eval_count\":3}\n",
    );

    // Feed in awkward splits to exercise buffering.
    let reads: Vec<Result<bytes::Bytes, std::io::Error>> = ndjson
        .as_bytes()
        .chunks(17)
        .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
        .collect();

    let mut options = TranslationOptions::new(Provider::OpenAi, json!({"model": "llama3.1"}));
    options.from = Some(Provider::Ollama);

    let result = engine::translate_stream(&options, futures::stream::iter(reads)).unwrap();
    let frames: Vec<String> = result
        .frames
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| String::from_utf8(r.unwrap().to_vec()).unwrap())
        .collect();

    assert_eq!(frames.len(), 3);
    assert!(frames[0].contains("Blue "));
    assert!(frames[1].contains("light scatters."));
    assert!(frames[2].contains("\"finish_reason\":\"stop\""));

    let all = frames.concat();
    assert_eq!(all.matches("[DONE]").count(), 1);
    assert!(all.ends_with("data: [DONE]\n\n"));
}

// ────────────────────────────────────────────────────────────────
// In-process server
// ────────────────────────────────────────────────────────────────

async fn spawn_server(config: BridgeConfig) -> String {
    let state = std::sync::Arc::new(llm_bridge::AppState {
        config,
        client: reqwest::Client::new(),
        logger: SharedLogger::in_memory(),
    });

    let app = llm_bridge::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_server_translate_roundtrip() {
    let base = spawn_server(local_ollama_config()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let body = json!({
        "to": "ollama",
        "request": openai_tool_request(),
        "model_map": {"gpt-4o": "llama3.1"}
    });

    let resp = client
        .post(format!("{base}/translate"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let result: Value = resp.json().await.unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["data"]["model"], "llama3.1");
    assert_eq!(result["context"]["from"], "openai");
}

#[tokio::test]
async fn test_server_compatibility_report() {
    let base = spawn_server(local_ollama_config()).await;
    let client = reqwest::Client::new();

    let body = json!({"to": "ollama", "request": openai_tool_request()});
    let report: Value = client
        .post(format!("{base}/compatibility"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(report["from"], "openai");
    assert_eq!(report["compatibility"]["entries"][0]["feature"], "tool_calling");
    assert_eq!(report["compatibility"]["entries"][0]["severity"], "warn");
}

// ────────────────────────────────────────────────────────────────
// Integration tests (need a local Ollama at :11434)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires a local Ollama server"]
async fn test_forward_non_streaming_ollama() {
    use llm_bridge::upstream;

    let config = local_ollama_config();
    let client = reqwest::Client::new();
    let logger = SharedLogger::in_memory();
    let payload = json!({
        "model": "llama3.1",
        "messages": [{"role": "user", "content": "Say 'pong' and nothing else."}]
    });

    let result = upstream::forward_non_streaming(
        &payload,
        Provider::OpenAi,
        &config,
        &client,
        &logger,
    )
    .await
    .unwrap();

    match result {
        upstream::ForwardResult::Success(resp) => {
            assert_eq!(resp["object"], "chat.completion");
            println!("Response: {resp}");
        }
        upstream::ForwardResult::Rejected(r) => panic!("rejected: {:?}", r.error),
        upstream::ForwardResult::UpstreamError(err, status) => {
            panic!("backend error ({status}): {err}")
        }
    }
}

#[tokio::test]
#[ignore = "requires a local Ollama server"]
async fn test_full_proxy_streaming_ollama() {
    let base = spawn_server(local_ollama_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/ollama/chat/completions"))
        .json(&json!({
            "model": "llama3.1",
            "messages": [{"role": "user", "content": "Count from 1 to 3."}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("chat.completion.chunk"));
    assert!(body.ends_with("data: [DONE]\n\n"));
}
