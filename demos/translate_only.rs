//! Demonstrate the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use llm_bridge::engine::{self, TranslationOptions};
use llm_bridge::providers::Provider;
use llm_bridge::translate::canonical::ConversionContext;
use llm_bridge::translate::streaming::StreamTranscoder;
use serde_json::json;

fn main() {
    // An OpenAI chat-completions request with a tool attached.
    let request = json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "You are a geography expert. Be concise."},
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": "The capital of France is Paris."},
            {"role": "user", "content": "And Germany?"}
        ],
        "tools": [{
            "type": "function",
            "function": {
                "name": "lookup_country",
                "description": "Look up facts about a country",
                "parameters": {
                    "type": "object",
                    "properties": {"country": {"type": "string"}},
                    "required": ["country"]
                }
            }
        }],
        "temperature": 0.7
    });

    // Translate to the Ollama wire format. The source format is detected,
    // and since Ollama has no native tool calling the definitions get
    // folded into the system prompt.
    let mut options = TranslationOptions::new(Provider::Ollama, request);
    options
        .model_map
        .insert("gpt-4o".to_string(), "llama3.1".to_string());

    let result = engine::translate(&options);

    println!("=== Translated Request (Ollama format) ===");
    println!(
        "{}",
        serde_json::to_string_pretty(result.data.as_ref().unwrap()).unwrap()
    );

    println!();
    println!("=== Compatibility Report ===");
    for entry in &result.compatibility.entries {
        println!(
            "  [{:?}] {}: {}",
            entry.severity,
            entry.feature.as_str(),
            entry.reason
        );
    }

    println!();
    println!("=== Transformation Log ===");
    for step in &result.transformations {
        println!("  {} — {}", step.step, step.description);
    }

    // Translate a simulated Ollama response back to OpenAI shape.
    let response = json!({
        "model": "llama3.1",
        "created_at": "2024-05-01T00:00:00Z",
        "message": {"role": "assistant", "content": "The capital of Germany is Berlin."},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 42,
        "eval_count": 8
    });
    let mut back = TranslationOptions::new(Provider::OpenAi, response);
    back.from = Some(Provider::Ollama);
    let back_result = engine::translate_response(&back);

    println!();
    println!("=== Translated Response (OpenAI format) ===");
    println!(
        "{}",
        serde_json::to_string_pretty(back_result.data.as_ref().unwrap()).unwrap()
    );

    // Demonstrate the streaming transcoder over a canned Ollama stream.
    println!();
    println!("=== Streaming Transcode Demo ===");

    let ctx = ConversionContext::new(Provider::Ollama, Provider::OpenAi);
    let mut transcoder = StreamTranscoder::new(&ctx, "llama3.1");

    let stream_lines = [
        r#"{"model":"llama3.1","created_at":"t","message":{"role":"assistant","content":"The"},"done":false}"#,
        r#"{"model":"llama3.1","created_at":"t","message":{"role":"assistant","content":" capital"},"done":false}"#,
        r#"{"model":"llama3.1","created_at":"t","message":{"role":"assistant","content":" is Berlin."},"done":false}"#,
        r#"{"model":"llama3.1","created_at":"t","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
    ];

    for line in stream_lines {
        for frame in transcoder.transcode(format!("{line}\n").as_bytes()) {
            print!("{frame}");
        }
    }

    println!("Done! The translation layer works without any network calls.");
}
