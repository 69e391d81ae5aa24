//! HTTP surface: thin glue over the engine and the forwarding proxy.

use crate::compat::{check_compatibility, RequestFeatures};
use crate::config::BridgeConfig;
use crate::detect::detect_provider;
use crate::engine::{self, TranslationOptions};
use crate::logging::SharedLogger;
use crate::providers::Provider;
use crate::translate::canonical::{ConversionContext, ConversionNotes};
use crate::translate::request::request_to_canonical;
use crate::upstream;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/providers", get(handle_providers))
        .route("/translate", post(handle_translate))
        .route("/translate-response", post(handle_translate_response))
        .route("/compatibility", post(handle_compatibility))
        .route(
            "/:target_provider/chat/completions",
            post(handle_chat_completions),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.config.backend.provider.name(),
    }))
}

async fn handle_providers() -> Json<Value> {
    let providers: Vec<Value> = Provider::all()
        .iter()
        .map(|p| {
            json!({
                "name": p.name(),
                "capabilities": p.capabilities(),
            })
        })
        .collect();
    Json(json!({ "providers": providers }))
}

fn error_body(message: impl std::fmt::Display) -> Json<Value> {
    Json(json!({"error": {"message": message.to_string()}}))
}

async fn handle_translate(
    State(state): State<Arc<AppState>>,
    Json(options): Json<TranslationOptions>,
) -> Response {
    let result = engine::translate(&options);
    state.logger.log_with_context(
        crate::logging::LogLevel::Info,
        "translate",
        format!(
            "{} -> {} success={}",
            result.context.from, result.context.to, result.success
        ),
        json!({"request_id": result.context.request_id}),
    );

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(result)).into_response()
}

async fn handle_translate_response(
    State(state): State<Arc<AppState>>,
    Json(options): Json<TranslationOptions>,
) -> Response {
    let result = engine::translate_response(&options);
    state.logger.log_with_context(
        crate::logging::LogLevel::Info,
        "translate_response",
        format!(
            "{} -> {} success={}",
            result.context.from, result.context.to, result.success
        ),
        json!({"request_id": result.context.request_id}),
    );

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(result)).into_response()
}

#[derive(Debug, Deserialize)]
struct CompatibilityQuery {
    #[serde(default)]
    from: Option<Provider>,
    to: Provider,
    request: Value,
    #[serde(default)]
    strict: bool,
}

async fn handle_compatibility(
    State(state): State<Arc<AppState>>,
    Json(query): Json<CompatibilityQuery>,
) -> Response {
    let Some(from) = query.from.or_else(|| detect_provider(&query.request)) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Unrecognized request format"),
        )
            .into_response();
    };

    let ctx = ConversionContext::new(from, query.to);
    let mut notes = ConversionNotes::default();
    let canonical = request_to_canonical(&query.request, &ctx, &mut notes);
    let features = RequestFeatures::of(&canonical);
    let result = check_compatibility(from, query.to, &features, query.strict);

    state.logger.info(
        "compatibility",
        format!("{from} -> {} findings={}", query.to, result.entries.len()),
    );

    Json(json!({
        "from": from,
        "to": query.to,
        "features": features,
        "compatibility": result,
    }))
    .into_response()
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    Path(target_provider): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let Some(target) = Provider::from_name(&target_provider) else {
        return (
            StatusCode::NOT_FOUND,
            error_body(format!(
                "Unknown provider '{target_provider}'. Known: openai, ollama, generic"
            )),
        )
            .into_response();
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {e}"));
            return (
                StatusCode::BAD_REQUEST,
                error_body(format!("Invalid request body: {e}")),
            )
                .into_response();
        }
    };

    let Some(source) = detect_provider(&payload) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Unrecognized request format"),
        )
            .into_response();
    };

    // The path picks the backend for this call; off-config targets fall back
    // to their preset base URL and key env.
    let mut config = state.config.clone();
    if target != config.backend.provider {
        config.backend.provider = target;
        config.backend.base_url = None;
        config.backend.api_key_env = None;
    }

    let is_streaming = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(source == Provider::Ollama);

    state.logger.info(
        "server",
        format!("Request: {source} -> {target} streaming={is_streaming}"),
    );

    if is_streaming {
        handle_streaming(state, &config, &payload, source).await
    } else {
        handle_non_streaming(state, &config, &payload, source).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    config: &BridgeConfig,
    payload: &Value,
    source: Provider,
) -> Response {
    match upstream::forward_non_streaming(payload, source, config, &state.client, &state.logger)
        .await
    {
        Ok(upstream::ForwardResult::Success(resp)) => Json(resp).into_response(),
        Ok(upstream::ForwardResult::Rejected(result)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(*result)).into_response()
        }
        Ok(upstream::ForwardResult::UpstreamError(err, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(err)).into_response()
        }
        Err(e) => {
            state.logger.error("server", format!("Forward error: {e}"));
            (StatusCode::BAD_GATEWAY, error_body(e)).into_response()
        }
    }
}

async fn handle_streaming(
    state: Arc<AppState>,
    config: &BridgeConfig,
    payload: &Value,
    source: Provider,
) -> Response {
    match upstream::forward_streaming(payload, source, config, &state.client, &state.logger).await {
        Ok(Ok(frames)) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(frames))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Ok(Err(result)) => (StatusCode::UNPROCESSABLE_ENTITY, Json(*result)).into_response(),
        Err(e) => {
            state
                .logger
                .error("server", format!("Streaming setup error: {e}"));
            (StatusCode::BAD_GATEWAY, error_body(e)).into_response()
        }
    }
}
