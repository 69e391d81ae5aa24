//! Translation orchestrator.
//!
//! Drives the `Detect -> CheckCompatibility -> Convert` pipeline and packages
//! the outcome as a [`TranslationResult`]. Translation failures never cross
//! this boundary as `Err` or a panic; they are values inside the result so
//! every caller (HTTP handler, CLI, tests) reports them the same way.

use crate::compat::{check_compatibility, CompatibilityResult, RequestFeatures};
use crate::detect::detect_provider;
use crate::error::{BridgeError, TranslationFailure};
use crate::providers::Provider;
use crate::translate::canonical::{ConversionContext, ConversionNotes};
use crate::translate::streaming::{transcode_stream, StreamTranscoder};
use crate::translate::{request, response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inputs for one translation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOptions {
    /// Source format; `None` asks the engine to detect it from the payload.
    #[serde(default)]
    pub from: Option<Provider>,
    pub to: Provider,
    pub request: Value,
    #[serde(default)]
    pub model_map: HashMap<String, String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub preserve_extensions: bool,
    /// Tool-emulation reinjection interval; `None` keeps the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinjection_interval: Option<usize>,
    /// Token budget for the reinforcement reminder; `None` keeps the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_token_budget: Option<usize>,
    /// Caller-supplied id for log correlation; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl TranslationOptions {
    #[must_use]
    pub fn new(to: Provider, request: Value) -> Self {
        Self {
            from: None,
            to,
            request,
            model_map: HashMap::new(),
            strict: false,
            preserve_extensions: false,
            reinjection_interval: None,
            reminder_token_budget: None,
            request_id: None,
        }
    }

    fn context(&self, from: Provider) -> ConversionContext {
        let mut ctx = ConversionContext::new(from, self.to);
        if let Some(id) = &self.request_id {
            ctx.request_id = id.clone();
        }
        ctx.model_map = self.model_map.clone();
        ctx.strict = self.strict;
        ctx.preserve_extensions = self.preserve_extensions;
        if let Some(interval) = self.reinjection_interval {
            ctx.reinjection_interval = interval;
        }
        if let Some(budget) = self.reminder_token_budget {
            ctx.reminder_token_budget = budget;
        }
        ctx
    }
}

/// One entry in the append-only transformation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationStep {
    pub step: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Full outcome of a translation call. `success == false` exactly when
/// `error` is set and `data` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TranslationFailure>,
    pub compatibility: CompatibilityResult,
    pub context: ConversionContext,
    pub transformations: Vec<TransformationStep>,
}

impl TranslationResult {
    fn failed(
        err: &BridgeError,
        compatibility: CompatibilityResult,
        context: ConversionContext,
        transformations: Vec<TransformationStep>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(TranslationFailure::from(err)),
            compatibility,
            context,
            transformations,
        }
    }
}

/// A streaming translation: the context for the caller's bookkeeping plus
/// the transcoded frame stream.
pub struct StreamTranslationResult<St> {
    pub context: ConversionContext,
    pub frames: St,
}

/// Append-only step log with monotonic non-decreasing timestamps. Wall-clock
/// regressions (NTP steps) are clamped to the previous entry.
#[derive(Debug, Default)]
struct StepLog {
    steps: Vec<TransformationStep>,
    last: Option<DateTime<Utc>>,
}

impl StepLog {
    fn record(&mut self, step: &str, description: impl Into<String>) {
        let mut now = Utc::now();
        if let Some(last) = self.last {
            now = now.max(last);
        }
        self.last = Some(now);
        self.steps.push(TransformationStep {
            step: step.to_string(),
            description: description.into(),
            timestamp: now,
        });
    }

    fn into_steps(self) -> Vec<TransformationStep> {
        self.steps
    }
}

fn resolve_source(
    options: &TranslationOptions,
    log: &mut StepLog,
) -> std::result::Result<Provider, BridgeError> {
    match options.from {
        Some(from) => {
            log.record("detect", format!("source format given as {from}"));
            Ok(from)
        }
        None => match detect_provider(&options.request) {
            Some(from) => {
                log.record("detect", format!("detected source format {from}"));
                Ok(from)
            }
            None => Err(BridgeError::UnrecognizedFormat),
        },
    }
}

fn strict_conversion_error(notes: &ConversionNotes) -> Option<BridgeError> {
    notes
        .issues
        .first()
        .map(|issue| BridgeError::conversion(issue.path.clone(), issue.message.clone()))
}

/// Translate a request payload from one provider's wire format to another's.
#[must_use]
pub fn translate(options: &TranslationOptions) -> TranslationResult {
    let mut log = StepLog::default();

    let from = match resolve_source(options, &mut log) {
        Ok(from) => from,
        Err(err) => {
            return TranslationResult::failed(
                &err,
                CompatibilityResult::default(),
                options.context(options.to),
                log.into_steps(),
            )
        }
    };
    let ctx = options.context(from);

    let mut notes = ConversionNotes::default();
    let canonical = request::request_to_canonical(&options.request, &ctx, &mut notes);

    let features = RequestFeatures::of(&canonical);
    let compatibility = check_compatibility(ctx.from, ctx.to, &features, ctx.strict);
    log.record(
        "check_compatibility",
        format!(
            "{} -> {}: {} finding(s)",
            ctx.from,
            ctx.to,
            compatibility.entries.len()
        ),
    );

    // Error entries abort only under strict; otherwise the converter
    // degrades the feature and the entries stay in the report.
    if ctx.strict {
        if let Some(entry) = compatibility.first_error() {
            let err = BridgeError::incompatible(entry.feature.as_str(), entry.reason.clone());
            return TranslationResult::failed(&err, compatibility, ctx, log.into_steps());
        }
        if let Some(err) = strict_conversion_error(&notes) {
            return TranslationResult::failed(&err, compatibility, ctx, log.into_steps());
        }
    }

    let data = request::canonical_to_request(&canonical, &ctx, &mut notes);
    log.record("convert", format!("request re-encoded for {}", ctx.to));
    for degradation in &notes.degradations {
        log.record("degrade", degradation.clone());
    }

    if ctx.strict {
        if let Some(err) = strict_conversion_error(&notes) {
            return TranslationResult::failed(&err, compatibility, ctx, log.into_steps());
        }
    }

    TranslationResult {
        success: true,
        data: Some(data),
        error: None,
        compatibility,
        context: ctx,
        transformations: log.into_steps(),
    }
}

/// Translate a response payload. Same pipeline, minus the request-feature
/// compatibility gate (responses carry no sampling surface to check).
#[must_use]
pub fn translate_response(options: &TranslationOptions) -> TranslationResult {
    let mut log = StepLog::default();

    let from = match resolve_source(options, &mut log) {
        Ok(from) => from,
        Err(err) => {
            return TranslationResult::failed(
                &err,
                CompatibilityResult::default(),
                options.context(options.to),
                log.into_steps(),
            )
        }
    };
    let ctx = options.context(from);

    let mut notes = ConversionNotes::default();
    let canonical = response::response_to_canonical(&options.request, &ctx, &mut notes);

    if ctx.strict {
        if let Some(err) = strict_conversion_error(&notes) {
            return TranslationResult::failed(
                &err,
                CompatibilityResult::default(),
                ctx,
                log.into_steps(),
            );
        }
    }

    let data = response::canonical_to_response(&canonical, &ctx, &mut notes);
    log.record("convert", format!("response re-encoded for {}", ctx.to));
    for degradation in &notes.degradations {
        log.record("degrade", degradation.clone());
    }

    if ctx.strict {
        if let Some(err) = strict_conversion_error(&notes) {
            return TranslationResult::failed(
                &err,
                CompatibilityResult::default(),
                ctx,
                log.into_steps(),
            );
        }
    }

    TranslationResult {
        success: true,
        data: Some(data),
        error: None,
        compatibility: CompatibilityResult::default(),
        context: ctx,
        transformations: log.into_steps(),
    }
}

/// Attach a stream transcoder to a byte source. The source format comes from
/// `options.from` (streams carry bytes, not a parseable whole payload, so
/// there is nothing to detect from); `options.request` supplies the model
/// name for re-encoded frames when present.
pub fn translate_stream<S, E>(
    options: &TranslationOptions,
    source: S,
) -> crate::error::Result<
    StreamTranslationResult<impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>,
>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let from = options.from.ok_or(BridgeError::UnrecognizedFormat)?;
    let ctx = options.context(from);

    let model = options
        .request
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let model = ctx.map_model(model);

    let transcoder = StreamTranscoder::new(&ctx, &model);
    Ok(StreamTranslationResult {
        context: ctx,
        frames: transcode_stream(source, transcoder),
    })
}
