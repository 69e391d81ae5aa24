//! Bidirectional translation between provider wire formats.
//!
//! All converters pivot through the canonical form in [`canonical`] and are
//! pure: no I/O, no shared state. The streaming transcoder in [`streaming`]
//! owns its decode state per stream, so concurrent streams never interfere.

pub mod canonical;
pub mod coerce;
pub mod ollama_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

use canonical::ConversionContext;
use serde_json::{Map, Value};

/// Unknown top-level fields go to the extension bag when the context asks
/// for them; otherwise they are dropped and reported by the checker.
pub(crate) fn request_extensions(
    payload: &Value,
    known_keys: &[&str],
    ctx: &ConversionContext,
) -> Map<String, Value> {
    if !ctx.preserve_extensions {
        return Map::new();
    }
    let Some(obj) = payload.as_object() else {
        return Map::new();
    };
    obj.iter()
        .filter(|(k, _)| !known_keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
