//! Error types for the bridge.
//!
//! Core translation failures carry a machine-readable kind so callers can
//! branch without string matching; [`TranslationFailure`] is the serializable
//! projection embedded in translation results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Unrecognized request format")]
    UnrecognizedFormat,

    #[error("Incompatible feature '{feature}': {reason}")]
    IncompatibleFeature { feature: String, reason: String },

    #[error("Conversion failed at `{path}`: {message}")]
    Conversion { path: String, message: String },

    #[error("Stream decode error: {message}")]
    StreamDecode { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn incompatible(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleFeature {
            feature: feature.into(),
            reason: reason.into(),
        }
    }

    pub fn conversion(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn stream_decode(msg: impl Into<String>) -> Self {
        Self::StreamDecode {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
        }
    }

    /// Stable machine-readable kind string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnrecognizedFormat => "unrecognized_format",
            Self::IncompatibleFeature { .. } => "incompatible_feature",
            Self::Conversion { .. } => "conversion_error",
            Self::StreamDecode { .. } => "stream_decode_error",
            Self::Config { .. } => "config_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Http(_) => "http_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Toml(_) => "toml_error",
        }
    }
}

/// Serializable failure carried inside a `TranslationResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationFailure {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

impl From<&BridgeError> for TranslationFailure {
    fn from(err: &BridgeError) -> Self {
        let field_path = match err {
            BridgeError::Conversion { path, .. } => Some(path.clone()),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            field_path,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_failure_carries_path() {
        let err = BridgeError::conversion("messages[2].content", "expected string");
        let failure = TranslationFailure::from(&err);
        assert_eq!(failure.kind, "conversion_error");
        assert_eq!(failure.field_path.as_deref(), Some("messages[2].content"));
    }

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(BridgeError::UnrecognizedFormat.kind(), "unrecognized_format");
        assert_eq!(
            BridgeError::incompatible("tool_calling", "not supported").kind(),
            "incompatible_feature"
        );
    }
}
