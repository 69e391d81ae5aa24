//! The closed set of supported providers and their capability table.
//!
//! Each provider is an LLM backend's HTTP API shape. The static capability
//! table drives the compatibility checker and decides whether tool definitions
//! route to the target's native mechanism or to prompt injection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
    /// An OpenAI-wire-compatible backend with a reduced feature set
    /// (no native tool calling, text-only). Target-only: never detected.
    Generic,
}

impl Provider {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Generic => "generic",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    #[must_use]
    pub fn all() -> &'static [Provider] {
        &[Self::OpenAi, Self::Ollama, Self::Generic]
    }

    #[must_use]
    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            Self::OpenAi => &OPENAI_CAPS,
            Self::Ollama => &OLLAMA_CAPS,
            Self::Generic => &GENERIC_CAPS,
        }
    }

    /// Whether this provider serializes requests/responses on the OpenAI wire
    /// shape (Generic does, with fewer supported features).
    #[must_use]
    pub fn openai_wire(self) -> bool {
        matches!(self, Self::OpenAi | Self::Generic)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a provider's API can natively express.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub tool_calling: bool,
    pub system_messages: bool,
    pub multimodal: bool,
    pub logprobs: bool,
    pub n_sampling: bool,
    pub stop_sequences: bool,
}

const OPENAI_CAPS: Capabilities = Capabilities {
    tool_calling: true,
    system_messages: true,
    multimodal: true,
    logprobs: true,
    n_sampling: true,
    stop_sequences: true,
};

// Ollama's chat endpoint takes system messages, images and stop options but
// has no tool-call message type; tools are emulated through the prompt.
const OLLAMA_CAPS: Capabilities = Capabilities {
    tool_calling: false,
    system_messages: true,
    multimodal: true,
    logprobs: false,
    n_sampling: false,
    stop_sequences: true,
};

const GENERIC_CAPS: Capabilities = Capabilities {
    tool_calling: false,
    system_messages: true,
    multimodal: false,
    logprobs: false,
    n_sampling: false,
    stop_sequences: true,
};

/// Connection preset for forwarding to a real backend of this shape.
#[derive(Debug, Clone)]
pub struct UpstreamPreset {
    pub provider: Provider,
    pub base_url: &'static str,
    /// Path of the chat endpoint relative to the base URL.
    pub chat_path: &'static str,
    /// Environment variable holding the API key; empty means no auth header.
    pub default_api_key_env: &'static str,
}

const PRESETS: &[UpstreamPreset] = &[
    UpstreamPreset {
        provider: Provider::OpenAi,
        base_url: "https://api.openai.com/v1",
        chat_path: "/chat/completions",
        default_api_key_env: "OPENAI_API_KEY",
    },
    UpstreamPreset {
        provider: Provider::Ollama,
        base_url: "http://localhost:11434",
        chat_path: "/api/chat",
        default_api_key_env: "",
    },
    UpstreamPreset {
        provider: Provider::Generic,
        base_url: "http://localhost:8000/v1",
        chat_path: "/chat/completions",
        default_api_key_env: "API_KEY",
    },
];

impl UpstreamPreset {
    #[must_use]
    pub fn for_provider(provider: Provider) -> &'static UpstreamPreset {
        PRESETS
            .iter()
            .find(|p| p.provider == provider)
            .unwrap_or(&PRESETS[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names_round_trip() {
        for &p in Provider::all() {
            assert_eq!(Provider::from_name(p.name()), Some(p));
        }
        assert_eq!(Provider::from_name("OpenAI"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_name("nope"), None);
    }

    #[test]
    fn test_openai_supports_everything() {
        let caps = Provider::OpenAi.capabilities();
        assert!(caps.tool_calling && caps.logprobs && caps.n_sampling);
    }

    #[test]
    fn test_ollama_lacks_native_tools() {
        let caps = Provider::Ollama.capabilities();
        assert!(!caps.tool_calling);
        assert!(caps.system_messages);
        assert!(caps.stop_sequences);
    }

    #[test]
    fn test_generic_shares_the_openai_wire() {
        assert!(Provider::OpenAi.openai_wire());
        assert!(Provider::Generic.openai_wire());
        assert!(!Provider::Ollama.openai_wire());
    }

    #[test]
    fn test_presets_cover_all_providers() {
        for &p in Provider::all() {
            assert_eq!(UpstreamPreset::for_provider(p).provider, p);
        }
    }
}
