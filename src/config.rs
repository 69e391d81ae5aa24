//! TOML configuration for the bridge server.

use crate::error::{BridgeError, Result};
use crate::providers::{Provider, UpstreamPreset};
use crate::tools::{DEFAULT_REINJECTION_INTERVAL, DEFAULT_REMINDER_TOKEN_BUDGET};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub backend: BackendConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Source-model to backend-model renames.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub preserve_extensions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_reinjection_interval")]
    pub reinjection_interval: usize,
    #[serde(default = "default_reminder_token_budget")]
    pub reminder_token_budget: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            reinjection_interval: DEFAULT_REINJECTION_INTERVAL,
            reminder_token_budget: DEFAULT_REMINDER_TOKEN_BUDGET,
        }
    }
}

fn default_port() -> u16 {
    4100
}

fn default_reinjection_interval() -> usize {
    DEFAULT_REINJECTION_INTERVAL
}

fn default_reminder_token_budget() -> usize {
    DEFAULT_REMINDER_TOKEN_BUDGET
}

impl BridgeConfig {
    /// Minimal config for a given backend, used when no file is found.
    #[must_use]
    pub fn for_backend(provider: Provider) -> Self {
        Self {
            port: default_port(),
            backend: BackendConfig {
                provider,
                base_url: None,
                api_key_env: None,
            },
            defaults: DefaultsConfig::default(),
            tools: ToolsConfig::default(),
            models: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(BridgeError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Effective base URL: config override or the backend's preset default.
    #[must_use]
    pub fn effective_base_url(&self) -> String {
        self.backend
            .base_url
            .clone()
            .unwrap_or_else(|| self.preset().base_url.to_string())
    }

    /// Full URL of the backend's chat endpoint.
    #[must_use]
    pub fn chat_url(&self) -> String {
        format!(
            "{}{}",
            self.effective_base_url().trim_end_matches('/'),
            self.preset().chat_path
        )
    }

    /// API key from the configured environment variable, `None` when the
    /// backend needs no key (local Ollama).
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        let env = self
            .backend
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.preset().default_api_key_env.to_string());
        if env.is_empty() {
            return Ok(None);
        }
        std::env::var(&env).map(Some).map_err(|_| {
            BridgeError::config(format!(
                "Environment variable '{env}' not set. Set it with your backend API key."
            ))
        })
    }

    fn preset(&self) -> &'static UpstreamPreset {
        UpstreamPreset::for_provider(self.backend.provider)
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("llm-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("llm-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("llm-bridge").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("llm-bridge").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".llm-bridge.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5100

[backend]
provider = "ollama"
base_url = "http://gpu-box:11434"

[defaults]
strict = true

[tools]
reinjection_interval = 4

[models]
"gpt-4o" = "llama3.1:70b"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5100);
        assert_eq!(config.backend.provider, Provider::Ollama);
        assert!(config.defaults.strict);
        assert!(!config.defaults.preserve_extensions);
        assert_eq!(config.tools.reinjection_interval, 4);
        assert_eq!(
            config.tools.reminder_token_budget,
            DEFAULT_REMINDER_TOKEN_BUDGET
        );
        assert_eq!(config.models.get("gpt-4o"), Some(&"llama3.1:70b".to_string()));
    }

    #[test]
    fn test_chat_url_from_preset() {
        let config = BridgeConfig::for_backend(Provider::Ollama);
        assert_eq!(config.chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let mut config = BridgeConfig::for_backend(Provider::OpenAi);
        config.backend.base_url = Some("https://my-proxy.example/v1/".to_string());
        assert_eq!(
            config.chat_url(),
            "https://my-proxy.example/v1/chat/completions"
        );
    }

    #[test]
    fn test_ollama_needs_no_api_key() {
        let config = BridgeConfig::for_backend(Provider::Ollama);
        assert!(config.resolve_api_key().unwrap().is_none());
    }

    #[test]
    fn test_malformed_toml_is_a_config_error() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "port = \"not a number\"").unwrap();
        assert!(BridgeConfig::load(f.path()).is_err());
    }
}
