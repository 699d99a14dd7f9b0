use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Target for the "sonnet" tier.
    #[serde(default = "default_big_model")]
    pub big_model: String,
    /// Target for the "haiku" tier.
    #[serde(default = "default_small_model")]
    pub small_model: String,
    /// Inject the chain-of-thought prompt on every big-tier request.
    #[serde(default)]
    pub always_cot: bool,
    /// Downgrade response translation failures into an explanatory 200 reply
    /// instead of an HTTP error.
    #[serde(default = "default_true")]
    pub soft_translation_errors: bool,
    /// Exact nominal-name overrides, checked before the tier policy.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_port() -> u16 {
    8082
}

fn default_big_model() -> String {
    "deepseek-chat".to_string()
}

fn default_small_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            big_model: default_big_model(),
            small_model: default_small_model(),
            always_cot: false,
            soft_translation_errors: true,
            models: HashMap::new(),
            providers: HashMap::new(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. With no file anywhere
    /// the built-in defaults apply.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Base URL for a provider: config override or preset default.
    pub fn base_url_for(&self, preset: &ProviderPreset) -> String {
        self.providers
            .get(preset.name)
            .and_then(|o| o.base_url.clone())
            .unwrap_or_else(|| preset.base_url.to_string())
    }

    /// Read the provider's API key from its environment variable. Resolved per
    /// request so an unused provider never needs a key.
    pub fn api_key_for(&self, preset: &ProviderPreset) -> Result<String> {
        let var = self
            .providers
            .get(preset.name)
            .and_then(|o| o.api_key_env.as_deref())
            .unwrap_or(preset.default_api_key_env);
        std::env::var(var).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your {} API key.",
                var, preset.name
            ))
        })
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-relay.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-relay")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-relay").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("claude-relay").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".claude-relay.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
