//! Built-in upstream provider presets.
//!
//! A target model id names its provider with a prefix (`deepseek/deepseek-chat`,
//! `gemini/gemini-2.0-flash`). The preset for that prefix supplies the
//! OpenAI-compatible base URL and the environment variable holding the key.

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub prefix: &'static str,
    pub base_url: &'static str,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "deepseek",
        prefix: "deepseek/",
        base_url: "https://api.deepseek.com/v1",
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "gemini",
        prefix: "gemini/",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        default_api_key_env: "GEMINI_API_KEY",
    },
    ProviderPreset {
        name: "anthropic",
        prefix: "anthropic/",
        base_url: "https://api.anthropic.com/v1",
        default_api_key_env: "ANTHROPIC_API_KEY",
    },
    ProviderPreset {
        name: "openai",
        prefix: "openai/",
        base_url: "https://api.openai.com/v1",
        default_api_key_env: "OPENAI_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        PRESETS.iter().find(|p| p.name == name.to_lowercase())
    }

    /// Find the preset for a prefixed model id and return it with the bare
    /// model name the provider expects.
    #[must_use]
    pub fn for_model(model: &str) -> Option<(&'static ProviderPreset, &str)> {
        PRESETS
            .iter()
            .find_map(|p| model.strip_prefix(p.prefix).map(|bare| (p, bare)))
    }

    /// True if `model` already names a provider.
    #[must_use]
    pub fn has_known_prefix(model: &str) -> bool {
        PRESETS.iter().any(|p| model.starts_with(p.prefix))
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}
