//! Model-name policy.
//!
//! Decides which upstream model serves a nominal Claude model name, and what
//! that choice implies for the request: chain-of-thought prompting, the
//! provider's token ceiling, flat message content, structured tool blocks.
//! [`ModelPolicy::resolve`] is pure; the request envelope is built from its
//! output and never mutated afterwards.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::RelayConfig;
use crate::providers::ProviderPreset;
use crate::translate::anthropic_types::SystemContent;

pub const COT_SYSTEM_PROMPT: &str = "You are a helpful assistant that uses chain-of-thought reasoning. For complex questions, always break down your reasoning step-by-step before giving an answer.";

/// Hard output ceiling of the DeepSeek and Gemini chat endpoints.
pub const MAX_TOKENS_CAP: u64 = 8192;

/// Prefixes removed before looking at the model family.
const PROVIDER_PREFIXES: [&str; 3] = ["anthropic/", "deepseek/", "gemini/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// "haiku" names, served by the small model.
    Small,
    /// "sonnet" names, served by the big model.
    Big,
    /// Anything else, including config aliases.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct ModelPolicy {
    pub big_model: String,
    pub small_model: String,
    pub always_cot: bool,
    pub aliases: HashMap<String, String>,
}

/// Output of [`ModelPolicy::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// Fully prefixed upstream id, e.g. `gemini/gemini-2.0-flash`.
    pub target_model: String,
    /// The name the client asked for. Echoed back in responses.
    pub original_model: String,
    pub tier: ModelTier,
    /// System prompt after any reasoning augmentation.
    pub system: Option<SystemContent>,
    /// True when the chain-of-thought prompt was injected.
    pub reasoning_enabled: bool,
    /// Value for `metadata.thinking.enabled`, when one should be sent.
    pub thinking_metadata: Option<bool>,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl ModelPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            big_model: config.big_model.clone(),
            small_model: config.small_model.clone(),
            always_cot: config.always_cot,
            aliases: config.models.clone(),
        }
    }

    pub fn resolve(
        &self,
        nominal: &str,
        thinking: Option<&Value>,
        system: Option<&SystemContent>,
    ) -> ResolvedModel {
        let requested = thinking.filter(|v| !v.is_null()).map(thinking_enabled);

        let (target_model, tier) = if let Some(alias) = self.aliases.get(nominal) {
            (alias.clone(), ModelTier::Passthrough)
        } else {
            let name = nominal.strip_prefix("anthropic/").unwrap_or(nominal);
            let lower = name.to_lowercase();
            if lower.contains("haiku") {
                (with_prefix("gemini/", &self.small_model), ModelTier::Small)
            } else if lower.contains("sonnet") {
                (with_prefix("deepseek/", &self.big_model), ModelTier::Big)
            } else {
                (with_prefix("deepseek/", name), ModelTier::Passthrough)
            }
        };

        let reasoning_enabled =
            tier == ModelTier::Big && (self.always_cot || requested == Some(true));

        let system = if reasoning_enabled {
            Some(match system {
                Some(existing) if !existing.is_empty() => existing.with_prefix(COT_SYSTEM_PROMPT),
                _ => SystemContent::Text(COT_SYSTEM_PROMPT.to_string()),
            })
        } else {
            system.cloned()
        };

        if target_model != nominal {
            tracing::debug!(
                from = %nominal,
                to = %target_model,
                cot = reasoning_enabled,
                "model mapping"
            );
        }

        ResolvedModel {
            target_model,
            original_model: nominal.to_string(),
            tier,
            system,
            reasoning_enabled,
            thinking_metadata: requested.or(reasoning_enabled.then_some(true)),
        }
    }
}

impl ResolvedModel {
    pub fn supports_tool_blocks(&self) -> bool {
        supports_tool_blocks(&self.target_model)
    }

    pub fn requires_token_cap(&self) -> bool {
        requires_token_cap(&self.target_model)
    }

    pub fn requires_flat_messages(&self) -> bool {
        requires_flat_messages(&self.target_model)
    }
}

/// Whether a `thinking` value asks for reasoning. Presence alone counts, except
/// an explicit `false` or an object whose `enabled` is falsy.
pub fn thinking_enabled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Object(obj) => match obj.get("enabled") {
            Some(enabled) => truthy(enabled),
            None => true,
        },
        _ => true,
    }
}

/// Model name with any provider prefix removed.
pub fn clean_model_name(model: &str) -> &str {
    PROVIDER_PREFIXES
        .iter()
        .find_map(|p| model.strip_prefix(p))
        .unwrap_or(model)
}

/// Only Claude models hand back tool calls the client can take as blocks.
pub fn supports_tool_blocks(model: &str) -> bool {
    clean_model_name(model).starts_with("claude-")
}

pub fn requires_token_cap(model: &str) -> bool {
    model.starts_with("deepseek/") || model.starts_with("gemini/")
}

pub fn requires_flat_messages(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("deepseek") || lower.contains("gemini")
}

fn with_prefix(prefix: &str, model: &str) -> String {
    if ProviderPreset::has_known_prefix(model) {
        model.to_string()
    } else {
        format!("{prefix}{model}")
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::SystemBlock;
    use serde_json::json;

    fn policy() -> ModelPolicy {
        ModelPolicy::default()
    }

    #[test]
    fn test_haiku_maps_to_small_model() {
        let resolved = policy().resolve("claude-3-haiku-20240307", None, None);
        assert_eq!(resolved.target_model, "gemini/gemini-2.0-flash");
        assert_eq!(resolved.original_model, "claude-3-haiku-20240307");
        assert_eq!(resolved.tier, ModelTier::Small);
        assert!(resolved.system.is_none());
        assert!(resolved.thinking_metadata.is_none());
    }

    #[test]
    fn test_sonnet_maps_to_big_model() {
        let resolved = policy().resolve("anthropic/claude-3-5-sonnet-20241022", None, None);
        assert_eq!(resolved.target_model, "deepseek/deepseek-chat");
        assert_eq!(resolved.tier, ModelTier::Big);
        assert!(!resolved.reasoning_enabled);
    }

    #[test]
    fn test_other_names_get_deepseek_prefix_once() {
        let p = policy();
        assert_eq!(p.resolve("deepseek-coder", None, None).target_model, "deepseek/deepseek-coder");
        assert_eq!(p.resolve("deepseek/deepseek-coder", None, None).target_model, "deepseek/deepseek-coder");
        assert_eq!(p.resolve("gemini/gemini-pro", None, None).target_model, "gemini/gemini-pro");
    }

    #[test]
    fn test_alias_wins_over_tier() {
        let mut p = policy();
        p.aliases.insert(
            "claude-3-5-sonnet-latest".to_string(),
            "anthropic/claude-3-5-sonnet-latest".to_string(),
        );
        let resolved = p.resolve("claude-3-5-sonnet-latest", Some(&json!(true)), None);
        assert_eq!(resolved.target_model, "anthropic/claude-3-5-sonnet-latest");
        assert!(resolved.supports_tool_blocks());
        assert!(!resolved.reasoning_enabled);
        assert_eq!(resolved.thinking_metadata, Some(true));
    }

    #[test]
    fn test_thinking_enabled_rule() {
        assert!(thinking_enabled(&json!(true)));
        assert!(!thinking_enabled(&json!(false)));
        assert!(thinking_enabled(&json!({"enabled": true})));
        assert!(!thinking_enabled(&json!({"enabled": false})));
        assert!(thinking_enabled(&json!({"type": "enabled", "budget_tokens": 1024})));
        assert!(thinking_enabled(&json!("yes")));
        assert!(!thinking_enabled(&Value::Null));
    }

    #[test]
    fn test_cot_prepended_to_string_system() {
        let system = SystemContent::Text("Be terse.".to_string());
        let resolved = policy().resolve("claude-3-7-sonnet", Some(&json!({"enabled": true})), Some(&system));
        assert!(resolved.reasoning_enabled);
        assert_eq!(
            resolved.system.unwrap().as_text(),
            format!("{COT_SYSTEM_PROMPT}\n\nBe terse.")
        );
        assert_eq!(resolved.thinking_metadata, Some(true));
    }

    #[test]
    fn test_cot_inserted_into_block_system() {
        let system = SystemContent::Blocks(vec![SystemBlock::Text {
            text: "rules".to_string(),
        }]);
        let resolved = policy().resolve("claude-sonnet-4", Some(&json!(true)), Some(&system));
        match resolved.system.unwrap() {
            SystemContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                let SystemBlock::Text { text } = &blocks[0];
                assert_eq!(text, COT_SYSTEM_PROMPT);
            }
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn test_cot_creates_system_when_absent() {
        let mut p = policy();
        p.always_cot = true;
        let resolved = p.resolve("claude-3-5-sonnet", None, None);
        assert_eq!(resolved.system.unwrap().as_text(), COT_SYSTEM_PROMPT);
        assert_eq!(resolved.thinking_metadata, Some(true));
    }

    #[test]
    fn test_explicitly_disabled_thinking_leaves_system_alone() {
        let system = SystemContent::Text("You are helpful.".to_string());
        let resolved = policy().resolve(
            "claude-3-5-sonnet",
            Some(&json!({"enabled": false})),
            Some(&system),
        );
        assert!(!resolved.reasoning_enabled);
        assert_eq!(resolved.system.unwrap().as_text(), "You are helpful.");
        assert_eq!(resolved.thinking_metadata, Some(false));
    }

    #[test]
    fn test_thinking_does_not_augment_small_tier() {
        let resolved = policy().resolve("claude-3-haiku", Some(&json!(true)), None);
        assert!(!resolved.reasoning_enabled);
        assert!(resolved.system.is_none());
    }

    #[test]
    fn test_capability_predicates() {
        assert_eq!(clean_model_name("anthropic/claude-3-opus"), "claude-3-opus");
        assert!(supports_tool_blocks("anthropic/claude-3-opus"));
        assert!(!supports_tool_blocks("deepseek/deepseek-chat"));
        assert!(requires_token_cap("gemini/gemini-2.0-flash"));
        assert!(!requires_token_cap("openai/gpt-4o"));
        assert!(requires_flat_messages("deepseek/deepseek-chat"));
        assert!(!requires_flat_messages("anthropic/claude-3-opus"));
    }
}
