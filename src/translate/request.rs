//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Model resolution has already happened by the time a request gets here: the
//! [`ResolvedModel`] carries the target id and the (possibly augmented) system
//! prompt, and this module only assembles the outgoing request from it.

use super::anthropic_types::{MessagesRequest, Tool, ToolChoice};
use super::normalize::{enforce_flat_content, normalize_message, sanitize_flat_messages};
use super::openai_types::{
    ChatCompletionRequest, ChatFunction, ChatMessage, ChatTool, ChatToolChoice,
    ChatToolChoiceFunction, ChatToolChoiceSpecific, RequestMetadata, StreamOptions, ThinkingFlag,
};
use crate::models::{ResolvedModel, MAX_TOKENS_CAP};

pub const DEFAULT_TEMPERATURE: f64 = 1.0;

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
/// Pure function: takes the request + resolved model, returns the translated request.
pub fn anthropic_to_openai(req: &MessagesRequest, resolved: &ResolvedModel) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = &resolved.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    messages.extend(req.messages.iter().map(normalize_message));

    if resolved.requires_flat_messages() {
        sanitize_flat_messages(&mut messages);
        enforce_flat_content(&mut messages);
    }

    let max_tokens = if resolved.requires_token_cap() {
        cap_max_tokens(req.max_tokens)
    } else {
        req.max_tokens
    };

    let stream = req.is_streaming();
    let stream_options = stream.then_some(StreamOptions {
        include_usage: true,
    });

    ChatCompletionRequest {
        model: resolved.target_model.clone(),
        messages,
        max_tokens,
        temperature: Some(req.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        top_p: req.top_p,
        top_k: req.top_k,
        stream: Some(stream),
        stream_options,
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        tools: req
            .tools
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|tools| tools.iter().map(translate_tool).collect()),
        tool_choice: req.tool_choice.as_ref().map(translate_tool_choice),
        metadata: resolved.thinking_metadata.map(|enabled| RequestMetadata {
            thinking: ThinkingFlag { enabled },
        }),
    }
}

pub fn cap_max_tokens(requested: u64) -> u64 {
    if requested > MAX_TOKENS_CAP {
        tracing::debug!(requested, cap = MAX_TOKENS_CAP, "capping max_tokens");
    }
    requested.min(MAX_TOKENS_CAP)
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters: tool.input_schema.clone(),
        },
    }
}

/// Unrecognized choices fall back to `"auto"`.
fn translate_tool_choice(choice: &ToolChoice) -> ChatToolChoice {
    match (choice.choice_type.as_deref(), &choice.name) {
        (Some("any"), _) => ChatToolChoice::String("any".to_string()),
        (Some("tool"), Some(name)) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
        _ => ChatToolChoice::String("auto".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelPolicy;
    use crate::translate::anthropic_types::{
        ContentBlock, Message, MessageContent, Role, SystemBlock, SystemContent,
    };
    use crate::translate::openai_types::ChatContent;
    use serde_json::json;

    fn translate(req: &MessagesRequest) -> ChatCompletionRequest {
        let resolved =
            ModelPolicy::default().resolve(&req.model, req.thinking.as_ref(), req.system.as_ref());
        anthropic_to_openai(req, &resolved)
    }

    fn translate_with(policy: &ModelPolicy, req: &MessagesRequest) -> ChatCompletionRequest {
        let resolved = policy.resolve(&req.model, req.thinking.as_ref(), req.system.as_ref());
        anthropic_to_openai(req, &resolved)
    }

    #[test]
    fn test_haiku_request_uses_small_model() {
        let req = MessagesRequest::new("claude-3-haiku", 1024, vec![Message::user("hi")]);
        let out = translate(&req);

        assert_eq!(out.model, "gemini/gemini-2.0-flash");
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].text_content(), Some("hi"));
        assert_eq!(out.temperature, Some(1.0));
        assert_eq!(out.stream, Some(false));
        assert!(out.stream_options.is_none());
        assert!(out.metadata.is_none());
    }

    #[test]
    fn test_string_system_prompt_round_trips() {
        let system = "  You are a pirate.\nAlways answer in verse.  ";
        let user = "  indented code\n";
        let mut req = MessagesRequest::new("claude-3-5-sonnet", 100, vec![Message::user(user)]);
        req.system = Some(SystemContent::Text(system.to_string()));

        let out = translate(&req);
        assert!(out.model.starts_with("deepseek/"));
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[0].text_content(), Some(system));
        assert_eq!(out.messages[1].text_content(), Some(user));
    }

    #[test]
    fn test_block_system_prompt_is_joined() {
        let mut req = MessagesRequest::new("claude-3-haiku", 100, vec![Message::user("hi")]);
        req.system = Some(SystemContent::Blocks(vec![
            SystemBlock::Text {
                text: "one".to_string(),
            },
            SystemBlock::Text {
                text: "two".to_string(),
            },
        ]));

        let out = translate(&req);
        assert_eq!(out.messages[0].text_content(), Some("one\n\ntwo"));
    }

    #[test]
    fn test_thinking_adds_cot_and_metadata() {
        let mut req = MessagesRequest::new("claude-3-7-sonnet", 100, vec![Message::user("why?")]);
        req.thinking = Some(json!({"type": "enabled", "budget_tokens": 2048}));

        let out = translate(&req);
        let system = out.messages[0].text_content().unwrap();
        assert!(system.starts_with(crate::models::COT_SYSTEM_PROMPT));
        assert_eq!(
            serde_json::to_value(&out.metadata).unwrap(),
            json!({"thinking": {"enabled": true}})
        );
    }

    #[test]
    fn test_max_tokens_cap_applies_only_to_capped_families() {
        let mut aliased = ModelPolicy::default();
        aliased
            .aliases
            .insert("claude-opus-4".to_string(), "anthropic/claude-opus-4".to_string());

        for requested in [0, 1, 4096, 8191, 8192, 8193, 32_000, u64::MAX] {
            let capped = MessagesRequest::new("claude-3-haiku", requested, vec![Message::user("x")]);
            assert_eq!(translate(&capped).max_tokens, requested.min(8192));

            let uncapped = MessagesRequest::new("claude-opus-4", requested, vec![Message::user("x")]);
            assert_eq!(translate_with(&aliased, &uncapped).max_tokens, requested);
        }
    }

    #[test]
    fn test_tools_and_tool_choice() {
        let mut req = MessagesRequest::new("claude-3-haiku", 100, vec![Message::user("hi")]);
        req.tools = Some(vec![
            Tool {
                name: "get_weather".to_string(),
                description: Some("Look up weather".to_string()),
                input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            },
            Tool {
                name: "noop".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            },
        ]);
        req.tool_choice = Some(ToolChoice {
            choice_type: Some("tool".to_string()),
            name: Some("get_weather".to_string()),
        });

        let out = translate(&req);
        let wire = serde_json::to_value(&out).unwrap();
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(wire["tools"][1]["function"]["description"], "");
        assert_eq!(
            wire["tool_choice"],
            json!({"type": "function", "function": {"name": "get_weather"}})
        );
    }

    #[test]
    fn test_tool_choice_mapping() {
        let choice = |t: Option<&str>, n: Option<&str>| ToolChoice {
            choice_type: t.map(str::to_string),
            name: n.map(str::to_string),
        };
        let auto = ChatToolChoice::String("auto".to_string());

        assert_eq!(translate_tool_choice(&choice(Some("auto"), None)), auto);
        assert_eq!(
            translate_tool_choice(&choice(Some("any"), None)),
            ChatToolChoice::String("any".to_string())
        );
        assert_eq!(translate_tool_choice(&choice(Some("tool"), None)), auto);
        assert_eq!(translate_tool_choice(&choice(Some("none"), None)), auto);
        assert_eq!(translate_tool_choice(&ToolChoice::default()), auto);
    }

    #[test]
    fn test_optional_passthroughs() {
        let mut req = MessagesRequest::new("claude-3-haiku", 100, vec![Message::user("hi")]);
        let out = serde_json::to_value(translate(&req)).unwrap();
        assert!(out.get("stop").is_none());
        assert!(out.get("top_p").is_none());
        assert!(out.get("top_k").is_none());

        req.stop_sequences = Some(vec!["END".to_string()]);
        req.top_p = Some(0.9);
        req.top_k = Some(40);
        req.temperature = Some(0.2);
        req.stream = Some(true);
        let out = serde_json::to_value(translate(&req)).unwrap();
        assert_eq!(out["stop"], json!(["END"]));
        assert_eq!(out["top_p"], json!(0.9));
        assert_eq!(out["top_k"], json!(40));
        assert_eq!(out["temperature"], json!(0.2));
        assert_eq!(out["stream_options"], json!({"include_usage": true}));
    }

    #[test]
    fn test_flat_target_gets_string_content() {
        let req = MessagesRequest::new(
            "claude-3-5-sonnet",
            100,
            vec![
                Message::new(
                    Role::Assistant,
                    MessageContent::Blocks(vec![ContentBlock::ToolUse {
                        id: "t1".to_string(),
                        name: "calc".to_string(),
                        input: json!({"x": 1}),
                    }]),
                ),
                Message::new(
                    Role::User,
                    MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: "t1".to_string(),
                        content: Some(json!("42")),
                    }]),
                ),
            ],
        );

        let out = translate(&req);
        assert!(out
            .messages
            .iter()
            .all(|m| matches!(m.content, Some(ChatContent::Text(_)))));
        assert_eq!(
            out.messages[0].text_content(),
            Some("[Tool: calc (ID: t1)]\nInput: {\"x\":1}")
        );
        assert_eq!(out.messages[1].text_content(), Some("Tool result for t1:\n42"));
    }

    #[test]
    fn test_block_target_keeps_structure() {
        let mut policy = ModelPolicy::default();
        policy
            .aliases
            .insert("claude-opus-4".to_string(), "anthropic/claude-opus-4".to_string());
        let req = MessagesRequest::new(
            "claude-opus-4",
            100,
            vec![Message::new(
                Role::Assistant,
                MessageContent::Blocks(vec![ContentBlock::Text {
                    text: "hi".to_string(),
                }]),
            )],
        );

        let out = translate_with(&policy, &req);
        assert!(matches!(out.messages[0].content, Some(ChatContent::Blocks(_))));
    }
}
