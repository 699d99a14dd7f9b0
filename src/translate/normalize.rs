//! Content normalization: Anthropic message content into provider messages.
//!
//! Two passes. [`normalize_message`] maps one client message onto one
//! provider message, re-homing tool results that sit in a user turn into plain
//! text. [`sanitize_flat_messages`] then runs for providers that only accept
//! string content and flattens whatever structure is left.

use serde_json::{json, Value};
use tracing::warn;

use super::anthropic_types::{ContentBlock, Message, MessageContent, Role};
use super::openai_types::{ChatBlock, ChatContent, ChatMessage};

/// Stand-in for a tool result that carried no content at all.
pub const NO_CONTENT: &str = "No content provided";
/// Last-ditch text for content that could not be rendered.
pub const UNPARSEABLE: &str = "Unparseable content";
/// Flat-message providers reject empty content.
pub const EMPTY_PLACEHOLDER: &str = "...";
pub const IMAGE_PLACEHOLDER: &str = "[Image content - not displayed in text format]";

/// Message fields flat-message providers accept.
const ALLOWED_MESSAGE_FIELDS: [&str; 5] = ["role", "content", "name", "tool_call_id", "tool_calls"];

/// Render the `content` of a tool result as plain text. Never fails.
///
/// - missing / `null` → [`NO_CONTENT`]
/// - string → itself
/// - list → each element's text (or its JSON) on its own line, trimmed
/// - `{"type": "text"}` object → its `text`; any other object → its JSON
/// - anything else → its string form
pub fn parse_tool_result_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => NO_CONTENT.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => {
            let mut result = String::new();
            for item in items {
                match item {
                    Value::String(s) => result.push_str(s),
                    Value::Object(obj) => match obj.get("text") {
                        Some(text) => result.push_str(&value_as_text(text)),
                        None => result.push_str(&to_json_or_sentinel(item)),
                    },
                    other => result.push_str(&value_as_text(other)),
                }
                result.push('\n');
            }
            result.trim().to_string()
        }
        Some(value @ Value::Object(obj)) => {
            if obj.get("type").and_then(Value::as_str) == Some("text") {
                obj.get("text").map(value_as_text).unwrap_or_default()
            } else {
                to_json_or_sentinel(value)
            }
        }
        Some(other) => value_as_text(other),
    }
}

/// Map one client message onto one provider message.
pub fn normalize_message(msg: &Message) -> ChatMessage {
    let role = msg.role.as_str();
    let mut out = match &msg.content {
        MessageContent::Text(text) => ChatMessage::text(role, text.clone()),
        MessageContent::Blocks(blocks) if msg.role == Role::User && has_tool_result(blocks) => {
            ChatMessage::text(role, flatten_user_tool_results(blocks))
        }
        MessageContent::Blocks(blocks) => ChatMessage::with_content(
            role,
            ChatContent::Blocks(blocks.iter().map(map_block).collect()),
        ),
    };
    out.extra = msg
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    out
}

/// Flatten structured content for providers that only take strings, and drop
/// message fields they would reject.
pub fn sanitize_flat_messages(messages: &mut [ChatMessage]) {
    for (i, msg) in messages.iter_mut().enumerate() {
        // Client strings pass through verbatim; only text built from blocks is trimmed.
        let text = match msg.content.take() {
            Some(ChatContent::Blocks(blocks)) if is_only_tool_results(&blocks) => {
                warn!(message = i, "collapsing tool_result-only message to plain text");
                tool_results_only_text(&blocks).trim().to_string()
            }
            Some(ChatContent::Blocks(blocks)) => flatten_blocks(&blocks).trim().to_string(),
            Some(ChatContent::Text(text)) => text,
            None => String::new(),
        };
        msg.content = Some(ChatContent::Text(if text.trim().is_empty() {
            EMPTY_PLACEHOLDER.to_string()
        } else {
            text
        }));

        let unsupported: Vec<String> = msg
            .extra
            .keys()
            .filter(|k| !ALLOWED_MESSAGE_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in unsupported {
            warn!(message = i, field = %key, "removing unsupported field from message");
            msg.extra.remove(&key);
        }
    }
}

/// Final guard after sanitation: no message may leave with list or missing
/// content. Not expected to fire once [`sanitize_flat_messages`] has run.
pub fn enforce_flat_content(messages: &mut [ChatMessage]) {
    for (i, msg) in messages.iter_mut().enumerate() {
        match &msg.content {
            Some(ChatContent::Blocks(blocks)) => {
                let dumped = serde_json::to_string(blocks).unwrap_or_else(|_| UNPARSEABLE.to_string());
                warn!(message = i, content = %dumped, "message still has list content after sanitation");
                msg.content = Some(ChatContent::Text(format!("Content as JSON: {dumped}")));
            }
            None => {
                warn!(message = i, "message has no content, replacing with placeholder");
                msg.content = Some(ChatContent::Text(EMPTY_PLACEHOLDER.to_string()));
            }
            Some(ChatContent::Text(_)) => {}
        }
    }
}

fn has_tool_result(blocks: &[ContentBlock]) -> bool {
    blocks
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
}

/// Tool outputs travel as user-turn text: text blocks and tool results in
/// their original order, each tool result under a header naming its call.
fn flatten_user_tool_results(blocks: &[ContentBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => {
                text.push_str(t);
                text.push('\n');
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                let result = parse_tool_result_content(content.as_ref());
                text.push_str(&format!("Tool result for {tool_use_id}:\n{result}\n"));
            }
            ContentBlock::Image { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }
    text.trim().to_string()
}

fn map_block(block: &ContentBlock) -> ChatBlock {
    match block {
        ContentBlock::Text { text } => ChatBlock::Text { text: text.clone() },
        ContentBlock::Image { source } => ChatBlock::Image {
            source: source.clone(),
        },
        ContentBlock::ToolUse { id, name, input } => ChatBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => ChatBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: tool_result_blocks(content.as_ref()),
        },
    }
}

/// Tool-result content in block form: a bare string becomes one text block,
/// a list is kept as is, anything else is stringified into a text block.
fn tool_result_blocks(content: Option<&Value>) -> Vec<Value> {
    match content {
        None | Some(Value::Null) => vec![json!({"type": "text", "text": ""})],
        Some(Value::String(s)) => vec![json!({"type": "text", "text": s})],
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![json!({"type": "text", "text": value_as_text(other)})],
    }
}

fn is_only_tool_results(blocks: &[ChatBlock]) -> bool {
    !blocks.is_empty()
        && blocks
            .iter()
            .all(|b| matches!(b, ChatBlock::ToolResult { .. }))
}

fn tool_results_only_text(blocks: &[ChatBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        if let ChatBlock::ToolResult { content, .. } = block {
            text.push_str("Tool Result:\n");
            push_result_items(&mut text, content);
        }
    }
    text
}

fn flatten_blocks(blocks: &[ChatBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        match block {
            ChatBlock::Text { text: t } => {
                text.push_str(t);
                text.push('\n');
            }
            ChatBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                text.push_str(&format!("[Tool Result ID: {tool_use_id}]\n"));
                push_result_items(&mut text, content);
            }
            ChatBlock::ToolUse { id, name, input } => {
                let input = to_json_or_sentinel(input);
                text.push_str(&format!("[Tool: {name} (ID: {id})]\nInput: {input}\n\n"));
            }
            ChatBlock::Image { .. } => {
                text.push_str(IMAGE_PLACEHOLDER);
                text.push('\n');
            }
        }
    }
    text
}

fn push_result_items(text: &mut String, items: &[Value]) {
    for item in items {
        match item {
            Value::Object(obj) => match obj.get("text") {
                Some(t) => text.push_str(&value_as_text(t)),
                None => text.push_str(&to_json_or_sentinel(item)),
            },
            Value::String(s) => text.push_str(s),
            _ => continue,
        }
        text.push('\n');
    }
}

/// Strings verbatim, everything else as JSON.
fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => to_json_or_sentinel(other),
    }
}

fn to_json_or_sentinel(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| UNPARSEABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn user_blocks(blocks: Vec<ContentBlock>) -> Message {
        Message::new(Role::User, MessageContent::Blocks(blocks))
    }

    #[test]
    fn test_parse_tool_result_content_never_fails() {
        let cases = vec![
            None,
            Some(Value::Null),
            Some(json!("plain")),
            Some(json!([])),
            Some(json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            Some(json!([{"type": "text", "text": "a"}, "b", {"k": 1}, 7, null])),
            Some(json!({"type": "text", "text": "nested"})),
            Some(json!({"type": "image", "source": {"data": "..."}})),
            Some(json!(42)),
            Some(json!(true)),
        ];
        for case in &cases {
            let _rendered: String = parse_tool_result_content(case.as_ref());
        }
    }

    #[test]
    fn test_parse_tool_result_content_shapes() {
        assert_eq!(parse_tool_result_content(None), NO_CONTENT);
        assert_eq!(parse_tool_result_content(Some(&json!("42"))), "42");
        assert_eq!(parse_tool_result_content(Some(&json!([]))), "");
        assert_eq!(
            parse_tool_result_content(Some(&json!([{"type": "text", "text": "a"}, "b", {"k": 1}]))),
            "a\nb\n{\"k\":1}"
        );
        assert_eq!(
            parse_tool_result_content(Some(&json!({"type": "text", "text": "nested"}))),
            "nested"
        );
        assert_eq!(
            parse_tool_result_content(Some(&json!({"status": "ok"}))),
            "{\"status\":\"ok\"}"
        );
        assert_eq!(parse_tool_result_content(Some(&json!(3.5))), "3.5");
    }

    #[test]
    fn test_user_tool_result_is_flattened_to_text() {
        let msg = user_blocks(vec![ContentBlock::ToolResult {
            tool_use_id: "t1".to_string(),
            content: Some(json!("42")),
        }]);

        let out = normalize_message(&msg);
        assert_eq!(out.role, "user");
        assert_eq!(out.text_content(), Some("Tool result for t1:\n42"));
    }

    #[test]
    fn test_user_tool_result_keeps_text_order() {
        let msg = user_blocks(vec![
            ContentBlock::Text {
                text: "before".to_string(),
            },
            ContentBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: Some(json!([{"type": "text", "text": "out"}])),
            },
            ContentBlock::Text {
                text: "after".to_string(),
            },
        ]);

        let out = normalize_message(&msg);
        assert_eq!(
            out.text_content(),
            Some("before\nTool result for t1:\nout\nafter")
        );
    }

    #[test]
    fn test_assistant_blocks_map_one_to_one() {
        let msg = Message::new(
            Role::Assistant,
            MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "calling".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "f".to_string(),
                    input: json!({"a": 1}),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "t0".to_string(),
                    content: Some(json!("bare")),
                },
            ]),
        );

        let out = normalize_message(&msg);
        let Some(ChatContent::Blocks(blocks)) = &out.content else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 3);
        match &blocks[2] {
            ChatBlock::ToolResult { content, .. } => {
                assert_eq!(content, &vec![json!({"type": "text", "text": "bare"})]);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_tool_result_block_content_forms() {
        assert_eq!(
            tool_result_blocks(None),
            vec![json!({"type": "text", "text": ""})]
        );
        let list = json!([{"type": "text", "text": "x"}, {"type": "image"}]);
        assert_eq!(tool_result_blocks(Some(&list)), list.as_array().unwrap().clone());
        assert_eq!(
            tool_result_blocks(Some(&json!({"k": "v"}))),
            vec![json!({"type": "text", "text": "{\"k\":\"v\"}"})]
        );
    }

    #[test]
    fn test_sanitize_tool_result_only_message() {
        let mut messages = vec![ChatMessage::with_content(
            "assistant",
            ChatContent::Blocks(vec![
                ChatBlock::ToolResult {
                    tool_use_id: "a".to_string(),
                    content: vec![json!({"type": "text", "text": "one"})],
                },
                ChatBlock::ToolResult {
                    tool_use_id: "b".to_string(),
                    content: vec![json!({"value": 2})],
                },
            ]),
        )];

        sanitize_flat_messages(&mut messages);
        assert_eq!(
            messages[0].text_content(),
            Some("Tool Result:\none\nTool Result:\n{\"value\":2}")
        );
    }

    #[test]
    fn test_sanitize_flattens_mixed_blocks() {
        let mut messages = vec![ChatMessage::with_content(
            "assistant",
            ChatContent::Blocks(vec![
                ChatBlock::Text {
                    text: "Looking".to_string(),
                },
                ChatBlock::Image {
                    source: json!({"type": "base64"}),
                },
                ChatBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "search".to_string(),
                    input: json!({"q": "x"}),
                },
            ]),
        )];

        sanitize_flat_messages(&mut messages);
        let text = messages[0].text_content().unwrap();
        assert!(text.starts_with("Looking\n"));
        assert!(text.contains(IMAGE_PLACEHOLDER));
        assert!(text.ends_with("[Tool: search (ID: t1)]\nInput: {\"q\":\"x\"}"));
    }

    #[test]
    fn test_sanitize_replaces_empty_content() {
        let mut messages = vec![
            ChatMessage::with_content("user", ChatContent::Blocks(Vec::new())),
            ChatMessage::text("assistant", "   "),
            ChatMessage {
                content: None,
                ..ChatMessage::text("user", "")
            },
        ];

        sanitize_flat_messages(&mut messages);
        for msg in &messages {
            assert_eq!(msg.text_content(), Some(EMPTY_PLACEHOLDER));
        }
    }

    #[test]
    fn test_sanitize_keeps_string_content_verbatim() {
        let mut messages = vec![
            ChatMessage::text("system", "  You are a pirate.\n"),
            ChatMessage::text("user", "    fn main() {}\n"),
            ChatMessage::text("assistant", "\nArr.  "),
        ];

        sanitize_flat_messages(&mut messages);
        enforce_flat_content(&mut messages);
        assert_eq!(messages[0].text_content(), Some("  You are a pirate.\n"));
        assert_eq!(messages[1].text_content(), Some("    fn main() {}\n"));
        assert_eq!(messages[2].text_content(), Some("\nArr.  "));
    }

    #[test]
    fn test_sanitize_drops_unknown_fields() {
        let mut extra = HashMap::new();
        extra.insert("cache_control".to_string(), json!({"type": "ephemeral"}));
        let msg = Message {
            extra,
            ..Message::user("hi")
        };

        let mut messages = vec![normalize_message(&msg)];
        assert!(messages[0].extra.contains_key("cache_control"));

        sanitize_flat_messages(&mut messages);
        assert!(messages[0].extra.is_empty());
        let wire = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(wire, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_enforce_flat_content_last_resort() {
        let mut messages = vec![
            ChatMessage::with_content(
                "user",
                ChatContent::Blocks(vec![ChatBlock::Text {
                    text: "x".to_string(),
                }]),
            ),
            ChatMessage {
                content: None,
                ..ChatMessage::text("assistant", "")
            },
            ChatMessage::text("user", "fine"),
        ];

        enforce_flat_content(&mut messages);
        assert_eq!(
            messages[0].text_content(),
            Some("Content as JSON: [{\"type\":\"text\",\"text\":\"x\"}]")
        );
        assert_eq!(messages[1].text_content(), Some(EMPTY_PLACEHOLDER));
        assert_eq!(messages[2].text_content(), Some("fine"));
    }
}
