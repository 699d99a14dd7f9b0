//! Translate a complete upstream completion into an Anthropic Messages response.

use serde_json::{json, Value};
use uuid::Uuid;

use super::anthropic_types::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use super::extract::{parse_json_or_fallback, Completion, ParsedJson, ToolArguments, ToolCallParts};
use crate::error::{ProxyError, Result};
use crate::models::ResolvedModel;

/// Result of the soft-failure path: either a real translation, or a stand-in
/// reply describing why translation failed.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    Translated(MessagesResponse),
    Fallback(MessagesResponse),
}

impl ResponseOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ResponseOutcome::Fallback(_))
    }

    pub fn into_response(self) -> MessagesResponse {
        match self {
            ResponseOutcome::Translated(r) | ResponseOutcome::Fallback(r) => r,
        }
    }
}

/// Translate an upstream completion into an Anthropic Messages response.
/// The response echoes the model name the client asked for.
pub fn translate_completion(completion: &Completion, resolved: &ResolvedModel) -> Result<MessagesResponse> {
    let parts = completion.parts()?;

    let mut content: Vec<ResponseContentBlock> = Vec::new();
    if let Some(text) = parts.content.filter(|t| !t.is_empty()) {
        content.push(ResponseContentBlock::Text { text });
    }

    if !parts.tool_calls.is_empty() {
        if resolved.supports_tool_blocks() {
            content.extend(parts.tool_calls.iter().map(tool_use_block));
        } else {
            append_tool_text(&mut content, &parts.tool_calls);
        }
    }

    // Clients expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let id = parts.id.as_deref().map_or_else(new_message_id, |id| {
        format!("msg_{}", id.trim_start_matches("chatcmpl-"))
    });

    Ok(MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resolved.original_model.clone(),
        stop_reason: Some(map_finish_reason(parts.finish_reason.as_deref())),
        stop_sequence: None,
        usage: Usage {
            input_tokens: parts.usage.input_tokens,
            output_tokens: parts.usage.output_tokens,
            ..Usage::default()
        },
    })
}

/// Like [`translate_completion`], but never fails: a translation error is
/// logged and turned into a reply whose only text block describes the error.
pub fn translate_completion_or_fallback(completion: &Completion, resolved: &ResolvedModel) -> ResponseOutcome {
    match translate_completion(completion, resolved) {
        Ok(response) => ResponseOutcome::Translated(response),
        Err(e) => {
            tracing::error!(
                error = %e,
                model = %resolved.original_model,
                target = %resolved.target_model,
                completion = ?completion,
                "Failed to translate upstream response"
            );
            ResponseOutcome::Fallback(fallback_response(&e, &resolved.original_model))
        }
    }
}

pub fn fallback_response(err: &ProxyError, original_model: &str) -> MessagesResponse {
    MessagesResponse {
        id: new_message_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ResponseContentBlock::Text {
            text: format!("Error converting response: {err}. Please check server logs."),
        }],
        model: original_model.to_string(),
        stop_reason: Some(StopReason::EndTurn),
        stop_sequence: None,
        usage: Usage::default(),
    }
}

/// Map an upstream finish_reason to an Anthropic stop_reason. Unknown or
/// missing reasons end the turn.
pub fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub fn new_tool_use_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("toolu_{}", &hex[..24])
}

fn tool_use_block(call: &ToolCallParts) -> ResponseContentBlock {
    let input = match &call.arguments {
        ToolArguments::Json(v) => v.clone(),
        ToolArguments::Text(s) => match parse_json_or_fallback(s) {
            ParsedJson::Parsed(v) => v,
            ParsedJson::RawString(raw) => json!({ "raw": raw }),
        },
    };

    ResponseContentBlock::ToolUse {
        id: call.id.clone().unwrap_or_else(new_tool_use_id),
        name: call.name.clone(),
        input,
    }
}

/// Render tool calls as readable text for clients of models that cannot
/// produce tool_use blocks, merged into the leading text block when there is one.
fn append_tool_text(content: &mut Vec<ResponseContentBlock>, calls: &[ToolCallParts]) {
    let mut tool_text = String::from("\n\nTool usage:\n");
    for call in calls {
        let arguments = match &call.arguments {
            ToolArguments::Json(v) => pretty(v),
            ToolArguments::Text(s) => match parse_json_or_fallback(s) {
                ParsedJson::Parsed(v) => pretty(&v),
                ParsedJson::RawString(raw) => raw,
            },
        };
        tool_text.push_str(&format!("Tool: {}\nArguments: {}\n\n", call.name, arguments));
    }

    match content.first_mut() {
        Some(ResponseContentBlock::Text { text }) => text.push_str(&tool_text),
        _ => content.push(ResponseContentBlock::Text { text: tool_text }),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
