//! Shape adapters for provider payloads.
//!
//! Providers are not consistent about what they send back: most payloads decode
//! into the typed structs in [`super::openai_types`], but some omit fields the
//! typed shape requires or use a different type for a field. Those are kept as
//! raw JSON. Both representations implement the same small adapter traits and
//! are normalized immediately into [`CompletionParts`] / [`ChunkParts`], so the
//! translators never branch on representation.

use serde_json::Value;

use super::openai_types::{ChatCompletionChunk, ChatCompletionResponse};
use crate::error::{ProxyError, Result};

/// A complete provider response, typed when it decodes cleanly.
#[derive(Debug, Clone)]
pub enum Completion {
    Typed(ChatCompletionResponse),
    Raw(Value),
}

/// One streamed provider delta, typed when it decodes cleanly.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Typed(ChatCompletionChunk),
    Raw(Value),
}

/// Result of trying to read a string as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedJson {
    Parsed(Value),
    RawString(String),
}

/// Tool-call arguments as the provider sent them.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    /// The usual case: a (possibly partial) JSON document in a string.
    Text(String),
    /// Some providers send an already-structured object.
    Json(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageParts {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallParts {
    pub id: Option<String>,
    pub name: String,
    pub arguments: ToolArguments,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionParts {
    pub id: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallParts>,
    pub finish_reason: Option<String>,
    pub usage: UsageParts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDeltaParts {
    pub index: u64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<ToolArguments>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkParts {
    pub usage: Option<UsageParts>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDeltaParts>,
    pub finish_reason: Option<String>,
}

pub trait CompletionSource {
    fn completion_parts(&self) -> Result<CompletionParts>;
}

pub trait ChunkSource {
    fn chunk_parts(&self) -> Result<ChunkParts>;
}

pub fn parse_json_or_fallback(s: &str) -> ParsedJson {
    match serde_json::from_str::<Value>(s) {
        Ok(v) => ParsedJson::Parsed(v),
        Err(_) => ParsedJson::RawString(s.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Boundary selection
// ---------------------------------------------------------------------------

impl Completion {
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<ChatCompletionResponse>(value.clone()) {
            Ok(typed) => Completion::Typed(typed),
            Err(_) => Completion::Raw(value),
        }
    }

    pub fn parts(&self) -> Result<CompletionParts> {
        match self {
            Completion::Typed(resp) => resp.completion_parts(),
            Completion::Raw(value) => value.completion_parts(),
        }
    }
}

impl StreamChunk {
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<ChatCompletionChunk>(value.clone()) {
            Ok(typed) => StreamChunk::Typed(typed),
            Err(_) => StreamChunk::Raw(value),
        }
    }

    pub fn parts(&self) -> Result<ChunkParts> {
        match self {
            StreamChunk::Typed(chunk) => chunk.chunk_parts(),
            StreamChunk::Raw(value) => value.chunk_parts(),
        }
    }
}

impl From<ChatCompletionResponse> for Completion {
    fn from(resp: ChatCompletionResponse) -> Self {
        Completion::Typed(resp)
    }
}

impl From<ChatCompletionChunk> for StreamChunk {
    fn from(chunk: ChatCompletionChunk) -> Self {
        StreamChunk::Typed(chunk)
    }
}

// ---------------------------------------------------------------------------
// Typed representation
// ---------------------------------------------------------------------------

impl CompletionSource for ChatCompletionResponse {
    fn completion_parts(&self) -> Result<CompletionParts> {
        let choice = self.choices.first();
        let tool_calls = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCallParts {
                        id: Some(tc.id.clone()).filter(|id| !id.is_empty()),
                        name: tc.function.name.clone(),
                        arguments: ToolArguments::Text(tc.function.arguments.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(CompletionParts {
            id: Some(self.id.clone()).filter(|id| !id.is_empty()),
            content: choice.and_then(|c| c.message.content.clone()),
            tool_calls,
            finish_reason: choice.and_then(|c| c.finish_reason.clone()),
            usage: self.usage.as_ref().map_or_else(UsageParts::default, |u| UsageParts {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}

impl ChunkSource for ChatCompletionChunk {
    fn chunk_parts(&self) -> Result<ChunkParts> {
        let usage = self.usage.as_ref().map(|u| UsageParts {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        let Some(choice) = self.choices.first() else {
            return Ok(ChunkParts {
                usage,
                ..ChunkParts::default()
            });
        };

        let tool_calls = choice
            .delta
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCallDeltaParts {
                        index: tc.index,
                        id: tc.id.clone(),
                        name: tc.function.as_ref().and_then(|f| f.name.clone()),
                        arguments: tc
                            .function
                            .as_ref()
                            .and_then(|f| f.arguments.clone())
                            .map(ToolArguments::Text),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChunkParts {
            usage,
            content: choice.delta.content.clone(),
            tool_calls,
            finish_reason: choice.finish_reason.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Raw JSON representation
// ---------------------------------------------------------------------------

impl CompletionSource for Value {
    fn completion_parts(&self) -> Result<CompletionParts> {
        let obj = self
            .as_object()
            .ok_or_else(|| ProxyError::translation("completion is not a JSON object"))?;

        let choice = first_choice(obj.get("choices"))?;
        let message = match choice.and_then(|c| c.get("message")) {
            None | Some(Value::Null) => None,
            Some(Value::Object(m)) => Some(m),
            Some(other) => {
                return Err(ProxyError::translation(format!(
                    "choice message must be an object, got {}",
                    kind(other)
                )))
            }
        };

        let content = match message.and_then(|m| m.get("content")) {
            None | Some(Value::Null) => None,
            Some(v) => Some(content_text(v)?),
        };

        let tool_calls = tool_call_values(message.and_then(|m| m.get("tool_calls")))?
            .into_iter()
            .map(|tc| {
                let function = tc.get("function").and_then(Value::as_object);
                ToolCallParts {
                    id: tc.get("id").and_then(Value::as_str).map(str::to_string),
                    name: function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: function
                        .and_then(|f| f.get("arguments"))
                        .and_then(raw_arguments)
                        .unwrap_or_else(|| ToolArguments::Text("{}".to_string())),
                }
            })
            .collect();

        Ok(CompletionParts {
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            content,
            tool_calls,
            finish_reason: choice
                .and_then(|c| c.get("finish_reason"))
                .and_then(Value::as_str)
                .map(str::to_string),
            usage: raw_usage(obj.get("usage")).unwrap_or_default(),
        })
    }
}

impl ChunkSource for Value {
    fn chunk_parts(&self) -> Result<ChunkParts> {
        let obj = self
            .as_object()
            .ok_or_else(|| ProxyError::translation("chunk is not a JSON object"))?;

        let usage = raw_usage(obj.get("usage"));
        let Some(choice) = first_choice(obj.get("choices"))? else {
            return Ok(ChunkParts {
                usage,
                ..ChunkParts::default()
            });
        };

        // Some providers put the final piece under `message` instead of `delta`.
        let delta = match choice.get("delta").or_else(|| choice.get("message")) {
            None | Some(Value::Null) => None,
            Some(Value::Object(d)) => Some(d),
            Some(other) => {
                return Err(ProxyError::translation(format!(
                    "chunk delta must be an object, got {}",
                    kind(other)
                )))
            }
        };

        let content = match delta.and_then(|d| d.get("content")) {
            None | Some(Value::Null) => None,
            Some(v) => Some(content_text(v)?),
        };

        let tool_calls = tool_call_values(delta.and_then(|d| d.get("tool_calls")))?
            .into_iter()
            .map(|tc| {
                let function = tc.get("function").and_then(Value::as_object);
                ToolCallDeltaParts {
                    index: tc.get("index").and_then(Value::as_u64).unwrap_or(0),
                    id: tc.get("id").and_then(Value::as_str).map(str::to_string),
                    name: function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    arguments: function
                        .and_then(|f| f.get("arguments"))
                        .and_then(raw_arguments),
                }
            })
            .collect();

        Ok(ChunkParts {
            usage,
            content,
            tool_calls,
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn first_choice(choices: Option<&Value>) -> Result<Option<&serde_json::Map<String, Value>>> {
    match choices {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => match items.first() {
            None => Ok(None),
            Some(Value::Object(c)) => Ok(Some(c)),
            Some(other) => Err(ProxyError::translation(format!(
                "choice must be an object, got {}",
                kind(other)
            ))),
        },
        Some(other) => Err(ProxyError::translation(format!(
            "choices must be an array, got {}",
            kind(other)
        ))),
    }
}

/// A lone tool-call object is treated as a one-element list.
fn tool_call_values(value: Option<&Value>) -> Result<Vec<&serde_json::Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(single)) => Ok(vec![single]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    ProxyError::translation(format!(
                        "tool call must be an object, got {}",
                        kind(item)
                    ))
                })
            })
            .collect(),
        Some(other) => Err(ProxyError::translation(format!(
            "tool_calls must be an array, got {}",
            kind(other)
        ))),
    }
}

/// String content, or an array of `{"type": "text"}` parts joined together.
fn content_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Array(parts) => Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect()),
        other => Err(ProxyError::translation(format!(
            "message content must be a string or array, got {}",
            kind(other)
        ))),
    }
}

fn raw_arguments(value: &Value) -> Option<ToolArguments> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(ToolArguments::Text(s.clone())),
        other => Some(ToolArguments::Json(other.clone())),
    }
}

fn raw_usage(value: Option<&Value>) -> Option<UsageParts> {
    let usage = value?.as_object()?;
    Some(UsageParts {
        input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
