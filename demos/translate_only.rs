//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use claude_relay::models::ModelPolicy;
use claude_relay::translate::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, StopReason, SystemContent, Tool,
};
use claude_relay::translate::extract::{Completion, StreamChunk};
use claude_relay::translate::request::anthropic_to_openai;
use claude_relay::translate::response::translate_completion;
use claude_relay::translate::streaming::{SseFrame, StreamTranslator};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    // A Claude-style conversation with one finished tool round trip
    let mut req = MessagesRequest::new(
        "claude-3-5-sonnet-20241022",
        20_000,
        vec![
            Message::user("What's the weather in Paris?"),
            Message::new(
                Role::Assistant,
                MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "toolu_01".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({"city": "Paris"}),
                }]),
            ),
            Message::new(
                Role::User,
                MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_01".to_string(),
                    content: Some(json!("18C and sunny")),
                }]),
            ),
        ],
    );
    req.system = Some(SystemContent::Text("Be concise.".to_string()));
    req.tools = Some(vec![Tool {
        name: "get_weather".to_string(),
        description: Some("Current weather for a city".to_string()),
        input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    }]);
    req.thinking = Some(json!({"type": "enabled", "budget_tokens": 1024}));

    let policy = ModelPolicy::default();
    let resolved = policy.resolve(&req.model, req.thinking.as_ref(), req.system.as_ref());
    println!("=== Model Resolution ===");
    println!("{} -> {} ({:?})", resolved.original_model, resolved.target_model, resolved.tier);
    println!();

    let upstream_req = anthropic_to_openai(&req, &resolved);
    println!("=== Upstream Request ===");
    println!("{}", serde_json::to_string_pretty(&upstream_req)?);
    println!();

    // A completion as DeepSeek would return it
    let completion = Completion::from_value(json!({
        "id": "chatcmpl-abc123",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "It's 18C and sunny in Paris.",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_forecast", "arguments": "{\"city\":\"Paris\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 14, "total_tokens": 134}
    }));

    let response = translate_completion(&completion, &resolved)?;
    println!("=== Client Response ===");
    println!("{}", serde_json::to_string_pretty(&response)?);
    println!();

    println!("=== Streaming Events ===");
    let mut translator = StreamTranslator::new(&resolved.original_model);
    let mut events = translator.start();
    for chunk in [
        json!({"choices": [{"delta": {"content": "It's 18C"}}]}),
        json!({"choices": [{"delta": {"content": " in Paris."}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}],
               "usage": {"prompt_tokens": 120, "completion_tokens": 7}}),
    ] {
        events.extend(translator.process_chunk(&StreamChunk::from_value(chunk)));
    }
    if !translator.is_finished() {
        events.extend(translator.finish(StopReason::EndTurn));
    }

    for frame in events.iter().map(SseFrame::from_event) {
        print!("{}", frame.to_wire());
    }
    print!("{}", SseFrame::done().to_wire());

    Ok(())
}
