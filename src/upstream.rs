//! The upstream call: one request in, a completion or a chunk stream out.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use crate::translate::extract::{Completion, StreamChunk};
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<Completion>;

    /// Start a streamed completion. Errors before the first chunk are returned
    /// here; errors after that arrive as `Err` items.
    async fn stream_complete(&self, request: &ChatCompletionRequest) -> Result<ChunkStream>;
}

/// OpenAI-compatible HTTP provider chosen by the target model's prefix.
pub struct HttpUpstream {
    client: reqwest::Client,
    config: Arc<RelayConfig>,
}

struct Endpoint {
    url: String,
    api_key: String,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, config: Arc<RelayConfig>) -> Self {
        Self { client, config }
    }

    /// Resolve the provider endpoint and rewrite the model to the bare name
    /// the provider expects.
    fn prepare(&self, request: &ChatCompletionRequest) -> Result<(Endpoint, ChatCompletionRequest)> {
        let (preset, bare) = ProviderPreset::for_model(&request.model).ok_or_else(|| {
            ProxyError::provider(format!("No provider configured for model '{}'", request.model))
        })?;

        let base_url = self.config.base_url_for(preset);
        let endpoint = Endpoint {
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: self.config.api_key_for(preset)?,
        };

        let mut outgoing = request.clone();
        outgoing.model = bare.to_string();
        Ok((endpoint, outgoing))
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let (endpoint, outgoing) = self.prepare(request)?;
        debug!(url = %endpoint.url, model = %outgoing.model, stream = ?outgoing.stream, "POST upstream");

        let response = self
            .client
            .post(&endpoint.url)
            .header("Authorization", format!("Bearer {}", endpoint.api_key))
            .header("Content-Type", "application/json")
            .json(&outgoing)
            .send()
            .await
            .map_err(|e| ProxyError::provider(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %truncate(&body, 500), "Upstream error");
            return Err(ProxyError::upstream(status, upstream_error_message(&body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<Completion> {
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::provider(format!("Failed to read response body: {}", e)))?;

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            ProxyError::provider(format!(
                "Upstream returned invalid JSON ({}): {}",
                e,
                truncate(&body, 200)
            ))
        })?;
        Ok(Completion::from_value(value))
    }

    async fn stream_complete(&self, request: &ChatCompletionRequest) -> Result<ChunkStream> {
        let response = self.send(request).await?;

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.data.trim() == "[DONE]");
                future::ready(!done)
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => match serde_json::from_str::<Value>(&event.data) {
                        Ok(value) => Some(Ok(StreamChunk::from_value(value))),
                        Err(e) => {
                            warn!(error = %e, data = %truncate(&event.data, 200), "Skipping unparseable chunk");
                            None
                        }
                    },
                    Err(e) => Some(Err(ProxyError::provider(format!("Upstream stream error: {}", e)))),
                })
            });

        Ok(Box::pin(chunks))
    }
}

/// Best human-readable message from an upstream error body.
pub fn upstream_error_message(body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(body) {
        return err.error.message;
    }
    // Gemini wraps its error object in a list
    if let Ok(list) = serde_json::from_str::<Vec<ChatErrorResponse>>(body) {
        if let Some(err) = list.into_iter().next() {
            return err.error.message;
        }
    }
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        if let Some(Value::String(message)) = obj.get("error").or_else(|| obj.get("message")) {
            return message.clone();
        }
    }
    if body.trim().is_empty() {
        return "Upstream returned an empty error body".to_string();
    }
    truncate(body, 500)
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderOverride;
    use crate::translate::extract::ChunkParts;
    use crate::translate::openai_types::ChatMessage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream_for(server: &MockServer, key_env: &str) -> HttpUpstream {
        std::env::set_var(key_env, "test-key");
        let mut config = RelayConfig::default();
        config.providers.insert(
            "deepseek".to_string(),
            ProviderOverride {
                base_url: Some(format!("{}/v1", server.uri())),
                api_key_env: Some(key_env.to_string()),
            },
        );
        HttpUpstream::new(reqwest::Client::new(), Arc::new(config))
    }

    fn request(stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "deepseek/deepseek-chat".to_string(),
            messages: vec![ChatMessage::text("user", "hi")],
            max_tokens: 100,
            temperature: Some(1.0),
            top_p: None,
            top_k: None,
            stream: Some(stream),
            stream_options: None,
            stop: None,
            tools: None,
            tool_choice: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_complete_strips_prefix_and_authenticates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "deepseek-chat"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
            })))
            .mount(&server)
            .await;

        let upstream = upstream_for(&server, "CLAUDE_RELAY_TEST_KEY_COMPLETE");
        let completion = upstream.complete(&request(false)).await.unwrap();
        let parts = completion.parts().unwrap();
        assert_eq!(parts.content.as_deref(), Some("Hello"));
        assert_eq!(parts.usage.input_tokens, 5);
    }

    #[tokio::test]
    async fn test_error_status_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "type": "rate_limit_error"}
            })))
            .mount(&server)
            .await;

        let upstream = upstream_for(&server, "CLAUDE_RELAY_TEST_KEY_429");
        let err = upstream.complete(&request(false)).await.unwrap_err();
        match err {
            ProxyError::Upstream { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_parses_chunks_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: not json\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"after done\"}}]}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let upstream = upstream_for(&server, "CLAUDE_RELAY_TEST_KEY_STREAM");
        let chunks: Vec<ChunkParts> = upstream
            .stream_complete(&request(true))
            .await
            .unwrap()
            .map(|c| c.unwrap().parts().unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_unknown_provider_prefix() {
        let upstream = HttpUpstream::new(reqwest::Client::new(), Arc::new(RelayConfig::default()));
        let mut req = request(false);
        req.model = "mystery-model".to_string();
        let err = upstream.complete(&req).await.unwrap_err();
        assert!(matches!(err, ProxyError::Provider { .. }));
    }

    #[test]
    fn test_upstream_error_message_shapes() {
        assert_eq!(
            upstream_error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(
            upstream_error_message(r#"[{"error":{"message":"quota","code":429}}]"#),
            "quota"
        );
        assert_eq!(upstream_error_message(r#"{"error":"plain"}"#), "plain");
        assert_eq!(upstream_error_message("<html>502</html>"), "<html>502</html>");
        assert_eq!(upstream_error_message(""), "Upstream returned an empty error body");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("héllo", 2), "h...");
    }
}
