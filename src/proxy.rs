//! Per-request pipeline: resolve the model, build the upstream request, call
//! the upstream, translate what comes back.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::config::RelayConfig;
use crate::error::{ProxyError, Result};
use crate::models::{ModelPolicy, ResolvedModel};
use crate::tokens::TokenCounter;
use crate::translate::anthropic_types::{MessagesRequest, TokenCountRequest, TokenCountResponse};
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::{translate_completion, translate_completion_or_fallback, ResponseOutcome};
use crate::translate::streaming::{translate_stream, SseFrame};
use crate::upstream::Upstream;

pub type SseStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

/// A client request after model resolution and translation. Immutable from
/// here on.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub resolved: ResolvedModel,
    pub upstream_request: ChatCompletionRequest,
}

#[derive(Clone)]
pub struct Gateway {
    policy: ModelPolicy,
    upstream: Arc<dyn Upstream>,
    counter: Arc<dyn TokenCounter>,
    soft_translation_errors: bool,
}

impl Gateway {
    pub fn new(config: &RelayConfig, upstream: Arc<dyn Upstream>, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            policy: ModelPolicy::from_config(config),
            upstream,
            counter,
            soft_translation_errors: config.soft_translation_errors,
        }
    }

    pub fn prepare(&self, req: &MessagesRequest) -> PreparedRequest {
        let resolved = self
            .policy
            .resolve(&req.model, req.thinking.as_ref(), req.system.as_ref());
        let upstream_request = anthropic_to_openai(req, &resolved);
        PreparedRequest {
            resolved,
            upstream_request,
        }
    }

    /// Non-streaming round trip. Upstream failures are returned as errors;
    /// translation failures become a fallback reply when soft translation
    /// errors are enabled, and errors otherwise.
    pub async fn complete(&self, prepared: &PreparedRequest) -> Result<ResponseOutcome> {
        let completion = self.upstream.complete(&prepared.upstream_request).await?;

        if self.soft_translation_errors {
            Ok(translate_completion_or_fallback(&completion, &prepared.resolved))
        } else {
            translate_completion(&completion, &prepared.resolved).map(ResponseOutcome::Translated)
        }
    }

    /// Open the upstream stream and re-emit it as Anthropic SSE frames. Only a
    /// failure to open the stream is an error; later failures end the event
    /// stream in-band.
    pub async fn stream(&self, prepared: &PreparedRequest) -> Result<SseStream> {
        let chunks = self.upstream.stream_complete(&prepared.upstream_request).await?;
        Ok(Box::pin(translate_stream(
            chunks,
            prepared.resolved.original_model.clone(),
        )))
    }

    pub fn count_tokens(&self, req: TokenCountRequest) -> Result<(PreparedRequest, TokenCountResponse)> {
        let prepared = self.prepare(&req.into_messages_request());
        let input_tokens = self
            .counter
            .count_messages(&prepared.upstream_request.model, &prepared.upstream_request.messages)
            .map_err(|e| match e {
                ProxyError::TokenCount { .. } => e,
                other => ProxyError::token_count(other.to_string()),
            })?;
        Ok((prepared, TokenCountResponse { input_tokens }))
    }
}
