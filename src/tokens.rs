//! Token counting for `/v1/messages/count_tokens`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tiktoken_rs::{get_bpe_from_model, o200k_base, CoreBPE};

use crate::error::{ProxyError, Result};
use crate::models::clean_model_name;
use crate::translate::openai_types::{ChatContent, ChatMessage};

/// Chat framing around each message (`<|start|>role ... <|end|>`).
const TOKENS_PER_MESSAGE: u64 = 3;
/// Every reply is primed with `<|start|>assistant<|message|>`.
const REPLY_PRIMER_TOKENS: u64 = 3;

pub trait TokenCounter: Send + Sync {
    fn count_messages(&self, model: &str, messages: &[ChatMessage]) -> Result<u64>;
}

/// Counts with the model's own BPE when tiktoken knows it, `o200k_base` otherwise.
pub struct TiktokenCounter {
    fallback: Arc<CoreBPE>,
    /// Model name -> encoder. Models tiktoken does not know map to `fallback`.
    by_model: Mutex<HashMap<String, Arc<CoreBPE>>>,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self> {
        let fallback = o200k_base().map_err(|e| ProxyError::token_count(e.to_string()))?;
        Ok(Self {
            fallback: Arc::new(fallback),
            by_model: Mutex::new(HashMap::new()),
        })
    }

    /// Encoder for a bare model name, built once per model.
    fn bpe_for(&self, model: &str) -> Arc<CoreBPE> {
        let mut cache = match self.by_model.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .entry(model.to_string())
            .or_insert_with(|| match get_bpe_from_model(model) {
                Ok(bpe) => Arc::new(bpe),
                Err(_) => self.fallback.clone(),
            })
            .clone()
    }

    #[cfg(test)]
    fn cached_models(&self) -> usize {
        self.by_model.lock().map_or(0, |cache| cache.len())
    }

    fn count_with(bpe: &CoreBPE, messages: &[ChatMessage]) -> u64 {
        let mut total = REPLY_PRIMER_TOKENS;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            total += bpe.encode_ordinary(&message.role).len() as u64;
            total += bpe.encode_ordinary(&message_text(message)).len() as u64;
            if let Some(name) = &message.name {
                total += bpe.encode_ordinary(name).len() as u64;
            }
        }
        total
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_messages(&self, model: &str, messages: &[ChatMessage]) -> Result<u64> {
        let bare = clean_model_name(model);
        let bare = bare.strip_prefix("openai/").unwrap_or(bare);
        Ok(Self::count_with(&self.bpe_for(bare), messages))
    }
}

/// Plain text of a message as the counter sees it. Structured content is
/// counted in its JSON form.
fn message_text(message: &ChatMessage) -> String {
    match &message.content {
        Some(ChatContent::Text(text)) => text.clone(),
        Some(ChatContent::Blocks(blocks)) => serde_json::to_string(blocks).unwrap_or_default(),
        None => String::new(),
    }
}
