//! API translation between Anthropic and `OpenAI` formats.
//!
//! The core of the relay: converts requests, responses, and streaming events
//! between the two API formats. All translation functions are pure (no I/O)
//! apart from [`streaming::translate_stream`], which only awaits its input.

pub mod anthropic_types;
pub mod extract;
pub mod normalize;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
