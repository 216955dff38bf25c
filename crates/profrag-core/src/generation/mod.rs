//! ============================================================================
//! Chat Generation - Streaming completions from the answer model
//! ============================================================================
//! The generator opens one streaming completion per question and hands back a
//! lazy, single-pass sequence of text fragments. Fragments arrive in the
//! order the model produced them.
//! ============================================================================

mod client;
pub mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::types::ChatMessage;

pub use client::{ChatCompletionClient, DEFAULT_CHAT_MODEL, DEFAULT_CHAT_URL};

/// Output cap for one answer
pub const DEFAULT_MAX_TOKENS: u32 = 250;

/// Low temperature keeps answers close to the retrieved reviews
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Finite stream of generated text fragments. Not restartable.
pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Failed to reach generation service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Generation API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Generation stream reported an error: {0}")]
    Upstream(String),

    #[error("Malformed generation event: {0}")]
    Parse(String),
}

/// Everything the model sees for one answer
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Opens a token stream for a prepared conversation
#[async_trait]
pub trait ChatGenerator: Send + Sync {
    /// Fails before yielding anything if the stream cannot be opened
    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError>;
}
