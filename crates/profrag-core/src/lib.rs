//! ============================================================================
//! PROFRAG-CORE: Professor Review Retrieval and Answering
//! ============================================================================
//! This crate handles everything behind the chat endpoint:
//! - Query embedding via the Hugging Face feature-extraction API
//! - Top-k review lookup in Pinecone or Qdrant
//! - Prompt assembly with the retrieved reviews
//! - Streaming chat completions relayed fragment by fragment
//! ============================================================================

pub mod embeddings;
pub mod generation;
pub mod index;
pub mod pipeline;
pub mod prompt;
pub mod relay;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types for convenience
pub use types::*;
pub use embeddings::{Embedder, EmbeddingError, EmbeddingService};
pub use generation::{ChatCompletionClient, ChatGenerator, GenerationError, GenerationRequest};
pub use index::{IndexError, PineconeIndex, QdrantIndex, VectorIndex};
pub use pipeline::{PipelineError, PipelineSettings, ReviewPipeline};
pub use relay::TokenRelay;
