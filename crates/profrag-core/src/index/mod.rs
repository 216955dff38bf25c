//! ============================================================================
//! Vector Index - Nearest-neighbour lookup over indexed professor reviews
//! ============================================================================
//! Reviews are ingested elsewhere; this module only queries. Two backends:
//! - PineconeIndex: the hosted index the reviews live in (REST data plane)
//! - QdrantIndex: a self-hosted Qdrant collection with the same payload shape
//! ============================================================================

mod pinecone;
mod qdrant;

use async_trait::async_trait;

use crate::types::ProfessorMatch;

pub use pinecone::{PineconeIndex, DEFAULT_INDEX_NAME, DEFAULT_NAMESPACE, PINECONE_CONTROL_URL};
pub use qdrant::{QdrantIndex, DEFAULT_COLLECTION};

/// Number of reviews retrieved per question
pub const DEFAULT_TOP_K: u64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to reach vector index: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Vector index error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Failed to parse vector index response: {0}")]
    Parse(String),

    #[error("Vector index configuration error: {0}")]
    Configuration(String),
}

/// Similarity search over the review index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `top_k` records closest to `vector`, best first, with metadata
    async fn query(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<ProfessorMatch>, IndexError>;
}
