//! ============================================================================
//! Embedding Service - Query vectors for semantic review search
//! ============================================================================
//! Generates text embeddings through the Hugging Face Inference
//! feature-extraction pipeline.
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default embedding model, the one the review index was built with
pub const DEFAULT_EMBEDDING_MODEL: &str = "intfloat/multilingual-e5-large";

/// Expected embedding dimension for multilingual-e5-large
pub const EMBEDDING_DIM: usize = 1024;

/// Default Hugging Face Inference base URL
pub const DEFAULT_INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference";

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Failed to send embedding request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse embedding response: {0}")]
    Parse(String),

    #[error("Embedding service returned an empty vector")]
    EmptyEmbedding,
}

/// Turns query text into a vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a str,
}

/// Feature extraction returns a sentence vector, a one-element batch of it,
/// or a token-level matrix depending on the model's pipeline configuration.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtractionResponse {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
    Batched(Vec<Vec<Vec<f32>>>),
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message(String),
    Object { message: String },
}

impl ErrorDetail {
    fn into_message(self) -> String {
        match self {
            ErrorDetail::Message(message) | ErrorDetail::Object { message } => message,
        }
    }
}

/// Embedding service backed by the Hugging Face Inference API
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingService {
    /// Create a new embedding service against the public inference router
    pub fn new_hf(client: Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Create with custom base URL and model
    pub fn new_custom(client: Client, api_key: String, base_url: String, model: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}/pipeline/feature-extraction",
            self.base_url, self.model
        )
    }

    /// Get the current model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Generating embedding for {} chars (model: {})", text.len(), self.model);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&FeatureExtractionRequest { inputs: text })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.into_message())
                .unwrap_or(body);
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: FeatureExtractionResponse = serde_json::from_str(&body)
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        let embedding = sentence_vector(parsed);
        if embedding.is_empty() {
            return Err(EmbeddingError::EmptyEmbedding);
        }

        debug!("Embedding dimension: {}", embedding.len());
        Ok(embedding)
    }
}

fn sentence_vector(response: FeatureExtractionResponse) -> Vec<f32> {
    match response {
        FeatureExtractionResponse::Flat(v) => v,
        FeatureExtractionResponse::Nested(rows) if rows.len() == 1 => {
            rows.into_iter().next().unwrap_or_default()
        }
        FeatureExtractionResponse::Nested(rows) => mean_pool(&rows),
        FeatureExtractionResponse::Batched(batch) => batch
            .into_iter()
            .next()
            .map(|rows| mean_pool(&rows))
            .unwrap_or_default(),
    }
}

/// Average token vectors into one sentence vector
fn mean_pool(rows: &[Vec<f32>]) -> Vec<f32> {
    let Some(width) = rows.first().map(Vec::len) else {
        return Vec::new();
    };

    let mut pooled = vec![0.0f32; width];
    for row in rows.iter().filter(|r| r.len() == width) {
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
    }

    let n = rows.iter().filter(|r| r.len() == width).count() as f32;
    pooled.iter_mut().for_each(|v| *v /= n);
    pooled
}
