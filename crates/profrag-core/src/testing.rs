//! In-memory stand-ins for the three upstream services.
//!
//! Each fake records what it was asked so tests can assert on call order and
//! payloads. Compiled for this crate's tests and, behind the `testing`
//! feature, for downstream crates' tests.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::sync::Mutex;

use crate::embeddings::{Embedder, EmbeddingError};
use crate::generation::{ChatGenerator, GenerationError, GenerationRequest, TokenStream};
use crate::index::{IndexError, VectorIndex};
use crate::types::{ProfessorMatch, Stars};

/// Three reviews in ranking order
pub fn sample_matches() -> Vec<ProfessorMatch> {
    vec![
        ProfessorMatch::new(
            "Dr. Emily Chen",
            "Makes intro physics approachable, generous partial credit.",
            "Physics",
            Stars::Number(5.0),
        )
        .with_score(0.91),
        ProfessorMatch::new(
            "Dr. Raj Patel",
            "Clear lectures but weekly problem sets are long.",
            "Physics",
            Stars::Number(4.0),
        )
        .with_score(0.87),
        ProfessorMatch::new(
            "Dr. Ana Ruiz",
            "Fun labs, tough final.",
            "Chemistry",
            Stars::Number(3.5),
        )
        .with_score(0.74),
    ]
}

pub struct RecordingEmbedder {
    vector: Vec<f32>,
    calls: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Texts embedded so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(self.vector.clone())
    }
}

/// Always answers 503
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Api {
            status: 503,
            message: "model is currently loading".into(),
        })
    }
}

pub struct RecordingIndex {
    matches: Vec<ProfessorMatch>,
    failure: Mutex<Option<String>>,
    calls: Mutex<Vec<(Vec<f32>, u64)>>,
}

impl RecordingIndex {
    pub fn new(matches: Vec<ProfessorMatch>) -> Self {
        Self {
            matches,
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every following query fail
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// (vector, top_k) pairs queried so far
    pub fn calls(&self) -> Vec<(Vec<f32>, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn query(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<ProfessorMatch>, IndexError> {
        self.calls.lock().unwrap().push((vector, top_k));

        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(IndexError::Api {
                status: 404,
                message,
            });
        }

        Ok(self.matches.iter().take(top_k as usize).cloned().collect())
    }
}

pub struct RecordingGenerator {
    tokens: Vec<String>,
    open_failure: Mutex<Option<String>>,
    trailing_failure: Mutex<Option<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGenerator {
    pub fn new(tokens: Vec<&str>) -> Self {
        Self {
            tokens: tokens.into_iter().map(str::to_string).collect(),
            open_failure: Mutex::new(None),
            trailing_failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Refuse to open the stream at all
    pub fn fail_on_open(&self, message: &str) {
        *self.open_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Yield the scripted tokens, then an upstream error
    pub fn fail_after_tokens(&self, message: &str) {
        *self.trailing_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGenerator for RecordingGenerator {
    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError> {
        self.requests.lock().unwrap().push(request);

        if let Some(message) = self.open_failure.lock().unwrap().clone() {
            return Err(GenerationError::Api {
                status: 429,
                message,
            });
        }

        let mut items: Vec<Result<String, GenerationError>> =
            self.tokens.iter().cloned().map(Ok).collect();
        if let Some(message) = self.trailing_failure.lock().unwrap().clone() {
            items.push(Err(GenerationError::Upstream(message)));
        }

        Ok(stream::iter(items).boxed())
    }
}
