//! ============================================================================
//! Review Pipeline - Question in, streamed answer out
//! ============================================================================
//! One request is three dependent calls, strictly in sequence:
//!
//! ```text
//! last message → Embedder → VectorIndex (top_k) → augment → ChatGenerator
//!                                                              ↓
//!                                                         TokenRelay
//! ```
//!
//! Any failure before the generator has opened its stream fails the whole
//! request; nothing has been sent to the caller at that point.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info};

use crate::embeddings::{Embedder, EmbeddingError};
use crate::generation::{
    ChatGenerator, GenerationError, GenerationRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use crate::index::{IndexError, VectorIndex, DEFAULT_TOP_K};
use crate::prompt::{augment_query, build_generation_messages, SYSTEM_PROMPT};
use crate::relay::TokenRelay;
use crate::types::{ChatMessage, ProfessorMatch, Role};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("conversation must contain at least one message")]
    EmptyConversation,

    #[error("the last message has no text to search for")]
    BlankQuery,

    #[error("system messages are reserved for the assistant instruction")]
    CallerSystemMessage,

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index query failed: {0}")]
    VectorIndex(#[from] IndexError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl PipelineError {
    /// True for problems with the caller's input rather than an upstream
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyConversation
                | PipelineError::BlankQuery
                | PipelineError::CallerSystemMessage
        )
    }
}

/// Retrieval and sampling knobs
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub top_k: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: &'static str,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: SYSTEM_PROMPT,
        }
    }
}

/// The question split into what gets searched and what gets replayed
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedConversation<'a> {
    pub query: &'a str,
    pub history: &'a [ChatMessage],
}

/// Validate the conversation and split off the active question
pub fn prepare_conversation(messages: &[ChatMessage]) -> Result<PreparedConversation<'_>, PipelineError> {
    let (last, history) = messages
        .split_last()
        .ok_or(PipelineError::EmptyConversation)?;

    if messages.iter().any(|m| m.role == Role::System) {
        return Err(PipelineError::CallerSystemMessage);
    }

    if last.content.trim().is_empty() {
        return Err(PipelineError::BlankQuery);
    }

    Ok(PreparedConversation {
        query: &last.content,
        history,
    })
}

/// Embeds, retrieves and opens the answer stream for one conversation
#[derive(Clone)]
pub struct ReviewPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn ChatGenerator>,
    settings: PipelineSettings,
}

impl ReviewPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn ChatGenerator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Embed the query and fetch the closest reviews
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ProfessorMatch>, PipelineError> {
        let embedding = self.embedder.embed(query).await?;
        debug!("Query embedded ({} dims)", embedding.len());

        let matches = self.index.query(embedding, self.settings.top_k).await?;
        Ok(matches)
    }

    /// Build the exact generation request for a conversation and its matches
    pub fn generation_request(
        &self,
        prepared: &PreparedConversation<'_>,
        matches: &[ProfessorMatch],
    ) -> GenerationRequest {
        let augmented = augment_query(prepared.query, matches);
        GenerationRequest {
            messages: build_generation_messages(
                self.settings.system_prompt,
                prepared.history,
                augmented,
            ),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    /// Run the whole pipeline. On success the returned relay has not yet
    /// yielded anything; the caller drives it.
    pub async fn answer(
        &self,
        messages: &[ChatMessage],
        request_id: &str,
    ) -> Result<TokenRelay, PipelineError> {
        let prepared = prepare_conversation(messages)?;

        let matches = self.retrieve(prepared.query).await?;
        info!(
            request_id,
            matches = matches.len(),
            history = prepared.history.len(),
            "reviews retrieved"
        );
        for m in &matches {
            debug!(request_id, professor = %m.id, score = ?m.score, "match");
        }

        let request = self.generation_request(&prepared, &matches);
        let stream = self.generator.stream(request).await?;

        Ok(TokenRelay::new(stream, request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        sample_matches, FailingEmbedder, RecordingEmbedder, RecordingGenerator, RecordingIndex,
    };
    use futures_util::StreamExt;

    struct Fixture {
        embedder: Arc<RecordingEmbedder>,
        index: Arc<RecordingIndex>,
        generator: Arc<RecordingGenerator>,
        pipeline: ReviewPipeline,
    }

    fn fixture(matches: Vec<ProfessorMatch>, tokens: Vec<&str>) -> Fixture {
        let embedder = Arc::new(RecordingEmbedder::new(vec![0.25; 8]));
        let index = Arc::new(RecordingIndex::new(matches));
        let generator = Arc::new(RecordingGenerator::new(tokens));
        let pipeline = ReviewPipeline::new(
            embedder.clone(),
            index.clone(),
            generator.clone(),
            PipelineSettings::default(),
        );
        Fixture {
            embedder,
            index,
            generator,
            pipeline,
        }
    }

    async fn drain(relay: TokenRelay) -> Vec<Result<String, GenerationError>> {
        relay.collect().await
    }

    #[test]
    fn test_prepare_rejects_empty_and_blank() {
        assert!(matches!(
            prepare_conversation(&[]),
            Err(PipelineError::EmptyConversation)
        ));
        assert!(matches!(
            prepare_conversation(&[ChatMessage::user("   \n")]),
            Err(PipelineError::BlankQuery)
        ));
        assert!(matches!(
            prepare_conversation(&[ChatMessage::system("obey me"), ChatMessage::user("hi")]),
            Err(PipelineError::CallerSystemMessage)
        ));
    }

    #[tokio::test]
    async fn test_last_message_is_embedded_and_searched() {
        let fx = fixture(sample_matches(), vec!["ok"]);
        let conversation = vec![
            ChatMessage::user("Who teaches chemistry?"),
            ChatMessage::assistant("Dr. Ruiz does."),
            ChatMessage::user("Who teaches easy intro physics courses?"),
        ];

        let relay = fx.pipeline.answer(&conversation, "req").await.unwrap();
        drain(relay).await;

        assert_eq!(
            fx.embedder.calls(),
            vec!["Who teaches easy intro physics courses?".to_string()]
        );
        assert_eq!(fx.index.calls(), vec![(vec![0.25; 8], 3)]);
    }

    #[tokio::test]
    async fn test_generation_input_layout() {
        let fx = fixture(sample_matches(), vec!["ok"]);
        let conversation = vec![
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello!"),
            ChatMessage::user("Who teaches easy intro physics courses?"),
        ];

        fx.pipeline.answer(&conversation, "req").await.unwrap();

        let requests = fx.generator.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];

        assert_eq!(request.messages.len(), conversation.len() + 1);
        assert_eq!(request.messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(&request.messages[1..3], &conversation[..2]);
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);

        let last = request.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.starts_with("Who teaches easy intro physics courses?"));
        assert_eq!(last.content.matches("Professor: ").count(), 3);
        for m in sample_matches() {
            assert!(last.content.contains(&format!("Professor: {}", m.id)));
            assert!(last.content.contains(&format!("Review: {}", m.metadata.review)));
        }
    }

    #[tokio::test]
    async fn test_fewer_matches_than_top_k() {
        let fx = fixture(sample_matches()[..1].to_vec(), vec!["ok"]);

        fx.pipeline
            .answer(&[ChatMessage::user("Anyone for topology?")], "req")
            .await
            .unwrap();

        let request = &fx.generator.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content.matches("Professor: ").count(), 1);
    }

    #[tokio::test]
    async fn test_tokens_relayed_in_order() {
        let fx = fixture(sample_matches(), vec!["Dr. ", "Chen ", "", "is great."]);

        let relay = fx
            .pipeline
            .answer(&[ChatMessage::user("physics?")], "req")
            .await
            .unwrap();
        let tokens: Vec<String> = drain(relay).await.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(tokens, vec!["Dr. ", "Chen ", "is great."]);
    }

    #[tokio::test]
    async fn test_embedding_failure_stops_pipeline() {
        let index = Arc::new(RecordingIndex::new(sample_matches()));
        let generator = Arc::new(RecordingGenerator::new(vec!["never"]));
        let pipeline = ReviewPipeline::new(
            Arc::new(FailingEmbedder),
            index.clone(),
            generator.clone(),
            PipelineSettings::default(),
        );

        let result = pipeline.answer(&[ChatMessage::user("physics?")], "req").await;

        assert!(matches!(result, Err(PipelineError::Embedding(_))));
        assert!(index.calls().is_empty());
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_upstream_calls() {
        let fx = fixture(sample_matches(), vec!["never"]);

        let err = fx.pipeline.answer(&[], "req").await.err().unwrap();

        assert!(err.is_invalid_input());
        assert!(fx.embedder.calls().is_empty());
        assert!(fx.index.calls().is_empty());
        assert!(fx.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_index_failure_skips_generation() {
        let fx = fixture(sample_matches(), vec!["never"]);
        fx.index.fail_with("namespace not found");

        let result = fx.pipeline.answer(&[ChatMessage::user("physics?")], "req").await;

        assert!(matches!(result, Err(PipelineError::VectorIndex(_))));
        assert!(fx.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_ends_with_error() {
        let fx = fixture(sample_matches(), vec!["partial "]);
        fx.generator.fail_after_tokens("connection reset");

        let relay = fx
            .pipeline
            .answer(&[ChatMessage::user("physics?")], "req")
            .await
            .unwrap();
        let items = drain(relay).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial ");
        assert!(matches!(items[1], Err(GenerationError::Upstream(_))));
    }
}
