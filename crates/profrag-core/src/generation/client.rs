//! OpenAI-compatible streaming chat completions over the Hugging Face router.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, warn};

use super::sse::{SseDecoder, DONE_MARKER};
use super::{ChatGenerator, GenerationError, GenerationRequest, TokenStream};
use crate::types::ChatMessage;

/// Default chat completions base URL
pub const DEFAULT_CHAT_URL: &str = "https://router.huggingface.co/v1";

/// Default answer model
pub const DEFAULT_CHAT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

enum StreamEvent {
    Fragment(String),
    Skip,
    Done,
}

fn parse_event(data: &str) -> Result<StreamEvent, GenerationError> {
    let data = data.trim();
    if data == DONE_MARKER {
        return Ok(StreamEvent::Done);
    }
    if data.is_empty() {
        return Ok(StreamEvent::Skip);
    }

    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| GenerationError::Parse(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(GenerationError::Upstream(error_text(&error)));
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty());

    Ok(match content {
        Some(text) => StreamEvent::Fragment(text),
        None => StreamEvent::Skip,
    })
}

fn error_text(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    body_ended: bool,
    finished: bool,
}

/// Turn a raw SSE body into text fragments. Ends after `[DONE]`, at end of
/// body, or right after yielding the first error.
pub(crate) fn decode_token_stream<S, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<GenerationError> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        body_ended: false,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(data) = state.pending.pop_front() {
                match parse_event(&data) {
                    Ok(StreamEvent::Fragment(text)) => return Some((Ok(text), state)),
                    Ok(StreamEvent::Skip) => continue,
                    Ok(StreamEvent::Done) => {
                        debug!("Generation stream finished");
                        return None;
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.body_ended {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(events) => state.pending.extend(events),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.body_ended = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}

/// Streaming chat completions client
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionClient {
    pub fn new(client: Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_CHAT_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }

    pub fn new_custom(client: Client, api_key: String, base_url: String, model: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatGenerator for ChatCompletionClient {
    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError> {
        debug!(
            "Opening completion stream ({} messages, model: {})",
            request.messages.len(),
            self.model
        );

        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").map(error_text))
                .unwrap_or(body);
            warn!("Completion stream rejected ({}): {}", status, message);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(decode_token_stream(response.bytes_stream()))
    }
}
