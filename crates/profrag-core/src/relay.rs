//! Token relay between the generation stream and the HTTP body.
//!
//! Forwards non-empty fragments in arrival order, ends right after the first
//! error, and logs how the stream ended. Dropping the relay early (caller went
//! away) drops the upstream stream with it, which releases the connection.

use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};

use crate::generation::{GenerationError, TokenStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Streaming,
    Completed,
    Failed,
}

pub struct TokenRelay {
    inner: TokenStream,
    request_id: String,
    fragments: usize,
    bytes: usize,
    state: RelayState,
}

impl TokenRelay {
    pub fn new(inner: TokenStream, request_id: impl Into<String>) -> Self {
        Self {
            inner,
            request_id: request_id.into(),
            fragments: 0,
            bytes: 0,
            state: RelayState::Streaming,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Fragments forwarded so far
    pub fn fragments(&self) -> usize {
        self.fragments
    }
}

impl Stream for TokenRelay {
    type Item = Result<String, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.state != RelayState::Streaming {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    self.fragments += 1;
                    self.bytes += fragment.len();
                    return Poll::Ready(Some(Ok(fragment)));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.state = RelayState::Failed;
                    warn!(
                        request_id = %self.request_id,
                        fragments = self.fragments,
                        error = %e,
                        "generation stream failed mid-answer"
                    );
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.state = RelayState::Completed;
                    info!(
                        request_id = %self.request_id,
                        fragments = self.fragments,
                        bytes = self.bytes,
                        "answer streamed"
                    );
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl Drop for TokenRelay {
    fn drop(&mut self) {
        if self.state == RelayState::Streaming {
            info!(
                request_id = %self.request_id,
                fragments = self.fragments,
                "caller disconnected, abandoning generation stream"
            );
        } else {
            debug!(request_id = %self.request_id, "token relay released");
        }
    }
}
