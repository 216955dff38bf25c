//! ============================================================================
//! Chat Types - Conversation messages and professor review matches
//! ============================================================================
//! Defines the inbound conversation shape and the records returned by the
//! vector index. Nothing here outlives a single request.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn in a conversation. Order within a conversation is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Star rating as stored in the index: usually a number, occasionally text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stars {
    Number(f64),
    Text(String),
}

impl Default for Stars {
    fn default() -> Self {
        Stars::Text(String::new())
    }
}

impl std::fmt::Display for Stars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // 4.0 renders as "4", 4.5 as "4.5"
            Stars::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{}", *n as i64),
            Stars::Number(n) => write!(f, "{}", n),
            Stars::Text(s) => f.write_str(s),
        }
    }
}

/// Review metadata attached to each indexed professor record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetadata {
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub stars: Stars,
}

/// A nearest-neighbour hit from the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfessorMatch {
    /// Record identifier, which is the professor's name
    pub id: String,
    /// Similarity score. Used for logging only, never shown to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: ReviewMetadata,
}

impl ProfessorMatch {
    pub fn new(
        id: impl Into<String>,
        review: impl Into<String>,
        subject: impl Into<String>,
        stars: Stars,
    ) -> Self {
        Self {
            id: id.into(),
            score: None,
            metadata: ReviewMetadata {
                review: review.into(),
                subject: subject.into(),
                stars,
            },
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}
