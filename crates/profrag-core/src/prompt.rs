//! ============================================================================
//! Prompt Assembly - System instruction and retrieved-review context
//! ============================================================================
//! Builds the exact message list the answer model sees:
//!
//! ```text
//! [SYSTEM_PROMPT] + [history minus last] + [last user text + Returned Results]
//! ```
//! ============================================================================

use std::fmt::Write;

use crate::types::{ChatMessage, ProfessorMatch};

/// Fixed instruction for the answer model
pub const SYSTEM_PROMPT: &str = "You are an AI assistant for a 'Rate My Professor' platform, designed to help students find the best professors based on their specific queries. Your primary function is to analyze each student's request, retrieve relevant professor information using a Retrieval-Augmented Generation (RAG) system, and provide details about the top 3 professors who best match the student's needs.

For each query:

Analyze the student's request to understand their specific needs, preferences, and any criteria they’ve mentioned.
Retrieve information about the top 3 professors who align with the student's query using the RAG system.
Present the information clearly, concisely, and in an organized manner.
For each professor, provide:

Name and title
Department or field of expertise
Notable courses taught
Brief summary of teaching style, strengths, and any relevant feedback
Overall rating (if available)
Other relevant details that address the student’s specific query
Guidelines:

Be Objective: Present factual information without bias or unnecessary comparisons unless explicitly asked by the student.
Relate to the Query: Highlight how each professor’s qualities specifically relate to the student’s request.
Ask for Clarification: If the query is too broad, vague, or lacks detail, ask the student for more information to refine the results.
Handle Limitations Gracefully: If there's insufficient information to fully answer a query, inform the student and suggest how they might refine their search.
Your responses should be professional, respectful, and tailored to each student's unique needs, ensuring that they receive the most relevant and helpful information possible.";

/// Render retrieved reviews, one entry per match in ranking order
pub fn format_matches(matches: &[ProfessorMatch]) -> String {
    let mut block = String::new();

    for m in matches {
        // Writing into a String cannot fail
        let _ = write!(
            block,
            "\nReturned Results:\nProfessor: {}\nReview: {}\nSubject: {}\nStars: {}\n\n",
            m.id, m.metadata.review, m.metadata.subject, m.metadata.stars
        );
    }

    block
}

/// Append the retrieved-review block to the student's question
pub fn augment_query(query: &str, matches: &[ProfessorMatch]) -> String {
    let mut augmented = String::with_capacity(query.len() + 256 * matches.len());
    augmented.push_str(query);
    augmented.push_str(&format_matches(matches));
    augmented
}

/// System instruction, then prior turns in order, then the augmented question
pub fn build_generation_messages(
    system_prompt: &str,
    history: &[ChatMessage],
    augmented_query: String,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(augmented_query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, Stars};

    fn sample_matches() -> Vec<ProfessorMatch> {
        vec![
            ProfessorMatch::new("Dr. Emily Chen", "Explains concepts clearly", "Physics", Stars::Number(5.0)),
            ProfessorMatch::new("Dr. Raj Patel", "Tough grader", "Calculus", Stars::Number(3.0)),
            ProfessorMatch::new("Dr. Ana Ruiz", "Fun labs", "Chemistry", Stars::Number(4.5)),
        ]
    }

    #[test]
    fn test_block_has_one_entry_per_match() {
        for n in 0..=3 {
            let matches = &sample_matches()[..n];
            let block = format_matches(matches);

            assert_eq!(block.matches("Returned Results:").count(), n);
            assert_eq!(block.matches("Professor: ").count(), n);
            assert_eq!(block.matches("Stars: ").count(), n);
        }
    }

    #[test]
    fn test_entry_field_order() {
        let block = format_matches(&sample_matches()[..1]);

        let professor = block.find("Professor: Dr. Emily Chen").unwrap();
        let review = block.find("Review: Explains concepts clearly").unwrap();
        let subject = block.find("Subject: Physics").unwrap();
        let stars = block.find("Stars: 5").unwrap();

        assert!(professor < review && review < subject && subject < stars);
    }

    #[test]
    fn test_entries_keep_ranking_order() {
        let block = format_matches(&sample_matches());
        let chen = block.find("Dr. Emily Chen").unwrap();
        let patel = block.find("Dr. Raj Patel").unwrap();
        let ruiz = block.find("Dr. Ana Ruiz").unwrap();
        assert!(chen < patel && patel < ruiz);
    }

    #[test]
    fn test_augment_query_prefixes_question_text() {
        let query = "Who teaches easy intro physics courses?";
        let augmented = augment_query(query, &sample_matches());

        assert!(augmented.starts_with(query));
        assert_eq!(&augmented[query.len()..], format_matches(&sample_matches()));
        assert_eq!(augment_query(query, &[]), query);
    }

    #[test]
    fn test_system_prompt_typography() {
        assert!(SYSTEM_PROMPT.contains("any criteria they\u{2019}ve mentioned"));
        assert!(SYSTEM_PROMPT.contains("the student\u{2019}s specific query"));
        assert!(SYSTEM_PROMPT.contains("each professor\u{2019}s qualities"));
        assert!(SYSTEM_PROMPT.starts_with("You are an AI assistant for a 'Rate My Professor' platform"));
    }

    #[test]
    fn test_message_layout() {
        let history = vec![
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello! What are you looking for?"),
        ];

        let messages = build_generation_messages(SYSTEM_PROMPT, &history, "augmented".into());

        assert_eq!(messages.len(), history.len() + 2);
        assert_eq!(messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(&messages[1..3], &history[..]);
        assert_eq!(messages[3], ChatMessage::user("augmented"));
        assert_eq!(
            messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
    }
}
