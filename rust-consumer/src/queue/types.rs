//! Wire types for the question and answer queues.

use serde::{Deserialize, Serialize};

/// Inbound question payload consumed from the questions queue.
///
/// The `question` field defaults to an empty string when absent so that a
/// well-formed JSON object missing the field can be told apart from a payload
/// that is not JSON at all. Callers must check for emptiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// The question text
    #[serde(default)]
    pub question: String,
}

/// Outbound answer payload published to the answers queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The original question, echoed back verbatim
    pub question: String,
    /// The answer looked up for it
    pub answer: String,
}

impl Answer {
    /// Build an answer message from a question and its looked-up answer.
    pub fn new(question: String, answer: String) -> Self {
        Self { question, answer }
    }
}
