//! Message pipeline: decode, validate, look up, publish, classify.
//!
//! Each delivered payload is turned into exactly one [`Outcome`], and the
//! outcome alone decides the acknowledgment. Failures are bucketed by
//! permanence: a payload that cannot be decoded will never decode, so it goes
//! to the DLQ, while a store or publish failure may clear on a later attempt
//! and is requeued.

use tracing::{error, info};

use crate::queue::{Answer, AnswerPublisher, Question};
use crate::store::{lookup, AnswerStore};

/// Result of processing one delivered message.
#[derive(Debug)]
pub enum Outcome {
    /// Decoded, answered and published
    Accepted,
    /// Payload is not valid JSON
    Malformed(serde_json::Error),
    /// Valid JSON without a usable `question` field
    InvalidShape,
    /// Transient failure, e.g. store or publish error
    Unexpected(anyhow::Error),
}

/// Acknowledgment to perform on the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Remove the message from the queue
    Ack,
    /// Reject it; requeued for retry or dead-lettered depending on `requeue`
    Reject { requeue: bool },
}

/// Map an outcome to its acknowledgment.
///
/// Permanent defects are rejected without requeue so the broker dead-letters
/// them; transient failures are requeued for another attempt.
pub fn ack_action(outcome: &Outcome) -> AckAction {
    match outcome {
        Outcome::Accepted => AckAction::Ack,
        Outcome::Malformed(_) | Outcome::InvalidShape => AckAction::Reject { requeue: false },
        Outcome::Unexpected(_) => AckAction::Reject { requeue: true },
    }
}

/// Run one payload through the pipeline.
///
/// Publishes to the answers queue if and only if the outcome is
/// [`Outcome::Accepted`]; the publish is attempted at most once.
pub async fn process(
    payload: &[u8],
    store: &dyn AnswerStore,
    publisher: &dyn AnswerPublisher,
) -> Outcome {
    let message = match serde_json::from_slice::<Question>(payload) {
        Ok(message) => message,
        Err(e) => {
            error!(
                error = %e,
                body_preview = %preview(payload),
                "question_decode_failed"
            );
            return Outcome::Malformed(e);
        }
    };

    if message.question.trim().is_empty() {
        error!(body_preview = %preview(payload), "question_missing");
        return Outcome::InvalidShape;
    }

    info!(question = %message.question, "question_decoded");

    let answer = match lookup(store, &message.question).await {
        Ok(answer) => answer,
        Err(e) => {
            error!(error = %e, "answer_lookup_failed");
            return Outcome::Unexpected(e.into());
        }
    };

    let response = Answer::new(message.question, answer);
    if let Err(e) = publisher.publish(&response).await {
        error!(error = %e, "answer_publish_failed");
        return Outcome::Unexpected(e);
    }

    Outcome::Accepted
}

/// Truncated lossy rendering of a raw payload for postmortem logs.
fn preview(payload: &[u8]) -> String {
    String::from_utf8_lossy(&payload[..payload.len().min(500)]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, FALLBACK_ANSWER};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeStore {
        answers: HashMap<String, String>,
        fail: bool,
    }

    impl FakeStore {
        fn with_answer(key: &str, answer: &str) -> Self {
            let mut answers = HashMap::new();
            answers.insert(key.to_string(), answer.to_string());
            Self { answers, fail: false }
        }

        fn empty() -> Self {
            Self { answers: HashMap::new(), fail: false }
        }

        fn failing() -> Self {
            Self { answers: HashMap::new(), fail: true }
        }
    }

    #[async_trait]
    impl AnswerStore for FakeStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.fail {
                return Err(StoreError::Redis(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "simulated store outage",
                ))));
            }
            Ok(self.answers.get(key).cloned())
        }
    }

    struct FakePublisher {
        published: Mutex<Vec<Answer>>,
        fail: bool,
    }

    impl FakePublisher {
        fn new() -> Self {
            Self { published: Mutex::new(Vec::new()), fail: false }
        }

        fn failing() -> Self {
            Self { published: Mutex::new(Vec::new()), fail: true }
        }

        fn published(&self) -> Vec<Answer> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnswerPublisher for FakePublisher {
        async fn publish(&self, answer: &Answer) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("simulated publish failure");
            }
            self.published.lock().unwrap().push(answer.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_process_publishes_stored_answer_and_acks() {
        let store = FakeStore::with_answer("nombre de la asignatura", "Arquitectura de software");
        let publisher = FakePublisher::new();
        let payload = br#"{"question": "Nombre de la asignatura"}"#;

        let outcome = process(payload, &store, &publisher).await;

        assert!(matches!(outcome, Outcome::Accepted));
        assert_eq!(ack_action(&outcome), AckAction::Ack);
        assert_eq!(
            publisher.published(),
            vec![Answer::new(
                "Nombre de la asignatura".to_string(),
                "Arquitectura de software".to_string(),
            )]
        );
    }

    #[tokio::test]
    async fn test_process_unknown_question_publishes_fallback() {
        let store = FakeStore::empty();
        let publisher = FakePublisher::new();
        let payload = br#"{"question": "Pregunta inexistente"}"#;

        let outcome = process(payload, &store, &publisher).await;

        assert!(matches!(outcome, Outcome::Accepted));
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_process_malformed_payload_is_quarantined() {
        let store = FakeStore::empty();
        let publisher = FakePublisher::new();

        let outcome = process(b"{ esto no es json }", &store, &publisher).await;

        assert!(matches!(outcome, Outcome::Malformed(_)));
        assert_eq!(ack_action(&outcome), AckAction::Reject { requeue: false });
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_process_missing_question_field_is_quarantined() {
        let store = FakeStore::empty();
        let publisher = FakePublisher::new();
        let payload = br#"{"clave_incorrecta": "valor"}"#;

        let outcome = process(payload, &store, &publisher).await;

        assert!(matches!(outcome, Outcome::InvalidShape));
        assert_eq!(ack_action(&outcome), AckAction::Reject { requeue: false });
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_process_store_error_is_requeued() {
        let store = FakeStore::failing();
        let publisher = FakePublisher::new();
        let payload = br#"{"question": "hola"}"#;

        let outcome = process(payload, &store, &publisher).await;

        assert!(matches!(outcome, Outcome::Unexpected(_)));
        assert_eq!(ack_action(&outcome), AckAction::Reject { requeue: true });
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_process_publish_failure_is_requeued() {
        let store = FakeStore::with_answer("hola", "mundo");
        let publisher = FakePublisher::failing();
        let payload = br#"{"question": "hola"}"#;

        let outcome = process(payload, &store, &publisher).await;

        assert!(matches!(outcome, Outcome::Unexpected(_)));
        assert_eq!(ack_action(&outcome), AckAction::Reject { requeue: true });
    }

    #[test]
    fn test_ack_action_mapping() {
        let malformed = serde_json::from_str::<Question>("nope").unwrap_err();

        assert_eq!(ack_action(&Outcome::Accepted), AckAction::Ack);
        assert_eq!(
            ack_action(&Outcome::Malformed(malformed)),
            AckAction::Reject { requeue: false }
        );
        assert_eq!(ack_action(&Outcome::InvalidShape), AckAction::Reject { requeue: false });
        assert_eq!(
            ack_action(&Outcome::Unexpected(anyhow::anyhow!("boom"))),
            AckAction::Reject { requeue: true }
        );
    }
}
