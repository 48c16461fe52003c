//! Async publisher for the answers queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use tracing::info;

use super::types::Answer;

/// Destination for answer messages.
///
/// The consumer pipeline publishes through this trait so that tests can
/// substitute a recording fake for the real broker channel.
#[async_trait]
pub trait AnswerPublisher: Send + Sync {
    /// Publish one answer. Attempted at most once per message.
    async fn publish(&self, answer: &Answer) -> Result<()>;
}

/// Publisher backed by a lapin channel, writing to a named queue through the
/// default exchange.
///
/// The channel is the same one the consumer reads from; it lives for one
/// connection epoch and is replaced wholesale on reconnect.
pub struct ChannelPublisher {
    channel: Channel,
    queue: String,
}

impl ChannelPublisher {
    /// Create a publisher for the given queue.
    pub fn new(channel: Channel, queue: String) -> Self {
        Self { channel, queue }
    }
}

#[async_trait]
impl AnswerPublisher for ChannelPublisher {
    async fn publish(&self, answer: &Answer) -> Result<()> {
        let body = serde_json::to_vec(answer).context("Failed to serialize answer")?;

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish answer")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = %self.queue,
            body_length = body.len(),
            "answer_published"
        );

        Ok(())
    }
}
