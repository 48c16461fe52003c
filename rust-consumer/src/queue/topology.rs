//! Queue topology declaration.
//!
//! Declares the three durable queues on every connection and sets the
//! prefetch limit. Declarations are idempotent, so re-running them after a
//! reconnect is a no-op when the queues already exist.

use lapin::{
    options::{BasicQosOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel,
};
use tracing::info;

use crate::config::Config;

/// Declare the questions queue, its dead-letter queue and the answers queue,
/// then limit the consumer to one unacknowledged message in flight.
///
/// The DLQ is declared first: the questions queue references it in its
/// dead-letter arguments, so it must exist before that declaration runs.
/// Rejected messages (`requeue: false`) are routed to the DLQ through the
/// default exchange.
pub async fn declare_topology(channel: &Channel, config: &Config) -> Result<(), lapin::Error> {
    let dlq = config.dlq_queue();

    channel
        .queue_declare(
            &dlq,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut args = FieldTable::default();
    args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
    args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(dlq.clone().into()));

    channel
        .queue_declare(
            &config.questions_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await?;

    channel
        .queue_declare(
            &config.answers_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    // One unacknowledged message in flight: the broker holds back further
    // deliveries until the current one is acked or rejected.
    channel.basic_qos(1, BasicQosOptions::default()).await?;

    info!(
        questions_queue = %config.questions_queue,
        answers_queue = %config.answers_queue,
        dlq = %dlq,
        "rabbitmq_topology_declared"
    );

    Ok(())
}
