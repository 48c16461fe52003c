//! RabbitMQ consumer module using lapin.
//!
//! This module owns the broker connection lifecycle. One connection epoch
//! runs connect → declare topology → consume; any connection-level failure
//! tears the epoch down and the supervisor retries after a fixed delay,
//! indefinitely, until the shutdown signal fires. The broker queues are
//! durable, so nothing is cached across reconnects.

use anyhow::Result;
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use thiserror::Error;
use tokio::{signal, sync::watch, time::sleep};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::processor::{ack_action, process, AckAction};
use crate::queue::{declare_topology, AnswerPublisher, ChannelPublisher};
use crate::store::AnswerStore;

/// Why a connection epoch ended.
#[derive(Debug, Error)]
enum EpochError {
    /// Broker unreachable or connection dropped; retried after the delay
    #[error("broker connection failed: {0}")]
    Connection(#[from] lapin::Error),

    /// Anything else surfacing from the consume loop; the epoch is shut down
    /// in order before retrying
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Run the consumer until the process receives SIGINT or SIGTERM.
///
/// This function:
/// 1. Installs the termination signal handlers
/// 2. Connects to RabbitMQ and declares the queue topology
/// 3. Consumes questions one at a time, answering each from the store
/// 4. Reconnects after the configured delay on any connection failure
pub async fn run(config: Config, store: &dyn AnswerStore) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_termination().await;
        let _ = shutdown_tx.send(true);
    });

    run_until_shutdown(&config, store, shutdown_rx).await
}

/// Supervisor loop: run connection epochs until told to stop.
///
/// Split from [`run`] so tests can drive the loop with their own shutdown
/// channel instead of process signals.
pub async fn run_until_shutdown(
    config: &Config,
    store: &dyn AnswerStore,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match run_epoch(config, store, &mut shutdown).await {
            Ok(()) => break,
            Err(EpochError::Connection(e)) => {
                warn!(
                    error = %e,
                    retry_delay_secs = config.retry_delay.as_secs(),
                    "rabbitmq_connection_error"
                );
            }
            Err(EpochError::Unexpected(e)) => {
                error!(
                    error = %e,
                    retry_delay_secs = config.retry_delay.as_secs(),
                    "consumer_unexpected_error"
                );
            }
        }

        // Wait out the retry delay, but wake immediately on shutdown
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = sleep(config.retry_delay) => {}
        }
    }

    info!("consumer_shutdown_complete");
    Ok(())
}

/// One connection epoch: connect, declare, consume until an error or
/// shutdown, then close channel and connection in order.
async fn run_epoch(
    config: &Config,
    store: &dyn AnswerStore,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), EpochError> {
    info!(host = %config.rabbitmq_host, port = config.rabbitmq_port, "rabbitmq_connecting");

    let conn = Connection::connect(&config.amqp_url(), ConnectionProperties::default()).await?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await?;

    info!("rabbitmq_channel_created");

    declare_topology(&channel, config).await?;

    let mut consumer = channel
        .basic_consume(
            &config.questions_queue,
            "chatbot-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = %config.questions_queue, "rabbitmq_consumer_started");

    let publisher = ChannelPublisher::new(channel.clone(), config.answers_queue.clone());

    let result = consume_loop(&channel, &mut consumer, store, &publisher, shutdown).await;

    stop(&channel, &conn).await;

    result
}

/// Consume deliveries one at a time until shutdown or a broker error.
///
/// The prefetch limit of 1 means the broker will not deliver the next
/// message until the current one has been acked or rejected, so each
/// iteration handles exactly one in-flight message.
async fn consume_loop(
    channel: &Channel,
    consumer: &mut Consumer,
    store: &dyn AnswerStore,
    publisher: &ChannelPublisher,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), EpochError> {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A closed shutdown channel can never signal later; treat it
                // like a stop request rather than consuming forever.
                if changed.is_err() || *shutdown.borrow() {
                    info!("consumer_stopping");
                    return Ok(());
                }
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        handle_delivery(channel, store, publisher, delivery).await?;
                    }
                    Some(Err(e)) => return Err(EpochError::Connection(e)),
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        return Err(EpochError::Connection(lapin::Error::InvalidChannelState(
                            lapin::ChannelState::Closed,
                        )));
                    }
                }
            }
        }
    }
}

/// Process one delivery and perform exactly one acknowledgment action on it.
async fn handle_delivery(
    channel: &Channel,
    store: &dyn AnswerStore,
    publisher: &dyn AnswerPublisher,
    delivery: Delivery,
) -> Result<(), EpochError> {
    let delivery_tag = delivery.delivery_tag;

    info!(
        delivery_tag = delivery_tag,
        body_length = delivery.data.len(),
        "question_received"
    );

    let outcome = process(&delivery.data, store, publisher).await;

    match ack_action(&outcome) {
        AckAction::Ack => {
            channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await?;

            info!(delivery_tag = delivery_tag, "question_acked");
        }
        AckAction::Reject { requeue } => {
            channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue,
                        ..Default::default()
                    },
                )
                .await?;

            if requeue {
                warn!(delivery_tag = delivery_tag, "message_requeued");
            } else {
                error!(delivery_tag = delivery_tag, "message_quarantined");
            }
        }
    }

    Ok(())
}

/// Close the channel, then the connection. Safe to call when either is
/// already closed.
async fn stop(channel: &Channel, conn: &Connection) {
    if channel.status().connected() {
        if let Err(e) = channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }
    }

    if conn.status().connected() {
        if let Err(e) = conn.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }
    }

    info!("rabbitmq_connection_closed");
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn wait_for_termination() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
