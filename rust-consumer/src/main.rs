//! Chatbot consumer - async RabbitMQ worker answering questions from Redis.
//!
//! The consumer reads questions from the questions queue, looks each one up
//! in Redis, and publishes the answer to the answers queue. Malformed
//! messages land in the dead-letter queue; broker outages are survived by
//! reconnecting.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatbot::{consumer, Config, RedisStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("consumer_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        rabbitmq_host = %config.rabbitmq_host,
        redis_host = %config.redis_host,
        questions_queue = %config.questions_queue,
        answers_queue = %config.answers_queue,
        "config_loaded"
    );

    // An unreachable store at startup is fatal; the error propagates and the
    // process exits non-zero before consuming anything.
    let store = RedisStore::connect(&config.redis_url()).await?;

    consumer::run(config, &store).await?;

    Ok(())
}
