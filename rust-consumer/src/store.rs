//! Answer store lookup backed by Redis.
//!
//! Questions are normalized to lowercase, trimmed keys before the lookup, so
//! `"Nombre"`, `"nombre "` and `" NOMBRE"` all hit the same entry. A missing
//! key is a normal result answered with a fixed fallback text, not an error;
//! only store connectivity failures propagate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use thiserror::Error;
use tracing::info;

/// Answer returned when the store holds nothing for a question.
pub const FALLBACK_ANSWER: &str =
    "Lo siento, no tengo una respuesta para esa pregunta. Intenta ser más específico.";

/// Error from the underlying key-value store. Always transient: the store
/// contents are managed externally, so a failed command means connectivity
/// trouble, not a bad key.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Read-only key-value store holding the chatbot's answers.
///
/// Injected into the consumer so tests can substitute an in-memory fake
/// without a running Redis.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Answer store backed by a real Redis connection.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and verify the server is reachable.
    ///
    /// Fails when the server cannot be reached; the caller decides whether
    /// that aborts the process. The connection manager reconnects on its own
    /// afterwards, so this is the only place a Redis outage is fatal.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        let mut probe = conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut probe)
            .await
            .context("Redis ping failed")?;

        info!(url = %url, "redis_connected");

        Ok(Self { conn })
    }
}

#[async_trait]
impl AnswerStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        // ConnectionManager is a cheap clone over a shared multiplexed
        // connection; cloning sidesteps the &mut self requirement.
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}

/// Normalize a question into its lookup key: lowercase, surrounding
/// whitespace trimmed.
pub fn normalize(question: &str) -> String {
    question.trim().to_lowercase()
}

/// Look up the answer for a question.
///
/// Returns the stored value when present and non-empty, the fallback text
/// otherwise. Only a store connectivity failure is an error.
pub async fn lookup(store: &dyn AnswerStore, question: &str) -> Result<String, StoreError> {
    let key = normalize(question);

    match store.get(&key).await? {
        Some(answer) if !answer.is_empty() => Ok(answer),
        _ => Ok(FALLBACK_ANSWER.to_string()),
    }
}
