//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Message types for the question/answer wire format
//! - Queue topology declaration (questions queue, its DLQ, answers queue)
//! - Async publisher for the answers queue

pub mod publisher;
pub mod topology;
pub mod types;

pub use publisher::{AnswerPublisher, ChannelPublisher};
pub use topology::declare_topology;
pub use types::{Answer, Question};
