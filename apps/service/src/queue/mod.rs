/// Queue distribution layer
///
/// A dispatcher pushes jobs (serialized tests) onto the job queue, workers
/// pop and execute them and push results onto the result queue, bridges pop
/// results and forward the ones matching their filter to a notifier.
///
/// Delivery is at-most-once once a job is popped: a worker that dies while
/// running a job loses it, nothing is requeued.
pub mod bridge;
pub mod broker;
pub mod dispatcher;
pub mod memory;
pub mod worker;

pub use bridge::Bridge;
pub use broker::RemoteQueue;
pub use dispatcher::Dispatcher;
pub use memory::MemoryQueue;
pub use worker::Worker;

use std::io::Error as IoError;
use std::time::Duration;

use thiserror::Error;

/// Pause after a failed queue operation before the loops try again
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed: {0}")]
    Io(#[from] IoError),

    #[error("malformed queue message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("queue framing failed: {0}")]
    Framing(#[from] tokio_util::codec::LinesCodecError),

    #[error("queue broker error: {0}")]
    Broker(String),

    #[error("queue connection closed")]
    Closed,
}

/// Named FIFO lists shared between processes
#[async_trait::async_trait]
pub trait Queue: Send + Sync {
    /// Append a payload to the tail of `queue`
    async fn push(&self, queue: &str, payload: String) -> Result<(), QueueError>;

    /// Take the head of `queue`, waiting until one is available
    async fn blocking_pop(&self, queue: &str) -> Result<String, QueueError>;

    /// Take the head of `queue` if there is one
    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError>;
}
