//! Message queue and message cache.
//!
//! The durable hand-off between the AMG (which publishes jobs) and the
//! dispatcher (which drains them). See [`queue::MessageQueue`] for
//! ordering and [`cache::MessageCache`] for the retry metadata that
//! outlives queue membership.

mod cache;
mod msg;
#[allow(clippy::module_inception)]
mod queue;

use thiserror::Error;

pub use cache::{CacheEntry, LastError, MessageCache};
pub use msg::{MsgName, MsgNameError, MAX_MSG_NAME_LENGTH};
pub use queue::{MessageQueue, QueueEntry};

/// Errors raised by queue and cache operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue file corrupt")]
    Corrupt,
    #[error("queue file version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u8, expected: u8 },
    #[error("message `{0}` already queued")]
    Duplicate(String),
    #[error("unknown message: {0}")]
    UnknownMessage(String),
    #[error("position {0} out of range")]
    BadPosition(usize),
    #[error(transparent)]
    BadName(#[from] MsgNameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
