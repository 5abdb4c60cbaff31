//! Fast queue tier: a shared, ordered list of keyword strings.
//!
//! The tier is a disposable buffer in front of the durable store. It holds
//! bare keyword strings with no link back to store ids; anything lost here
//! has already been marked read in the store.
//!
//! Two interchangeable backends implement [`FastQueue`]:
//!
//! - **RedisQueue**: a Redis list (`RPUSH` / `LPOP`), shared across processes
//! - **MemoryQueue**: an in-process `VecDeque`, for single-node runs and tests
//!
//! The backend is chosen once at startup from [`QueueBackend`]; call sites
//! only ever see `Arc<dyn FastQueue>`.
//!
//! # Batch claims
//!
//! [`FastQueue::claim_batch`] reads the front of the list and then trims it
//! in a second round trip. A concurrent `pop_one` can remove elements in
//! between, so a batch claim may overlap with, or skip past, items served
//! elsewhere. It is best-effort only; single-keyword dispatch always uses
//! the atomic [`FastQueue::pop_one`].

pub mod memory;
pub mod redis_list;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryQueue;
pub use redis_list::RedisQueue;

/// Default list key, shared with existing deployments.
pub const DEFAULT_QUEUE_KEY: &str = "keyword_list";

/// Errors that can occur during fast-tier operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the backing store.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Operation timed out.
    #[error("Queue operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Ordered keyword buffer shared by refill and dispatch.
#[async_trait]
pub trait FastQueue: Send + Sync {
    /// Backend label used in logs.
    fn backend(&self) -> &'static str;

    /// Appends keywords to the tail, preserving order. Returns the count pushed.
    async fn push_many(&self, keywords: &[String]) -> Result<usize, QueueError>;

    /// Atomically removes and returns the head element.
    async fn pop_one(&self) -> Result<Option<String>, QueueError>;

    /// Returns up to `count` elements starting at `start` without removing them.
    async fn peek_range(&self, start: usize, count: usize) -> Result<Vec<String>, QueueError>;

    /// Drops the first `count` elements.
    async fn trim_front(&self, count: usize) -> Result<(), QueueError>;

    /// Removes every element.
    async fn clear(&self) -> Result<(), QueueError>;

    /// Number of buffered elements.
    async fn len(&self) -> Result<usize, QueueError>;

    /// Claims up to `count` elements from the head using peek + trim.
    ///
    /// Not atomic: see the module docs.
    async fn claim_batch(&self, count: usize) -> Result<Vec<String>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let batch = self.peek_range(0, count).await?;
        if !batch.is_empty() {
            self.trim_front(batch.len()).await?;
        }
        Ok(batch)
    }
}

/// Which fast-tier implementation to run with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueBackend::Redis => write!(f, "redis"),
            QueueBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend '{}'", other)),
        }
    }
}

/// Builds the configured backend.
///
/// Redis connects lazily, so an unreachable server does not prevent
/// startup; operations fail with [`QueueError`] until it comes back.
pub fn build_queue(
    backend: QueueBackend,
    redis_url: &str,
    key: &str,
    op_timeout: Duration,
) -> Result<Arc<dyn FastQueue>, QueueError> {
    let queue: Arc<dyn FastQueue> = match backend {
        QueueBackend::Redis => Arc::new(RedisQueue::new(redis_url, key, op_timeout)?),
        QueueBackend::Memory => Arc::new(MemoryQueue::new()),
    };
    tracing::info!(backend = %backend, key = key, "Fast queue tier configured");
    Ok(queue)
}
