//! Redis-backed fast tier.
//!
//! The buffer is one Redis list: refills `RPUSH` at the tail and dispatch
//! `LPOP`s from the head, so `pop_one` is atomic at the protocol level.
//! Every round trip is bounded by `op_timeout` so an unreachable server
//! degrades into a [`QueueError`] quickly instead of stalling callers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::{FastQueue, QueueError};

/// Values per `RPUSH` command.
const PUSH_CHUNK: usize = 500;

/// Redis list client.
pub struct RedisQueue {
    client: redis::Client,
    /// Established on first use; a failed attempt leaves it empty so the
    /// next call retries.
    conn: OnceCell<ConnectionManager>,
    key: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("key", &self.key)
            .field("connected", &self.conn.initialized())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisQueue {
    /// Creates a queue client without connecting.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/0")
    /// * `key` - List key holding the keywords
    /// * `op_timeout` - Upper bound for connecting and for each command
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the URL is malformed.
    pub fn new(redis_url: &str, key: &str, op_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            key: key.to_string(),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, QueueError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                match tokio::time::timeout(
                    self.op_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                {
                    Ok(Ok(conn)) => {
                        tracing::info!(key = %self.key, "Redis connection established");
                        Ok(conn)
                    }
                    Ok(Err(e)) => Err(QueueError::ConnectionFailed(e.to_string())),
                    Err(_) => Err(QueueError::Timeout(self.op_timeout)),
                }
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(QueueError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl FastQueue for RedisQueue {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn push_many(&self, keywords: &[String]) -> Result<usize, QueueError> {
        if keywords.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;

        // MULTI/EXEC so poppers never observe half of a batch.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for chunk in keywords.chunks(PUSH_CHUNK) {
            pipe.rpush(&self.key, chunk).ignore();
        }
        self.bounded(pipe.query_async::<_, ()>(&mut conn)).await?;

        Ok(keywords.len())
    }

    async fn pop_one(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.lpop::<_, Option<String>>(&self.key, None))
            .await
    }

    async fn peek_range(&self, start: usize, count: usize) -> Result<Vec<String>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let stop = (start + count) as isize - 1;
        self.bounded(conn.lrange::<_, Vec<String>>(&self.key, start as isize, stop))
            .await
    }

    async fn trim_front(&self, count: usize) -> Result<(), QueueError> {
        if count == 0 {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded(conn.ltrim::<_, ()>(&self.key, count as isize, -1))
            .await
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.del::<_, ()>(&self.key)).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.llen::<_, usize>(&self.key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let err = RedisQueue::new("not a url", "k", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, QueueError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_errors_quickly() {
        let queue =
            RedisQueue::new("redis://127.0.0.1:1", "k", Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        assert!(queue.pop_one().await.is_err());
        assert!(queue.push_many(&["a".to_string()]).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_inputs_skip_round_trips() {
        let queue =
            RedisQueue::new("redis://127.0.0.1:1", "k", Duration::from_millis(100)).unwrap();
        assert_eq!(queue.push_many(&[]).await.unwrap(), 0);
        assert!(queue.peek_range(0, 0).await.unwrap().is_empty());
        queue.trim_front(0).await.unwrap();
    }
}
