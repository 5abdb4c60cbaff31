//! In-process fast tier backed by a `VecDeque`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{FastQueue, QueueError};

/// Single-process keyword buffer.
///
/// Every operation takes the same lock, so `pop_one` is atomic with
/// respect to concurrent callers.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the buffered keywords, head first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A poisoned buffer is still a valid list of strings.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl FastQueue for MemoryQueue {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn push_many(&self, keywords: &[String]) -> Result<usize, QueueError> {
        self.lock().extend(keywords.iter().cloned());
        Ok(keywords.len())
    }

    async fn pop_one(&self) -> Result<Option<String>, QueueError> {
        Ok(self.lock().pop_front())
    }

    async fn peek_range(&self, start: usize, count: usize) -> Result<Vec<String>, QueueError> {
        Ok(self.lock().iter().skip(start).take(count).cloned().collect())
    }

    async fn trim_front(&self, count: usize) -> Result<(), QueueError> {
        let mut items = self.lock();
        let n = count.min(items.len());
        items.drain(..n);
        Ok(())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn words(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push_many(&words(&["c", "b", "a"])).await.unwrap();

        assert_eq!(queue.pop_one().await.unwrap().as_deref(), Some("c"));
        assert_eq!(queue.snapshot(), words(&["b", "a"]));
    }

    #[tokio::test]
    async fn test_pop_empty_returns_none() {
        let queue = MemoryQueue::new();
        assert!(queue.pop_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_and_trim() {
        let queue = MemoryQueue::new();
        queue.push_many(&words(&["a", "b", "c", "d"])).await.unwrap();

        assert_eq!(queue.peek_range(1, 2).await.unwrap(), words(&["b", "c"]));
        assert_eq!(queue.len().await.unwrap(), 4);

        queue.trim_front(3).await.unwrap();
        assert_eq!(queue.snapshot(), words(&["d"]));

        queue.trim_front(10).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_batch() {
        let queue = MemoryQueue::new();
        queue.push_many(&words(&["a", "b", "c"])).await.unwrap();

        assert_eq!(queue.claim_batch(2).await.unwrap(), words(&["a", "b"]));
        assert_eq!(queue.claim_batch(5).await.unwrap(), words(&["c"]));
        assert!(queue.claim_batch(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = MemoryQueue::new();
        queue.push_many(&words(&["a"])).await.unwrap();
        queue.clear().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pops_are_unique() {
        let queue = Arc::new(MemoryQueue::new());
        let items: Vec<String> = (0..400).map(|i| i.to_string()).collect();
        queue.push_many(&items).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = queue.pop_one().await.unwrap() {
                    got.push(item);
                }
                got
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for item in handle.await.unwrap() {
                assert!(seen.insert(item), "item popped twice");
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
