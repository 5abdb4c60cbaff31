//! Per-request keyword dispatch.
//!
//! The hot path is a single atomic pop from the fast tier. When the tier is
//! empty or unreachable the service claims unread rows straight from the
//! durable store:
//!
//! ```text
//!   pop_one ──Some──► serve (Queue)
//!      │
//!   None / Err
//!      ▼
//!   select_unread ──empty──► None
//!      │
//!   mark_read ──nothing flipped──► retry (up to claim_attempts)
//!      │ claimed ids
//!      ▼
//!   tier errored at pop? ──yes──► serve claimed[0] (Direct)
//!      │ no
//!   push_many ──Err──► serve claimed[0] (Direct)
//!      │
//!   pop_one ──► serve (Store)
//! ```
//!
//! Only rows this call flipped to read are ever pushed or served, so two
//! callers racing on the same unread rows never both deliver them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::metrics::MetricsCollector;
use crate::queue::FastQueue;
use crate::storage::{KeywordStore, UnreadKeyword};

/// Default rows claimed per fallback.
pub const DEFAULT_DISPATCH_BATCH_SIZE: usize = 1000;

/// Default fallback attempts when concurrent callers claim the rows first.
pub const DEFAULT_CLAIM_ATTEMPTS: usize = 3;

/// Where a dispatched keyword came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchSource {
    /// Popped from the fast tier.
    Queue,
    /// Claimed from the store, buffered, then popped.
    Store,
    /// Claimed from the store and returned without buffering.
    Direct,
}

impl DispatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchSource::Queue => "queue",
            DispatchSource::Store => "store",
            DispatchSource::Direct => "direct",
        }
    }
}

impl std::fmt::Display for DispatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub keyword: String,
    pub source: DispatchSource,
}

impl DispatchOutcome {
    fn new(keyword: String, source: DispatchSource) -> Self {
        Self { keyword, source }
    }
}

/// Serves one keyword per call. Holds no per-call state, so a single
/// instance can be shared across request handlers.
#[derive(Clone)]
pub struct DispatchService {
    store: KeywordStore,
    queue: Arc<dyn FastQueue>,
    batch_size: usize,
    claim_attempts: usize,
    metrics: MetricsCollector,
}

impl DispatchService {
    pub fn new(store: KeywordStore, queue: Arc<dyn FastQueue>) -> Self {
        Self {
            store,
            queue,
            batch_size: DEFAULT_DISPATCH_BATCH_SIZE,
            claim_attempts: DEFAULT_CLAIM_ATTEMPTS,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_claim_attempts(mut self, attempts: usize) -> Self {
        self.claim_attempts = attempts.max(1);
        self
    }

    /// Returns at most one keyword.
    ///
    /// `Ok(None)` means no unread keyword is left in either tier.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::StoreUnavailable`] when the fallback cannot
    /// reach the durable store. Fast-tier failures are logged and bypassed.
    pub async fn next(&self) -> Result<Option<DispatchOutcome>, DispatchError> {
        let started = Instant::now();
        let result = self.dispatch().await;

        let label = match &result {
            Ok(Some(outcome)) => outcome.source.as_str(),
            Ok(None) => "empty",
            Err(_) => "error",
        };
        self.metrics
            .record_dispatch(label, started.elapsed().as_secs_f64());

        result
    }

    async fn dispatch(&self) -> Result<Option<DispatchOutcome>, DispatchError> {
        let tier_reachable = match self.queue.pop_one().await {
            Ok(Some(keyword)) => {
                return Ok(Some(DispatchOutcome::new(keyword, DispatchSource::Queue)));
            }
            Ok(None) => true,
            Err(e) => {
                warn!(
                    backend = self.queue.backend(),
                    error = %e,
                    "Fast tier unavailable, falling back to store"
                );
                false
            }
        };

        // An unreachable tier cannot buffer the rest of a batch, so claim
        // only what this call will serve.
        let limit = if tier_reachable { self.batch_size } else { 1 };

        for attempt in 1..=self.claim_attempts {
            let rows = self.store.select_unread(limit, None).await?;
            if rows.is_empty() {
                debug!("No unread keywords in store");
                return Ok(None);
            }

            let claimed = self.claim(rows).await?;
            let Some(first) = claimed.first().cloned() else {
                debug!(attempt, "Rows claimed by a concurrent caller, retrying");
                continue;
            };

            if !tier_reachable {
                return Ok(Some(DispatchOutcome::new(first, DispatchSource::Direct)));
            }

            if let Err(e) = self.queue.push_many(&claimed).await {
                warn!(
                    error = %e,
                    claimed = claimed.len(),
                    "Failed to buffer claimed keywords, serving first directly"
                );
                return Ok(Some(DispatchOutcome::new(first, DispatchSource::Direct)));
            }

            match self.queue.pop_one().await {
                Ok(Some(keyword)) => {
                    return Ok(Some(DispatchOutcome::new(keyword, DispatchSource::Store)));
                }
                Ok(None) => {
                    debug!(attempt, "Buffered keywords drained by other callers, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "Fast tier failed after buffering, serving first directly");
                    return Ok(Some(DispatchOutcome::new(first, DispatchSource::Direct)));
                }
            }
        }

        Ok(None)
    }

    /// Marks `rows` read and returns the keywords of the rows this call
    /// flipped, in the original id-descending order.
    async fn claim(&self, rows: Vec<UnreadKeyword>) -> Result<Vec<String>, DispatchError> {
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let flipped: HashSet<i64> = self.store.mark_read(&ids).await?.into_iter().collect();

        Ok(rows
            .into_iter()
            .filter(|row| flipped.contains(&row.id))
            .map(|row| row.keyword)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, QueueError};
    use async_trait::async_trait;

    async fn open_store(dir: &tempfile::TempDir) -> KeywordStore {
        KeywordStore::open(&dir.path().join("dispatch.db")).await.unwrap()
    }

    /// Fast tier whose server is gone.
    struct UnreachableQueue;

    #[async_trait]
    impl FastQueue for UnreachableQueue {
        fn backend(&self) -> &'static str {
            "unreachable"
        }
        async fn push_many(&self, _keywords: &[String]) -> Result<usize, QueueError> {
            Err(QueueError::ConnectionFailed("refused".to_string()))
        }
        async fn pop_one(&self) -> Result<Option<String>, QueueError> {
            Err(QueueError::ConnectionFailed("refused".to_string()))
        }
        async fn peek_range(
            &self,
            _start: usize,
            _count: usize,
        ) -> Result<Vec<String>, QueueError> {
            Err(QueueError::ConnectionFailed("refused".to_string()))
        }
        async fn trim_front(&self, _count: usize) -> Result<(), QueueError> {
            Err(QueueError::ConnectionFailed("refused".to_string()))
        }
        async fn clear(&self) -> Result<(), QueueError> {
            Err(QueueError::ConnectionFailed("refused".to_string()))
        }
        async fn len(&self) -> Result<usize, QueueError> {
            Err(QueueError::ConnectionFailed("refused".to_string()))
        }
    }

    /// Reports empty on pop and fails every push.
    struct PushFailingQueue;

    #[async_trait]
    impl FastQueue for PushFailingQueue {
        fn backend(&self) -> &'static str {
            "push-failing"
        }
        async fn push_many(&self, _keywords: &[String]) -> Result<usize, QueueError> {
            Err(QueueError::Timeout(std::time::Duration::from_millis(5)))
        }
        async fn pop_one(&self) -> Result<Option<String>, QueueError> {
            Ok(None)
        }
        async fn peek_range(
            &self,
            _start: usize,
            _count: usize,
        ) -> Result<Vec<String>, QueueError> {
            Ok(Vec::new())
        }
        async fn trim_front(&self, _count: usize) -> Result<(), QueueError> {
            Ok(())
        }
        async fn clear(&self) -> Result<(), QueueError> {
            Ok(())
        }
        async fn len(&self) -> Result<usize, QueueError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_hot_path_pops_from_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let queue = Arc::new(MemoryQueue::new());
        queue.push_many(&["k1".to_string(), "k2".to_string()]).await.unwrap();

        let service = DispatchService::new(store, queue.clone());
        let outcome = service.next().await.unwrap().unwrap();

        assert_eq!(outcome, DispatchOutcome::new("k1".to_string(), DispatchSource::Queue));
        assert_eq!(queue.snapshot(), vec!["k2"]);
    }

    #[tokio::test]
    async fn test_empty_queue_falls_back_and_buffers_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        for kw in ["a", "b", "c"] {
            store.insert("t", kw).await.unwrap();
        }
        let queue = Arc::new(MemoryQueue::new());
        let service = DispatchService::new(store.clone(), queue.clone());

        let outcome = service.next().await.unwrap().unwrap();

        assert_eq!(outcome.keyword, "c");
        assert_eq!(outcome.source, DispatchSource::Store);
        assert_eq!(queue.snapshot(), vec!["b", "a"]);
        assert_eq!(store.stats().await.unwrap().unread, 0);

        let second = service.next().await.unwrap().unwrap();
        assert_eq!(second.keyword, "b");
        assert_eq!(second.source, DispatchSource::Queue);
    }

    #[tokio::test]
    async fn test_unreachable_tier_serves_directly() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        for i in 1..=5 {
            store.insert("t", &format!("kw{}", i)).await.unwrap();
        }
        // id 5 is the newest unread row
        assert_eq!(store.get(5).await.unwrap().unwrap().keyword, "kw5");

        let service = DispatchService::new(store.clone(), Arc::new(UnreachableQueue));
        let outcome = service.next().await.unwrap().unwrap();

        assert_eq!(outcome, DispatchOutcome::new("kw5".to_string(), DispatchSource::Direct));
        assert!(store.get(5).await.unwrap().unwrap().is_read);
        // Only the served row was claimed.
        assert_eq!(store.stats().await.unwrap().unread, 4);
    }

    #[tokio::test]
    async fn test_push_failure_serves_first_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert("t", "x").await.unwrap();
        store.insert("t", "y").await.unwrap();

        let service = DispatchService::new(store.clone(), Arc::new(PushFailingQueue));
        let outcome = service.next().await.unwrap().unwrap();

        assert_eq!(outcome, DispatchOutcome::new("y".to_string(), DispatchSource::Direct));
        assert_eq!(store.stats().await.unwrap().unread, 0);
    }

    #[tokio::test]
    async fn test_nothing_available() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let service = DispatchService::new(store, Arc::new(MemoryQueue::new()));

        assert!(service.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.pool().close().await;

        let service = DispatchService::new(store, Arc::new(UnreachableQueue));
        let err = service.next().await.unwrap_err();

        assert!(matches!(err, DispatchError::StoreUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_share_a_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let words: Vec<String> = (0..40).map(|i| format!("kw{}", i)).collect();
        store.insert_sheet("t", &words).await.unwrap();

        let service = DispatchService::new(store.clone(), Arc::new(MemoryQueue::new()))
            .with_batch_size(5);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                for _ in 0..5 {
                    if let Some(outcome) = service.next().await.unwrap() {
                        got.push(outcome.keyword);
                    }
                }
                got
            }));
        }

        let mut served = Vec::new();
        for handle in handles {
            served.extend(handle.await.unwrap());
        }

        // Callers that lost every race may come back empty-handed; whatever
        // they left behind is still reachable by later calls.
        while let Some(outcome) = service.next().await.unwrap() {
            served.push(outcome.keyword);
        }

        let unique: HashSet<&String> = served.iter().collect();
        assert_eq!(unique.len(), served.len());
        assert_eq!(served.len(), 40);
        assert_eq!(store.stats().await.unwrap().unread, 0);
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(DispatchSource::Direct.to_string(), "direct");
        let json = serde_json::to_string(&DispatchSource::Queue).unwrap();
        assert_eq!(json, "\"queue\"");
    }
}
