//! Integration tests against a live Redis server.
//!
//! Run with: REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test redis_integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use keyword_relay::{
    DispatchService, DispatchSource, FastQueue, KeywordStore, RedisQueue, RefillScheduler,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
}

fn test_queue(key: &str) -> RedisQueue {
    RedisQueue::new(&redis_url(), key, Duration::from_secs(2)).expect("valid redis url")
}

#[tokio::test]
#[ignore] // Requires a running Redis server
async fn test_push_pop_preserves_order() {
    let queue = test_queue("keyword_relay_test:order");
    queue.clear().await.unwrap();

    let words: Vec<String> = (0..1200).map(|i| format!("kw{}", i)).collect();
    assert_eq!(queue.push_many(&words).await.unwrap(), 1200);
    assert_eq!(queue.len().await.unwrap(), 1200);

    assert_eq!(queue.pop_one().await.unwrap().as_deref(), Some("kw0"));
    assert_eq!(queue.peek_range(0, 2).await.unwrap(), vec!["kw1", "kw2"]);

    let batch = queue.claim_batch(3).await.unwrap();
    assert_eq!(batch, vec!["kw1", "kw2", "kw3"]);
    assert_eq!(queue.len().await.unwrap(), 1196);

    queue.clear().await.unwrap();
    assert_eq!(queue.pop_one().await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires a running Redis server
async fn test_refill_and_dispatch_through_redis() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeywordStore::open(&dir.path().join("redis.db")).await.unwrap();
    for kw in ["a", "b", "c"] {
        store.insert("t", kw).await.unwrap();
    }

    let queue: Arc<dyn FastQueue> = Arc::new(test_queue("keyword_relay_test:pipeline"));
    let report = RefillScheduler::new(store.clone(), Arc::clone(&queue))
        .refill(10, 1)
        .await
        .unwrap();
    assert_eq!(report.pushed, 3);

    let service = DispatchService::new(store, queue);
    let first = service.next().await.unwrap().unwrap();
    assert_eq!(first.keyword, "c");
    assert_eq!(first.source, DispatchSource::Queue);
}
