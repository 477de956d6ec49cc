use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use triplecache::cache::serializer::{DeleteData, InsertData};
use triplecache::cache::{DeleteCache, WriteCache};
use triplecache::{
    CacheConfig, Connection, ConnectionConfig, Error, OxigraphStore, Resource, Result,
    TransactionHandle, Triple, UpdateExecutor, Value,
};

/// Executor that panics on its first `panics` calls, fails the next `failures`
/// calls, optionally sleeps, then records.
#[derive(Default)]
struct Flaky {
    panics: usize,
    failures: usize,
    delay: Duration,
    calls: AtomicUsize,
    updates: Mutex<Vec<String>>,
}

#[async_trait]
impl UpdateExecutor for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn submit(&self, update: &str, _transaction: Option<&TransactionHandle>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.panics {
            panic!("executor crashed on call {}", call);
        }
        if call < self.panics + self.failures {
            return Err(Error::Backend(format!("store unavailable on call {}", call)));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.updates.lock().unwrap().push(update.to_string());
        Ok(())
    }
}

fn fast(capacity: usize) -> CacheConfig {
    CacheConfig {
        initial_delay_ms: 10,
        tick_interval_ms: 10,
        capacity,
        ..CacheConfig::default()
    }
}

fn statement(n: usize) -> (Resource, &'static str, Value) {
    (
        Resource::iri(format!("http://example.org/s{}", n)),
        "http://example.org/p",
        Value::iri("http://example.org/o"),
    )
}

#[tokio::test]
async fn test_panicking_tick_does_not_stop_scheduler() {
    let executor = Arc::new(Flaky { panics: 1, ..Flaky::default() });
    let cache = WriteCache::new(InsertData, executor.clone(), fast(100)).unwrap();
    cache.start().await;

    let (s, p, o) = statement(1);
    cache.add(&s, p, &o, &[]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(executor.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(executor.updates.lock().unwrap().len(), 1);
    assert!(cache.is_empty().await);
    cache.stop_and_flush().await.unwrap();
}

#[tokio::test]
async fn test_failing_ticks_keep_batch_until_store_recovers() {
    let executor = Arc::new(Flaky { failures: 3, ..Flaky::default() });
    let cache = WriteCache::new(InsertData, executor.clone(), fast(100)).unwrap();
    cache.start().await;

    let batch: Vec<Triple> = (0..2)
        .map(|n| {
            let (s, p, o) = statement(n);
            Triple::new(s, p, o, None)
        })
        .collect();
    cache.add_triples(batch).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(executor.calls.load(Ordering::SeqCst) >= 4);
    let updates = executor.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].contains("<http://example.org/s0>"));
    assert!(updates[0].contains("<http://example.org/s1>"));
    assert_eq!(updates[0].matches(" .\n").count(), 2);
    assert!(cache.is_empty().await);
    cache.stop_and_flush().await.unwrap();
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_flush() {
    let executor = Arc::new(Flaky { delay: Duration::from_millis(200), ..Flaky::default() });
    let cache = DeleteCache::new(DeleteData, executor.clone(), fast(100)).unwrap();
    cache.start().await;

    let (s, p, o) = statement(1);
    cache.add(&s, p, &o, &[]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    // The scheduled flush is mid-submit; stopping must let it finish.
    assert_eq!(cache.stop_and_flush().await.unwrap(), 0);
    let updates = executor.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].starts_with("DELETE DATA"));
}

#[tokio::test]
async fn test_scheduler_reaches_store_without_reads() {
    let store = Arc::new(OxigraphStore::in_memory().unwrap());
    let config = ConnectionConfig { write_cache: fast(1_000), ..ConnectionConfig::default() };
    let connection = Connection::open(store.clone(), config).await.unwrap();

    for n in 0..3 {
        let (s, p, o) = statement(n);
        connection.add(&s, p, &o, &[]).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(store.store().len().unwrap(), 3);
    assert_eq!(connection.pending().await.additions, 0);
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_reconfigured_cache_uses_new_capacity() {
    let executor = Arc::new(Flaky::default());
    let cache = WriteCache::new(
        InsertData,
        executor.clone(),
        CacheConfig { initial_delay_ms: 60_000, tick_interval_ms: 60_000, ..CacheConfig::default() },
    )
    .unwrap();
    cache.start().await;
    cache.configure(60_000, 60_000, 3).await.unwrap();

    for n in 0..7 {
        let (s, p, o) = statement(n);
        cache.add(&s, p, &o, &[]).await.unwrap();
    }
    assert_eq!(executor.updates.lock().unwrap().len(), 2);
    assert_eq!(cache.len().await, 1);
    assert_eq!(cache.stop_and_flush().await.unwrap(), 1);
}
