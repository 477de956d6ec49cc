//! Write-behind mutation cache.
//!
//! Single-triple mutations are buffered and flushed to the backend as one
//! bulk update, either when the buffer reaches its capacity (checked on every
//! insert), when the scheduler finds the buffer older than its maximum age,
//! or when the owning connection forces a sync. All three paths go through
//! one mutex-guarded flush, so at most one flush runs at a time and a second
//! caller simply finds the buffer empty.

pub mod buffer;
pub(crate) mod scheduler;
pub mod serializer;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use self::buffer::MutationBuffer;
use self::scheduler::FlushScheduler;
use self::serializer::{validate_triple, BatchRenderer, DeleteData, InsertData};
use crate::backend::{TransactionHandle, UpdateExecutor};
use crate::config::CacheConfig;
use crate::core::{Partition, Resource, Triple, Value};
use crate::error::{CacheError, Result};

/// Cache accumulating additions, flushed as `INSERT DATA`
pub type WriteCache = MutationCache<InsertData>;

/// Cache accumulating removals, flushed as `DELETE DATA`
pub type DeleteCache = MutationCache<DeleteData>;

struct CacheState {
    buffer: MutationBuffer,
    transaction: Option<TransactionHandle>,
}

/// State shared between the cache front end and its scheduler task
pub(crate) struct CacheShared<R> {
    pub(crate) renderer: R,
    executor: Arc<dyn UpdateExecutor>,
    state: Mutex<CacheState>,
}

impl<R: BatchRenderer> CacheShared<R> {
    /// The only flush implementation; callers must hold the state lock.
    async fn flush_locked(&self, state: &mut CacheState) -> std::result::Result<usize, CacheError> {
        if state.buffer.is_empty() {
            return Ok(0);
        }

        let update = self.renderer.render(&state.buffer)?;
        let count = state.buffer.len();
        let started = Instant::now();

        self.executor
            .submit(&update, state.transaction.as_ref())
            .await
            .map_err(|e| CacheError::Submission(e.to_string()))?;

        state.buffer.mark_flushed(Instant::now());
        tracing::debug!(
            backend = self.executor.name(),
            verb = self.renderer.verb().keyword(),
            triples = count,
            bytes = update.len(),
            transaction = state.transaction.map(|t| t.id()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flushed cached mutations"
        );
        Ok(count)
    }

    pub(crate) async fn tick(&self) -> std::result::Result<usize, CacheError> {
        let mut state = self.state.lock().await;
        if !state.buffer.should_flush_on_tick(Instant::now()) {
            return Ok(0);
        }
        self.flush_locked(&mut state).await
    }
}

struct Lifecycle {
    config: CacheConfig,
    scheduler: Option<FlushScheduler>,
    stopped: bool,
}

/// Batching cache for one mutation direction.
///
/// Owned by a single connection. The scheduler is started with
/// [`MutationCache::start`] and stopped for good by
/// [`MutationCache::stop_and_flush`].
pub struct MutationCache<R: BatchRenderer> {
    shared: Arc<CacheShared<R>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<R: BatchRenderer> MutationCache<R> {
    pub fn new(renderer: R, executor: Arc<dyn UpdateExecutor>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let buffer = MutationBuffer::new(config.capacity, config.max_age());
        Ok(Self {
            shared: Arc::new(CacheShared {
                renderer,
                executor,
                state: Mutex::new(CacheState { buffer, transaction: None }),
            }),
            lifecycle: Mutex::new(Lifecycle { config, scheduler: None, stopped: false }),
        })
    }

    /// Starts the flush scheduler, replacing any running one. No-op once the
    /// cache has been stopped for good.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.restart(&mut lifecycle).await;
    }

    async fn restart(&self, lifecycle: &mut Lifecycle) {
        if let Some(scheduler) = lifecycle.scheduler.take() {
            scheduler.stop().await;
        }
        if lifecycle.stopped || !lifecycle.config.enabled {
            return;
        }
        lifecycle.scheduler = Some(FlushScheduler::start(
            Arc::clone(&self.shared),
            lifecycle.config.initial_delay(),
            lifecycle.config.tick_interval(),
        ));
    }

    /// Replaces scheduler timings and buffer limits. Buffered triples are kept.
    pub async fn configure(
        &self,
        initial_delay_ms: u64,
        tick_interval_ms: u64,
        capacity: usize,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let config = CacheConfig {
            initial_delay_ms,
            tick_interval_ms,
            capacity,
            max_age_ms: None,
            ..lifecycle.config.clone()
        };
        config.validate()?;

        if let Some(scheduler) = lifecycle.scheduler.take() {
            scheduler.stop().await;
        }
        {
            let mut state = self.shared.state.lock().await;
            state.buffer.set_limits(config.capacity, config.max_age());
        }
        tracing::info!(
            verb = self.shared.renderer.verb().keyword(),
            initial_delay_ms,
            tick_interval_ms,
            capacity,
            "Reconfigured mutation cache"
        );
        lifecycle.config = config;
        self.restart(&mut lifecycle).await;
        Ok(())
    }

    /// Buffers one triple per context (one unscoped triple when `contexts` is
    /// empty), flushing before returning if the capacity is reached.
    pub async fn add(
        &self,
        subject: &Resource,
        predicate: &str,
        object: &Value,
        contexts: &[Resource],
    ) -> std::result::Result<(), CacheError> {
        self.add_triples(Triple::expand(subject, predicate, object, contexts)).await
    }

    /// Buffers `triples` as one call. Every term is validated first; on a
    /// serialization error nothing from the call is buffered.
    pub async fn add_triples(
        &self,
        triples: impl IntoIterator<Item = Triple>,
    ) -> std::result::Result<(), CacheError> {
        // Rejected calls buffer nothing; a bad term must not poison the batch.
        let verb = self.shared.renderer.verb();
        let triples: Vec<Triple> = triples.into_iter().collect();
        for triple in &triples {
            validate_triple(verb, triple)?;
        }

        let mut state = self.shared.state.lock().await;
        // Whole call is buffered before the threshold check.
        for triple in triples {
            state.buffer.push(triple);
        }
        if state.buffer.should_flush_on_insert() {
            self.shared.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Forced sync. Returns the number of triples submitted.
    pub async fn flush(&self) -> std::result::Result<usize, CacheError> {
        let mut state = self.shared.state.lock().await;
        self.shared.flush_locked(&mut state).await
    }

    /// Drops buffered triples without submitting them.
    pub async fn discard(&self) -> usize {
        let mut state = self.shared.state.lock().await;
        let dropped = state.buffer.len();
        state.buffer.clear();
        dropped
    }

    /// Routes subsequent flushes into `transaction`, or outside any
    /// transaction when `None`.
    pub async fn bind_transaction(&self, transaction: Option<TransactionHandle>) {
        self.shared.state.lock().await.transaction = transaction;
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.buffer.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.state.lock().await.buffer.is_empty()
    }

    /// Whether any buffered triple falls in one of `partitions`.
    pub async fn touches(&self, partitions: &[Partition]) -> bool {
        self.shared.state.lock().await.buffer.touches(partitions)
    }

    pub async fn config(&self) -> CacheConfig {
        self.lifecycle.lock().await.config.clone()
    }

    /// Stops the scheduler permanently, then flushes what is left. Waits for
    /// a scheduler flush already in flight.
    pub async fn stop_and_flush(&self) -> std::result::Result<usize, CacheError> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.stopped = true;
            if let Some(scheduler) = lifecycle.scheduler.take() {
                scheduler.stop().await;
            }
        }
        self.flush().await
    }
}

impl<R: BatchRenderer> Drop for MutationCache<R> {
    fn drop(&mut self) {
        if let Ok(lifecycle) = self.lifecycle.try_lock() {
            if let Some(scheduler) = &lifecycle.scheduler {
                scheduler.cancel();
            }
        }
    }
}
