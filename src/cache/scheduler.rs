use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::serializer::BatchRenderer;
use super::CacheShared;

/// Periodic background task driving timer-based flushes for one cache.
///
/// Cancelling only stops future ticks; a flush already running finishes and
/// [`FlushScheduler::stop`] waits for it.
pub(crate) struct FlushScheduler {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    pub(crate) fn start<R: BatchRenderer>(
        shared: Arc<CacheShared<R>>,
        initial_delay: Duration,
        tick_interval: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            run(shared, token, initial_delay, tick_interval).await;
        });
        Self { shutdown, handle }
    }

    pub(crate) async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Flush scheduler task ended abnormally");
        }
    }

    /// Stops future ticks without waiting, for use where awaiting is impossible.
    pub(crate) fn cancel(&self) {
        self.shutdown.cancel();
    }
}

async fn run<R: BatchRenderer>(
    shared: Arc<CacheShared<R>>,
    shutdown: CancellationToken,
    initial_delay: Duration,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        verb = shared.renderer.verb().keyword(),
        initial_delay_ms = initial_delay.as_millis() as u64,
        tick_interval_ms = tick_interval.as_millis() as u64,
        "Flush scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // The tick body is never raced against shutdown, so an
                // in-flight flush always runs to completion.
                match AssertUnwindSafe(shared.tick()).catch_unwind().await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Scheduled flush failed; batch kept for retry");
                    }
                    Err(_) => {
                        tracing::error!("Scheduled flush panicked; batch kept for retry");
                    }
                }
            }
        }
    }

    tracing::debug!(verb = shared.renderer.verb().keyword(), "Flush scheduler stopped");
}
