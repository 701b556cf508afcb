/**
 * ============================================================================
 * BATCH SENDER MODULE
 * ============================================================================
 *
 * PURPOSE: Move queued events to the collector, or to disk when it is gone
 *
 * SEND LOOP:
 * - Every send_interval, drain the queue into one batch
 * - POST it; HTTP 200 is success
 * - Anything else: wait retry_delay and try again, retry_attempts tries total
 * - Rejected key (401/403): no further tries
 * - Exhausted: append the batch, in order, to the fallback file
 *
 * DELIVERY GUARANTEE: at-least-once. A batch the collector stored but whose
 * response got lost is retried and may be stored twice.
 *
 * SHUTDOWN: on cancellation the queue is drained one last time and given a
 * single attempt before falling back, so stop never waits on retries.
 *
 * ============================================================================
 */

use crate::collector::client::EventTransport;
use crate::collector::fallback::FallbackStore;
use crate::collector::queue::EventDrain;
use crate::collector::types::{BatchOutcome, DeliveryError, EventBatch, SyncStatistics};
use crate::events::Event;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Upper bound on events per request when replaying the fallback file.
pub const REPLAY_CHUNK_SIZE: usize = 500;

/**
 * Delivery settings
 */
#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub send_interval: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

/**
 * Batch sender
 * transport is None when no HTTP client could be built; every batch then
 * goes straight to the fallback file
 */
pub struct BatchSender {
    transport: Option<Arc<dyn EventTransport>>,
    fallback: FallbackStore,
    settings: SenderSettings,
    statistics: Arc<Mutex<SyncStatistics>>,
}

impl BatchSender {
    pub fn new(
        transport: Option<Arc<dyn EventTransport>>,
        fallback: FallbackStore,
        settings: SenderSettings,
    ) -> Self {
        Self {
            transport,
            fallback,
            settings,
            statistics: Arc::new(Mutex::new(SyncStatistics::default())),
        }
    }

    /// Shared handle to the running statistics.
    pub fn statistics(&self) -> Arc<Mutex<SyncStatistics>> {
        Arc::clone(&self.statistics)
    }

    fn with_stats<R>(&self, f: impl FnOnce(&mut SyncStatistics) -> R) -> R {
        let mut stats = self
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }

    /**
     * Main loop
     * Runs until cancel fires, then performs the final flush
     */
    pub async fn run(self, mut drain: EventDrain, cancel: CancellationToken) {
        log::info!(
            "Batch sender started (interval {:?}, {} attempts, destination {})",
            self.settings.send_interval,
            self.settings.retry_attempts,
            self.destination()
        );

        let period = self.settings.send_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let events = drain.drain();
                    if events.is_empty() {
                        continue;
                    }
                    let batch = EventBatch::new(events);
                    self.deliver(batch, self.settings.retry_attempts, &cancel).await;
                }
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }

        let remaining = drain.drain();
        if !remaining.is_empty() {
            log::info!("Flushing {} queued events on shutdown", remaining.len());
            self.deliver(EventBatch::new(remaining), 1, &cancel).await;
        }
        log::info!("Batch sender stopped");
    }

    fn destination(&self) -> String {
        self.transport
            .as_ref()
            .map(|t| t.endpoint())
            .unwrap_or_else(|| format!("fallback file {}", self.fallback.path().display()))
    }

    /**
     * Deliver one batch with up to `attempts` tries
     * Waits between tries are cut short by cancellation
     */
    pub async fn deliver(
        &self,
        batch: EventBatch,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let attempts = attempts.max(1);
        let Some(transport) = self.transport.as_ref() else {
            self.with_stats(|s| s.record_error(DeliveryError::NoTransport.to_string()));
            return self.write_fallback(&batch, 0);
        };

        let mut tried = 0;
        while tried < attempts {
            tried += 1;
            match transport.send_events(&batch.events).await {
                Ok(()) => {
                    log::info!(
                        "Batch {} sent successfully: {} events (attempt {}/{})",
                        batch.batch_id,
                        batch.len(),
                        tried,
                        attempts
                    );
                    self.with_stats(|s| s.record_success(batch.len()));
                    return BatchOutcome::Delivered { attempts: tried };
                }
                Err(e) => {
                    log::warn!(
                        "Failed to send batch {} (attempt {}/{}): {}",
                        batch.batch_id,
                        tried,
                        attempts,
                        e
                    );
                    let retryable = e.is_retryable();
                    self.with_stats(|s| s.record_error(e.to_string()));

                    if !retryable {
                        log::error!("Not retrying batch {}: {}", batch.batch_id, e);
                        break;
                    }
                    if tried < attempts && !self.pause_before_retry(cancel).await {
                        break;
                    }
                }
            }
        }

        self.write_fallback(&batch, tried)
    }

    /// Returns false when cancelled during the pause.
    async fn pause_before_retry(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.retry_delay) => true,
            _ = cancel.cancelled() => false,
        }
    }

    fn write_fallback(&self, batch: &EventBatch, attempts: u32) -> BatchOutcome {
        match self.fallback.append(&batch.events) {
            Ok(written) => {
                log::warn!(
                    "Batch {} written to fallback file {} ({} events)",
                    batch.batch_id,
                    self.fallback.path().display(),
                    written
                );
                self.with_stats(|s| s.record_fallback(written));
                BatchOutcome::WrittenToFallback { attempts }
            }
            Err(e) => {
                log::error!(
                    "Fallback write failed for batch {}, {} events lost: {}",
                    batch.batch_id,
                    batch.len(),
                    e
                );
                self.with_stats(|s| {
                    s.record_lost(batch.len());
                    s.record_error(format!("Fallback write error: {}", e));
                });
                BatchOutcome::Lost { attempts }
            }
        }
    }

    /**
     * Resend whatever a previous run left in the fallback file
     *
     * Runs once, before the send loop. Chunks that still cannot be delivered
     * go back into the fallback file through the normal path, and unparseable
     * lines are put back verbatim.
     * Returns number of events delivered.
     */
    pub async fn replay_fallback(&self, cancel: &CancellationToken) -> usize {
        if self.transport.is_none() {
            return 0;
        }

        let replay_path = match self.fallback.claim_for_replay() {
            Ok(Some(path)) => path,
            Ok(None) => return 0,
            Err(e) => {
                log::error!("Could not claim fallback file for replay: {}", e);
                return 0;
            }
        };

        let contents = match FallbackStore::load_replay(&replay_path) {
            Ok(contents) => contents,
            Err(e) => {
                log::error!("Could not read replay file {}: {}", replay_path.display(), e);
                return 0;
            }
        };

        log::info!(
            "Replaying {} events from {}",
            contents.events.len(),
            replay_path.display()
        );

        let mut delivered = 0;
        let mut chunks = contents.events.chunks(REPLAY_CHUNK_SIZE);
        while let Some(chunk) = chunks.next() {
            let batch = EventBatch::new(chunk.to_vec());
            let outcome = if cancel.is_cancelled() {
                self.write_fallback(&batch, 0)
            } else {
                self.deliver(batch, self.settings.retry_attempts, cancel).await
            };
            match outcome {
                BatchOutcome::Delivered { .. } => delivered += chunk.len(),
                BatchOutcome::WrittenToFallback { .. } => {
                    // Collector is down; park the rest without trying it
                    let rest: Vec<Event> = chunks.by_ref().flatten().cloned().collect();
                    if !rest.is_empty() {
                        if let Err(e) = self.fallback.append(&rest) {
                            log::error!(
                                "Could not park {} replay events, keeping {}: {}",
                                rest.len(),
                                replay_path.display(),
                                e
                            );
                            return delivered;
                        }
                        log::warn!(
                            "Collector unavailable during replay, {} events returned to {}",
                            rest.len(),
                            self.fallback.path().display()
                        );
                        self.with_stats(|s| s.record_fallback(rest.len()));
                    }
                    break;
                }
                BatchOutcome::Lost { .. } => {
                    // Keep the replay file so the next start can try again
                    log::error!("Replay aborted, keeping {}", replay_path.display());
                    return delivered;
                }
            }
        }

        if let Err(e) = self.fallback.append_lines(&contents.malformed_lines) {
            log::error!("Could not restore malformed fallback lines: {}", e);
            return delivered;
        }
        if let Err(e) = FallbackStore::finish_replay(&replay_path) {
            log::warn!("Could not remove replay file {}: {}", replay_path.display(), e);
        }

        log::info!("Fallback replay finished: {} events delivered", delivered);
        delivered
    }
}
