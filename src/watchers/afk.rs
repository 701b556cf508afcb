/**
 * ============================================================================
 * AFK DETECTOR MODULE
 * ============================================================================
 *
 * PURPOSE: Derive away-from-keyboard segments from pointer and key activity
 *
 * STATE MACHINE (initial Active):
 *   Active --no activity for afk_threshold--> AFK      emits afk_start
 *   AFK    --record_activity-->               Active   emits afk_end
 *
 * THREAD SAFETY:
 * The poller and every activity notification go through the same mutex,
 * and events are enqueued inside it, so a move arriving while the poller
 * flips to AFK is ordered after the afk_start it ends.
 *
 * ============================================================================
 */

use crate::collector::EventSink;
use crate::events::EventKind;
use crate::events::types::whole_seconds_between;
use crate::watchers::lock;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/**
 * Pure AFK state
 */
#[derive(Debug, Clone)]
pub struct AfkState {
    last_activity: DateTime<Utc>,
    afk_since: Option<DateTime<Utc>>,
}

impl AfkState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_activity: now,
            afk_since: None,
        }
    }

    pub fn is_afk(&self) -> bool {
        self.afk_since.is_some()
    }

    /**
     * Input seen at `at`
     * Leaving AFK always emits afk_end; a signal captured before the
     * segment began closes it with zero length
     */
    pub fn record_activity(&mut self, at: DateTime<Utc>) -> Option<EventKind> {
        let ended = self.afk_since.take().map(|start| {
            let end = at.max(start);
            EventKind::AfkEnd {
                start_time: start,
                end_time: end,
                duration_seconds: whole_seconds_between(start, end),
            }
        });

        if at > self.last_activity {
            self.last_activity = at;
        }
        ended
    }

    pub fn poll(&mut self, now: DateTime<Utc>, threshold: TimeDelta) -> Option<EventKind> {
        if self.is_afk() {
            return None;
        }
        let idle = now - self.last_activity;
        if idle < threshold {
            return None;
        }

        self.afk_since = Some(now);
        Some(EventKind::AfkStart {
            idle_seconds: whole_seconds_between(self.last_activity, now),
        })
    }
}

/**
 * Shared detector, handed to the pointer and key watchers
 */
pub struct AfkDetector {
    state: Mutex<AfkState>,
    threshold: TimeDelta,
    sink: EventSink,
}

impl AfkDetector {
    pub fn new(threshold_seconds: u64, sink: EventSink) -> Self {
        Self::starting_at(Utc::now(), threshold_seconds, sink)
    }

    /// Detector whose idle clock starts at `start` instead of now.
    pub fn starting_at(start: DateTime<Utc>, threshold_seconds: u64, sink: EventSink) -> Self {
        Self {
            state: Mutex::new(AfkState::new(start)),
            threshold: TimeDelta::seconds(threshold_seconds as i64),
            sink,
        }
    }

    pub fn record_activity(&self, at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if let Some(event) = state.record_activity(at) {
            let end = match &event {
                EventKind::AfkEnd { end_time, .. } => *end_time,
                _ => at,
            };
            log::debug!("AFK ended at {}", end);
            self.sink.emit_at(end, event);
        }
    }

    pub fn poll(&self, now: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if let Some(event) = state.poll(now, self.threshold) {
            log::debug!("AFK started at {}", now);
            self.sink.emit_at(now, event);
        }
    }

    pub fn is_afk(&self) -> bool {
        lock(&self.state).is_afk()
    }

    /**
     * Poll loop
     */
    pub async fn run(self: Arc<Self>, poll_interval: Duration, cancel: CancellationToken) {
        log::info!("AFK detector started (threshold {}s)", self.threshold.num_seconds());
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll(Utc::now()),
                _ = cancel.cancelled() => break,
            }
        }
        log::info!("AFK detector stopped");
    }
}
